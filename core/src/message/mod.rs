//! Wire message types, the JSON codec and the `Blob` identity type.

mod blob;
pub mod codec;
mod types;

pub use blob::Blob;
pub use types::{Answer, AnswerMessage, MessageType, QuestionMessage, TellMessage};
