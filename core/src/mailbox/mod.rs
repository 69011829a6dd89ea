//! Message boxes: the per-box worker, pending state and handler dispatch.

mod cache;
mod inbox;
mod message_box;
mod pending;
pub(crate) mod worker;

pub use message_box::MessageBox;
pub use pending::{AnswerHandle, PendingQuestion};

pub(crate) use pending::AnswerSink;
