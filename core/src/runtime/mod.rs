//! Shared concurrency primitives: one-shot completion, cancellation and
//! observer subscriptions.

mod cancel;
mod one_shot;
mod subscription;

pub use cancel::CancelToken;
pub use subscription::Subscription;

pub(crate) use one_shot::OneShotCell;
pub(crate) use subscription::CallbackRegistry;
