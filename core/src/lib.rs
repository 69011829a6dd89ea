// core/src/lib.rs

//! zmesh - symmetric mesh messaging over ZeroMQ.
//!
//! Each process hosts one [`Node`] containing named [`MessageBox`]es. Any
//! box can play both client and server for any content type: one-way
//! notifications (`tell`), request/response exchanges (`ask` / `try_answer`)
//! and out-of-band arrival observers. Questions and answers are bound by a
//! 128-bit correlation id; retried questions are de-duplicated by a
//! short-lived answer cache so a deterministic handler runs at most once
//! per question.

/// Defines custom error types used throughout the library.
pub mod error;
/// Message boxes, their worker threads and handler dispatch.
pub mod mailbox;
/// Wire message types, the JSON codec and identity blobs.
pub mod message;
/// The per-process node, system map and router loop.
pub mod node;
/// Request options and the library's timing constants.
pub mod options;
/// Shared concurrency primitives (one-shot cells, cancel tokens, subscriptions).
pub mod runtime;

// Re-export the principal types so typical users only import from the root.
pub use error::{MeshError, MeshResult};
pub use mailbox::{AnswerHandle, MessageBox, PendingQuestion};
pub use message::{Answer, AnswerMessage, Blob, MessageType, QuestionMessage, TellMessage};
pub use node::{Node, SystemMap};
pub use options::RequestOptions;
pub use runtime::{CancelToken, Subscription};

// --- Top-Level Library Information Functions ---

const VERSION_MAJOR: i32 = 0;
const VERSION_MINOR: i32 = 1;
const VERSION_PATCH: i32 = 0;

/// Returns the library version as a tuple (major, minor, patch).
pub fn version() -> (i32, i32, i32) {
  (VERSION_MAJOR, VERSION_MINOR, VERSION_PATCH)
}

/// Returns the major version number of the library.
pub fn version_major() -> i32 {
  VERSION_MAJOR
}

/// Returns the minor version number of the library.
pub fn version_minor() -> i32 {
  VERSION_MINOR
}

/// Returns the patch version number of the library.
pub fn version_patch() -> i32 {
  VERSION_PATCH
}
