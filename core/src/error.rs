// core/src/error.rs

use std::time::Duration;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type MeshResult<T> = Result<T, MeshError>;

/// Errors surfaced by mesh operations.
///
/// Loop-internal transient conditions (`EAGAIN`, `EINTR`, `ETERM` during
/// shutdown) are swallowed by the router and worker loops and never reach
/// callers; everything else funnels through this enum.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum MeshError {
  // --- Addressing ---
  #[error("no message box named '{0}' in the system map")]
  UnknownBox(String),

  #[error("invalid argument: {0}")]
  InvalidArgument(String),

  // --- Codec ---
  #[error("malformed message: {0}")]
  MalformedMessage(String),

  // --- Question lifecycle ---
  #[error("request timed out after {attempts} attempt(s) over {elapsed:?}")]
  RequestTimeout { attempts: u32, elapsed: Duration },

  #[error("request was cancelled")]
  Cancelled,

  #[error("message box is shutting down")]
  Shutdown,

  /// Outbound queue is at capacity; the send was rejected.
  #[error("outbound queue is full")]
  Busy,

  // --- Transport ---
  #[error("transport error: {0}")]
  Transport(#[from] zmq::Error),

  // --- Internal ---
  #[error("internal error: {0}")]
  Internal(String),
}

impl MeshError {
  pub(crate) fn invalid_argument(msg: impl Into<String>) -> Self {
    MeshError::InvalidArgument(msg.into())
  }

  pub(crate) fn malformed(msg: impl Into<String>) -> Self {
    MeshError::MalformedMessage(msg.into())
  }
}
