// core/src/options.rs

use std::time::Duration;

use crate::error::{MeshError, MeshResult};

/// How long the router and worker loops block on their poll/condvar waits.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long a cached answer keeps serving retries of the same question.
pub(crate) const ANSWER_CACHE_TTL: Duration = Duration::from_secs(60);

/// Default bound on a box's outbound queue; sends beyond it fail with
/// [`MeshError::Busy`].
pub(crate) const DEFAULT_OUTBOUND_CAPACITY: usize = 1024;

/// Per-call options for `ask`.
///
/// `timeout` is measured from the enqueue of each individual attempt;
/// `max_retries` bounds the number of attempts, so the worst case total wait
/// is `timeout * max_retries`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestOptions {
  pub timeout: Duration,
  pub max_retries: u32,
}

impl Default for RequestOptions {
  fn default() -> Self {
    Self {
      timeout: Duration::from_secs(3),
      max_retries: 3,
    }
  }
}

impl RequestOptions {
  pub fn new(timeout: Duration, max_retries: u32) -> Self {
    Self { timeout, max_retries }
  }

  pub(crate) fn validate(&self) -> MeshResult<()> {
    if self.max_retries == 0 {
      return Err(MeshError::invalid_argument("max_retries must be at least 1"));
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_are_three_seconds_three_retries() {
    let options = RequestOptions::default();
    assert_eq!(options.timeout, Duration::from_secs(3));
    assert_eq!(options.max_retries, 3);
  }

  #[test]
  fn zero_retries_is_invalid() {
    let options = RequestOptions::new(Duration::from_secs(1), 0);
    assert!(matches!(
      options.validate(),
      Err(MeshError::InvalidArgument(_))
    ));
  }
}
