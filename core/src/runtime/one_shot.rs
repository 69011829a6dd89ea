// core/src/runtime/one_shot.rs

use parking_lot::{Condvar, Mutex};
use std::time::Instant;

enum CellState<T> {
  Pending,
  Complete(T),
  Taken,
}

/// A blocking one-shot completion slot.
///
/// The producer side calls [`complete`](OneShotCell::complete); the first
/// completion wins and every later attempt is a silent no-op, which is what
/// makes answer delivery, cancellation and shutdown race-safe against each
/// other. The single consumer blocks in
/// [`wait_deadline`](OneShotCell::wait_deadline) and takes the value out.
pub(crate) struct OneShotCell<T> {
  state: Mutex<CellState<T>>,
  cv: Condvar,
}

impl<T> OneShotCell<T> {
  pub fn new() -> Self {
    Self {
      state: Mutex::new(CellState::Pending),
      cv: Condvar::new(),
    }
  }

  /// Stores `value` and wakes the waiter. Returns `false` if the cell was
  /// already completed; the value is dropped in that case.
  pub fn complete(&self, value: T) -> bool {
    let mut state = self.state.lock();
    match *state {
      CellState::Pending => {
        *state = CellState::Complete(value);
        self.cv.notify_all();
        true
      }
      _ => false,
    }
  }

  /// Takes the value if one has been delivered, without blocking.
  pub fn try_take(&self) -> Option<T> {
    let mut state = self.state.lock();
    match std::mem::replace(&mut *state, CellState::Taken) {
      CellState::Complete(value) => Some(value),
      other => {
        *state = other;
        None
      }
    }
  }

  /// Blocks until the cell completes.
  pub fn wait(&self) -> Option<T> {
    let mut state = self.state.lock();
    loop {
      match std::mem::replace(&mut *state, CellState::Taken) {
        CellState::Complete(value) => return Some(value),
        CellState::Taken => return None,
        CellState::Pending => {
          *state = CellState::Pending;
        }
      }
      self.cv.wait(&mut state);
    }
  }

  /// Blocks until the cell completes or `deadline` passes, whichever comes
  /// first. Returns `None` on deadline expiry; the cell stays usable so a
  /// retry loop can wait again after re-enqueueing.
  pub fn wait_deadline(&self, deadline: Instant) -> Option<T> {
    let mut state = self.state.lock();
    loop {
      match std::mem::replace(&mut *state, CellState::Taken) {
        CellState::Complete(value) => return Some(value),
        CellState::Taken => {
          // Single-consumer discipline makes this unreachable in practice.
          return None;
        }
        CellState::Pending => {
          *state = CellState::Pending;
        }
      }
      if self.cv.wait_until(&mut state, deadline).timed_out() {
        return self.try_take_locked(&mut state);
      }
    }
  }

  fn try_take_locked(&self, state: &mut CellState<T>) -> Option<T> {
    match std::mem::replace(state, CellState::Taken) {
      CellState::Complete(value) => Some(value),
      other => {
        *state = other;
        None
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;
  use std::time::{Duration, Instant};

  #[test]
  fn first_completion_wins() {
    let cell = OneShotCell::new();
    assert!(cell.complete(1));
    assert!(!cell.complete(2));
    assert_eq!(cell.try_take(), Some(1));
    assert_eq!(cell.try_take(), None);
  }

  #[test]
  fn wait_times_out_without_value() {
    let cell: OneShotCell<u32> = OneShotCell::new();
    let started = Instant::now();
    let result = cell.wait_deadline(Instant::now() + Duration::from_millis(30));
    assert!(result.is_none());
    assert!(started.elapsed() >= Duration::from_millis(30));
  }

  #[test]
  fn wait_observes_completion_from_another_thread() {
    let cell = Arc::new(OneShotCell::new());
    let producer = Arc::clone(&cell);
    let handle = std::thread::spawn(move || {
      std::thread::sleep(Duration::from_millis(20));
      producer.complete("done");
    });
    let value = cell.wait_deadline(Instant::now() + Duration::from_secs(2));
    assert_eq!(value, Some("done"));
    handle.join().unwrap();
  }

  #[test]
  fn retry_style_waits_see_late_value() {
    let cell = Arc::new(OneShotCell::new());
    assert!(cell
      .wait_deadline(Instant::now() + Duration::from_millis(10))
      .is_none());
    cell.complete(7);
    assert_eq!(cell.wait_deadline(Instant::now()), Some(7));
  }
}
