// core/src/runtime/cancel.rs

use parking_lot::Mutex;
use std::sync::{Arc, Weak};

type CancelHook = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct CancelState {
  cancelled: bool,
  next_id: u64,
  hooks: Vec<(u64, CancelHook)>,
}

/// Cooperative cancellation token for `ask` calls.
///
/// Cloning produces another handle to the same token. `cancel()` is
/// idempotent: the first call flips the flag and fires every registered hook
/// exactly once; hooks registered afterwards fire immediately. Each
/// registration is owned by a [`CancelRegistration`] guard whose drop removes
/// the hook again, so a token reused across many sequential calls does not
/// accumulate stale closures. Cancellation races safely with answer delivery
/// because both funnel into the same one-shot completion slot, where the
/// first writer wins.
#[derive(Clone, Default)]
pub struct CancelToken {
  inner: Arc<Mutex<CancelState>>,
}

impl CancelToken {
  pub fn new() -> Self {
    Self::default()
  }

  /// Signals cancellation and runs all registered hooks.
  pub fn cancel(&self) {
    let hooks = {
      let mut state = self.inner.lock();
      if state.cancelled {
        return;
      }
      state.cancelled = true;
      std::mem::take(&mut state.hooks)
    };
    // Hooks run outside the lock; they complete pending answers and must not
    // re-enter this token.
    for (_, hook) in hooks {
      hook();
    }
  }

  pub fn is_cancelled(&self) -> bool {
    self.inner.lock().cancelled
  }

  /// Registers a hook to run on cancellation and returns the guard that
  /// keeps it registered. If the token is already cancelled the hook runs on
  /// the calling thread before this returns, and the guard is inert.
  pub(crate) fn on_cancel(&self, hook: CancelHook) -> CancelRegistration {
    {
      let mut state = self.inner.lock();
      if !state.cancelled {
        let id = state.next_id;
        state.next_id += 1;
        state.hooks.push((id, hook));
        return CancelRegistration {
          state: Arc::downgrade(&self.inner),
          id,
        };
      }
    }
    hook();
    CancelRegistration {
      state: Weak::new(),
      id: 0,
    }
  }
}

/// Owns one hook registration on a [`CancelToken`]; dropping it removes the
/// hook if cancellation has not already consumed it. Holds only a weak
/// reference, so outliving the token is harmless.
#[must_use = "dropping the registration immediately removes the cancel hook"]
pub(crate) struct CancelRegistration {
  state: Weak<Mutex<CancelState>>,
  id: u64,
}

impl Drop for CancelRegistration {
  fn drop(&mut self) {
    if let Some(state) = self.state.upgrade() {
      let mut state = state.lock();
      if let Some(position) = state.hooks.iter().position(|(id, _)| *id == self.id) {
        state.hooks.remove(position);
      }
    }
  }
}
