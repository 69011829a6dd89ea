// core/src/runtime/subscription.rs

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

pub(crate) type ObserverFn = dyn Fn(&str) + Send + Sync;

/// Ordered list of observer callbacks, keyed by a monotonically increasing
/// generation id so a stale [`Subscription`] can never remove somebody
/// else's entry.
pub(crate) struct CallbackRegistry {
  entries: Mutex<Vec<(u64, Arc<ObserverFn>)>>,
  next_id: AtomicU64,
}

impl CallbackRegistry {
  pub fn new() -> Arc<Self> {
    Arc::new(Self {
      entries: Mutex::new(Vec::new()),
      next_id: AtomicU64::new(1),
    })
  }

  pub fn add(self: &Arc<Self>, callback: Arc<ObserverFn>) -> Subscription {
    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
    self.entries.lock().push((id, callback));
    tracing::trace!(subscription_id = id, "observer registered");
    Subscription {
      registry: Arc::downgrade(self),
      id,
    }
  }

  /// Invokes every observer with `content_type`, in registration order.
  /// Callbacks run outside the registry lock.
  pub fn notify(&self, content_type: &str) {
    let callbacks: Vec<Arc<ObserverFn>> = {
      let entries = self.entries.lock();
      entries.iter().map(|(_, cb)| Arc::clone(cb)).collect()
    };
    for callback in callbacks {
      callback(content_type);
    }
  }

  fn remove(&self, id: u64) {
    let mut entries = self.entries.lock();
    if let Some(position) = entries.iter().position(|(entry_id, _)| *entry_id == id) {
      entries.remove(position);
      tracing::trace!(subscription_id = id, "observer removed");
    }
  }

  #[cfg(test)]
  pub fn len(&self) -> usize {
    self.entries.lock().len()
  }
}

/// Handle returned by `on_tell_received` / `on_question_received`.
///
/// Dropping the handle unsubscribes the callback. The handle holds only a
/// weak reference to the registry, so dropping it after the owning box has
/// been destroyed is a harmless no-op.
#[must_use = "dropping the subscription immediately unsubscribes the callback"]
pub struct Subscription {
  registry: Weak<CallbackRegistry>,
  id: u64,
}

impl Drop for Subscription {
  fn drop(&mut self) {
    if let Some(registry) = self.registry.upgrade() {
      registry.remove(self.id);
    }
  }
}

impl std::fmt::Debug for Subscription {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Subscription").field("id", &self.id).finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::AtomicUsize;

  #[test]
  fn notify_runs_observers_in_order() {
    let registry = CallbackRegistry::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let first = Arc::clone(&seen);
    let second = Arc::clone(&seen);
    let _a = registry.add(Arc::new(move |ct: &str| first.lock().push(format!("a:{ct}"))));
    let _b = registry.add(Arc::new(move |ct: &str| second.lock().push(format!("b:{ct}"))));
    registry.notify("greeting");
    assert_eq!(*seen.lock(), vec!["a:greeting".to_string(), "b:greeting".to_string()]);
  }

  #[test]
  fn drop_unsubscribes() {
    let registry = CallbackRegistry::new();
    let count = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&count);
    let sub = registry.add(Arc::new(move |_: &str| {
      counter.fetch_add(1, Ordering::SeqCst);
    }));
    registry.notify("x");
    drop(sub);
    registry.notify("x");
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(registry.len(), 0);
  }

  #[test]
  fn drop_after_registry_gone_is_noop() {
    let registry = CallbackRegistry::new();
    let sub = registry.add(Arc::new(|_: &str| {}));
    drop(registry);
    drop(sub); // must not panic
  }
}
