// core/src/node/answer_queue.rs

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::message::{AnswerMessage, Blob};

/// FIFO of `(origin_identity, answer)` pairs awaiting the router's flush.
///
/// Answer sinks push from whatever thread ran the handler; only the router
/// thread drains, so emission order matches enqueue order.
pub(crate) struct AnswerQueue {
  items: Mutex<VecDeque<(Blob, AnswerMessage)>>,
}

impl AnswerQueue {
  pub fn new() -> Arc<Self> {
    Arc::new(Self {
      items: Mutex::new(VecDeque::new()),
    })
  }

  pub fn push(&self, identity: Blob, message: AnswerMessage) {
    self.items.lock().push_back((identity, message));
  }

  pub fn drain(&self) -> Vec<(Blob, AnswerMessage)> {
    self.items.lock().drain(..).collect()
  }

  /// Puts undelivered answers back at the head, preserving order.
  pub fn requeue_front(&self, items: Vec<(Blob, AnswerMessage)>) {
    let mut queue = self.items.lock();
    for item in items.into_iter().rev() {
      queue.push_front(item);
    }
  }
}
