// core/src/mailbox/inbox.rs

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::mailbox::pending::PendingQuestion;
use crate::message::{Answer, QuestionMessage};

pub(crate) type TellHandlerFn = dyn Fn(Option<String>) + Send + Sync;
pub(crate) type AnswerHandlerFn = dyn Fn(&QuestionMessage) -> Answer + Send + Sync;

/// Per-box inbound state: buffered tells, queued pending questions and the
/// at-most-one handler registries.
///
/// Buffers are unbounded FIFO queues keyed by content type; a message waits
/// there until a handler is registered or a `try_*_once`/`get_question`
/// call pulls it manually. The inbox never invokes handlers itself; it hands
/// them back to the caller so callbacks always run outside its locks.
pub(crate) struct Inbox {
  tells: Mutex<HashMap<String, VecDeque<Option<String>>>>,
  questions: Mutex<HashMap<String, VecDeque<PendingQuestion>>>,
  listen_handlers: Mutex<HashMap<String, Arc<TellHandlerFn>>>,
  answer_handlers: Mutex<HashMap<String, Arc<AnswerHandlerFn>>>,
}

impl Inbox {
  pub fn new() -> Self {
    Self {
      tells: Mutex::new(HashMap::new()),
      questions: Mutex::new(HashMap::new()),
      listen_handlers: Mutex::new(HashMap::new()),
      answer_handlers: Mutex::new(HashMap::new()),
    }
  }

  /// Buffers a tell's content; when a listen handler is registered for the
  /// content type, the oldest buffered entry is popped back out for
  /// immediate dispatch.
  pub fn store_tell(
    &self,
    content_type: &str,
    content: Option<String>,
  ) -> Option<(Arc<TellHandlerFn>, Option<String>)> {
    let handler = self.listen_handlers.lock().get(content_type).cloned();
    let mut tells = self.tells.lock();
    let queue = tells.entry(content_type.to_string()).or_default();
    queue.push_back(content);
    let handler = handler?;
    queue.pop_front().map(|popped| (handler, popped))
  }

  /// Queues a pending question, popping the oldest back out when an answer
  /// handler is registered for the content type.
  pub fn store_question(
    &self,
    pending: PendingQuestion,
  ) -> Option<(Arc<AnswerHandlerFn>, PendingQuestion)> {
    let content_type = pending.question().content_type.clone();
    let handler = self.answer_handlers.lock().get(&content_type).cloned();
    let mut questions = self.questions.lock();
    let queue = questions.entry(content_type).or_default();
    queue.push_back(pending);
    let handler = handler?;
    queue.pop_front().map(|popped| (handler, popped))
  }

  pub fn pop_tell(&self, content_type: &str) -> Option<Option<String>> {
    let mut tells = self.tells.lock();
    tells.get_mut(content_type).and_then(VecDeque::pop_front)
  }

  pub fn pop_question(&self, content_type: &str) -> Option<PendingQuestion> {
    let mut questions = self.questions.lock();
    questions.get_mut(content_type).and_then(VecDeque::pop_front)
  }

  /// Registers the listen handler for `content_type` and returns the backlog
  /// to drain through it, or `None` when one is already registered.
  pub fn register_listen(
    &self,
    content_type: &str,
    handler: Arc<TellHandlerFn>,
  ) -> Option<Vec<Option<String>>> {
    {
      let mut handlers = self.listen_handlers.lock();
      if handlers.contains_key(content_type) {
        return None;
      }
      handlers.insert(content_type.to_string(), handler);
    }
    tracing::debug!(content_type, "listen handler registered");
    let mut tells = self.tells.lock();
    let backlog = tells
      .get_mut(content_type)
      .map(|queue| queue.drain(..).collect())
      .unwrap_or_default();
    Some(backlog)
  }

  /// Registers the answer handler for `content_type` and returns the backlog
  /// of pending questions, or `None` when one is already registered.
  pub fn register_answer(
    &self,
    content_type: &str,
    handler: Arc<AnswerHandlerFn>,
  ) -> Option<Vec<PendingQuestion>> {
    {
      let mut handlers = self.answer_handlers.lock();
      if handlers.contains_key(content_type) {
        return None;
      }
      handlers.insert(content_type.to_string(), handler);
    }
    tracing::debug!(content_type, "answer handler registered");
    let mut questions = self.questions.lock();
    let backlog = questions
      .get_mut(content_type)
      .map(|queue| queue.drain(..).collect())
      .unwrap_or_default();
    Some(backlog)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn tells_buffer_until_handler_registered() {
    let inbox = Inbox::new();
    assert!(inbox.store_tell("greeting", Some("hi".into())).is_none());
    assert!(inbox.store_tell("greeting", Some("again".into())).is_none());

    let backlog = inbox
      .register_listen("greeting", Arc::new(|_| {}))
      .expect("first registration succeeds");
    assert_eq!(backlog, vec![Some("hi".to_string()), Some("again".to_string())]);

    // With the handler in place, new tells pop straight back out, oldest first.
    let (_, content) = inbox.store_tell("greeting", Some("now".into())).unwrap();
    assert_eq!(content, Some("now".to_string()));
  }

  #[test]
  fn second_registration_is_rejected() {
    let inbox = Inbox::new();
    assert!(inbox.register_listen("x", Arc::new(|_| {})).is_some());
    assert!(inbox.register_listen("x", Arc::new(|_| {})).is_none());
  }

  #[test]
  fn pop_tell_is_fifo() {
    let inbox = Inbox::new();
    inbox.store_tell("t", Some("1".into()));
    inbox.store_tell("t", Some("2".into()));
    assert_eq!(inbox.pop_tell("t"), Some(Some("1".to_string())));
    assert_eq!(inbox.pop_tell("t"), Some(Some("2".to_string())));
    assert_eq!(inbox.pop_tell("t"), None);
  }
}
