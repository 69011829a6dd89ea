// core/src/mailbox/pending.rs

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use crate::error::{MeshError, MeshResult};
use crate::message::{Answer, AnswerMessage, Blob, MessageType, QuestionMessage};
use crate::node::AnswerQueue;
use crate::runtime::OneShotCell;

pub(crate) type AnswerCell = OneShotCell<MeshResult<Answer>>;

/// Client-side table of in-flight questions: correlation id to the one-shot
/// completion the asking caller blocks on.
///
/// An entry exists exactly while an `ask` is awaiting; it is removed on
/// completion, timeout, cancellation and shutdown. Whichever of those fires
/// first wins the cell; the rest are silent no-ops.
pub(crate) struct PendingAnswers {
  slots: Mutex<HashMap<String, Arc<AnswerCell>>>,
}

impl PendingAnswers {
  pub fn new() -> Arc<Self> {
    Arc::new(Self {
      slots: Mutex::new(HashMap::new()),
    })
  }

  pub fn register(&self, correlation_id: &str) -> Arc<AnswerCell> {
    let cell = Arc::new(OneShotCell::new());
    self
      .slots
      .lock()
      .insert(correlation_id.to_string(), Arc::clone(&cell));
    cell
  }

  /// Completes and removes the entry for `correlation_id`. Returns `false`
  /// when no entry exists (already completed, cancelled or never known);
  /// such answers are discarded by the caller.
  pub fn resolve(&self, correlation_id: &str, answer: Answer) -> bool {
    let cell = self.slots.lock().remove(correlation_id);
    match cell {
      Some(cell) => {
        cell.complete(Ok(answer));
        true
      }
      None => false,
    }
  }

  pub fn remove(&self, correlation_id: &str) {
    self.slots.lock().remove(correlation_id);
  }

  /// Fails every outstanding entry; used on worker shutdown.
  pub fn fail_all(&self, error: MeshError) {
    let cells: Vec<Arc<AnswerCell>> = self.slots.lock().drain().map(|(_, cell)| cell).collect();
    if !cells.is_empty() {
      tracing::debug!(count = cells.len(), "failing outstanding pending answers");
    }
    for cell in cells {
      cell.complete(Err(error.clone()));
    }
  }

  pub fn is_empty(&self) -> bool {
    self.slots.lock().is_empty()
  }
}

/// Handle returned by `ask_deferred`: the caller waits on it at its leisure.
///
/// Dropping the handle abandons the pending entry; a late answer for its
/// correlation id is then discarded like any other unknown answer.
#[must_use = "dropping the handle abandons the pending question"]
pub struct AnswerHandle {
  correlation_id: String,
  cell: Arc<AnswerCell>,
  table: Weak<PendingAnswers>,
  asked_at: Instant,
}

impl AnswerHandle {
  pub(crate) fn new(correlation_id: String, cell: Arc<AnswerCell>, table: Weak<PendingAnswers>) -> Self {
    Self {
      correlation_id,
      cell,
      table,
      asked_at: Instant::now(),
    }
  }

  pub fn correlation_id(&self) -> &str {
    &self.correlation_id
  }

  /// Blocks until the answer arrives or the box shuts down.
  pub fn wait(self) -> MeshResult<Answer> {
    match self.cell.wait() {
      Some(result) => result,
      None => Err(MeshError::Shutdown),
    }
  }

  /// Blocks up to `timeout`. Expiry consumes the handle and abandons the
  /// question.
  pub fn wait_timeout(self, timeout: Duration) -> MeshResult<Answer> {
    match self.cell.wait_deadline(Instant::now() + timeout) {
      Some(result) => result,
      None => Err(MeshError::RequestTimeout {
        attempts: 1,
        elapsed: self.asked_at.elapsed(),
      }),
    }
  }
}

impl Drop for AnswerHandle {
  fn drop(&mut self) {
    if let Some(table) = self.table.upgrade() {
      table.remove(&self.correlation_id);
    }
  }
}

/// One-shot conduit carrying an answer back along the originating route.
///
/// Holds only a weak reference to the node's answer queue, so answering a
/// question that outlived its node is a logged no-op rather than a hang or
/// a panic.
pub(crate) struct AnswerSink {
  queue: Weak<AnswerQueue>,
  delivered: AtomicBool,
}

impl AnswerSink {
  pub fn new(queue: &Arc<AnswerQueue>) -> Self {
    Self {
      queue: Arc::downgrade(queue),
      delivered: AtomicBool::new(false),
    }
  }

  fn deliver(&self, identity: Blob, message: AnswerMessage) -> bool {
    if self.delivered.swap(true, Ordering::AcqRel) {
      tracing::trace!(
        correlation_id = %message.correlation_id,
        "duplicate answer delivery suppressed"
      );
      return false;
    }
    match self.queue.upgrade() {
      Some(queue) => {
        queue.push(identity, message);
        true
      }
      None => {
        tracing::warn!(
          correlation_id = %message.correlation_id,
          "answer dropped: routing node no longer exists"
        );
        false
      }
    }
  }
}

/// A received question awaiting its reply.
///
/// Produced by the router when a `Question` frame arrives and consumed by an
/// answer handler, `try_answer_once` or `get_question`. [`answer`] delivers
/// at most once; later calls are dropped.
///
/// [`answer`]: PendingQuestion::answer
pub struct PendingQuestion {
  question: QuestionMessage,
  origin_identity: Blob,
  sink: AnswerSink,
}

impl PendingQuestion {
  pub(crate) fn new(question: QuestionMessage, origin_identity: Blob, sink: AnswerSink) -> Self {
    Self {
      question,
      origin_identity,
      sink,
    }
  }

  pub fn question(&self) -> &QuestionMessage {
    &self.question
  }

  /// The question's content, if any.
  pub fn content(&self) -> Option<&str> {
    self.question.content.as_deref()
  }

  /// Sends `answer` back to the asking box. Returns `false` if the question
  /// was already answered or the node has gone away.
  pub fn answer(&self, answer: Answer) -> bool {
    let message = AnswerMessage {
      message_type: MessageType::Answer,
      content_type: answer.content_type,
      content: answer.content,
      message_box_name: self.question.message_box_name.clone(),
      correlation_id: self.question.correlation_id.clone(),
    };
    self.sink.deliver(self.origin_identity.clone(), message)
  }
}

impl std::fmt::Debug for PendingQuestion {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("PendingQuestion")
      .field("content_type", &self.question.content_type)
      .field("correlation_id", &self.question.correlation_id)
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn resolve_completes_and_removes() {
    let table = PendingAnswers::new();
    let cell = table.register("c1");
    assert!(table.resolve("c1", Answer::new("int", "42")));
    assert!(table.is_empty());
    assert_eq!(cell.try_take().unwrap().unwrap().content_str(), Some("42"));
  }

  #[test]
  fn unknown_correlation_is_discarded() {
    let table = PendingAnswers::new();
    assert!(!table.resolve("nope", Answer::new("int", "0")));
  }

  #[test]
  fn fail_all_delivers_error() {
    let table = PendingAnswers::new();
    let cell = table.register("c1");
    table.fail_all(MeshError::Shutdown);
    assert!(matches!(cell.try_take(), Some(Err(MeshError::Shutdown))));
    assert!(table.is_empty());
  }

  #[test]
  fn sink_delivers_once() {
    let queue = AnswerQueue::new();
    let sink = AnswerSink::new(&queue);
    let question = QuestionMessage {
      message_type: MessageType::Question,
      content_type: "sum".into(),
      content: Some("1".into()),
      message_box_name: "calc".into(),
      correlation_id: "c1".into(),
      answer_content_type: None,
    };
    let pending = PendingQuestion::new(question, Blob::from(b"id".to_vec()), sink);
    assert!(pending.answer(Answer::new("int", "1")));
    assert!(!pending.answer(Answer::new("int", "2")));
    assert_eq!(queue.drain().len(), 1);
  }

  #[test]
  fn sink_is_noop_after_queue_drop() {
    let queue = AnswerQueue::new();
    let sink = AnswerSink::new(&queue);
    drop(queue);
    let question = QuestionMessage {
      message_type: MessageType::Question,
      content_type: "sum".into(),
      content: None,
      message_box_name: "calc".into(),
      correlation_id: "c2".into(),
      answer_content_type: None,
    };
    let pending = PendingQuestion::new(question, Blob::new(), sink);
    assert!(!pending.answer(Answer::without_content("void")));
  }
}
