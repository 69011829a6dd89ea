// core/src/mailbox/message_box.rs

use parking_lot::Mutex;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;
use uuid::Uuid;

use crate::error::{MeshError, MeshResult};
use crate::mailbox::cache::{AnswerCache, QuestionSeen};
use crate::mailbox::inbox::{AnswerHandlerFn, Inbox, TellHandlerFn};
use crate::mailbox::pending::{AnswerHandle, PendingAnswers, PendingQuestion};
use crate::mailbox::worker::{self, OutboundMessage, OutboundQueue};
use crate::message::{codec, Answer, AnswerMessage, MessageType, QuestionMessage, TellMessage};
use crate::options::{RequestOptions, ANSWER_CACHE_TTL, DEFAULT_OUTBOUND_CAPACITY};
use crate::runtime::{CallbackRegistry, CancelToken, Subscription};

pub(crate) type PanicHookFn = dyn Fn(&str, Box<dyn Any + Send>) + Send + Sync;

/// State shared between a [`MessageBox`], its worker thread and the node's
/// router thread.
pub(crate) struct BoxShared {
  name: String,
  outbound: OutboundQueue,
  pending_answers: Arc<PendingAnswers>,
  inbox: Inbox,
  cache: AnswerCache,
  tell_observers: Arc<CallbackRegistry>,
  question_observers: Arc<CallbackRegistry>,
  panic_hook: Mutex<Option<Arc<PanicHookFn>>>,
}

impl BoxShared {
  fn new(name: &str) -> Arc<Self> {
    Arc::new(Self {
      name: name.to_string(),
      outbound: OutboundQueue::new(DEFAULT_OUTBOUND_CAPACITY),
      pending_answers: PendingAnswers::new(),
      inbox: Inbox::new(),
      cache: AnswerCache::new(ANSWER_CACHE_TTL),
      tell_observers: CallbackRegistry::new(),
      question_observers: CallbackRegistry::new(),
      panic_hook: Mutex::new(None),
    })
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn outbound(&self) -> &OutboundQueue {
    &self.outbound
  }

  pub fn pending_answers(&self) -> &Arc<PendingAnswers> {
    &self.pending_answers
  }

  /// Resolves the matching pending answer, if any; unknown correlation ids
  /// (completed, cancelled or foreign) are discarded.
  pub fn handle_answer(&self, message: AnswerMessage) {
    let answer = Answer {
      content_type: message.content_type,
      content: message.content,
    };
    if !self.pending_answers.resolve(&message.correlation_id, answer) {
      tracing::trace!(
        box_name = %self.name,
        correlation_id = %message.correlation_id,
        "discarding answer with no pending entry"
      );
    }
  }

  fn accept_tell(&self, message: TellMessage) {
    let content_type = message.content_type;
    if let Some((handler, content)) = self.inbox.store_tell(&content_type, message.content) {
      self.invoke_tell_handler(&content_type, &handler, content);
    }
    self.tell_observers.notify(&content_type);
  }

  fn accept_question(&self, pending: PendingQuestion) {
    let content_type = pending.question().content_type.clone();
    let correlation_id = pending.question().correlation_id.clone();
    match self.cache.observe(&correlation_id) {
      QuestionSeen::Cached(answer) => {
        tracing::debug!(
          box_name = %self.name,
          correlation_id = %correlation_id,
          "serving question retry from the answer cache"
        );
        pending.answer(answer);
        return;
      }
      QuestionSeen::InFlight => {
        tracing::trace!(
          box_name = %self.name,
          correlation_id = %correlation_id,
          "dropping retry of an in-flight question"
        );
        return;
      }
      QuestionSeen::First => {}
    }
    if let Some((handler, popped)) = self.inbox.store_question(pending) {
      self.invoke_answer_handler(&content_type, &handler, popped);
    }
    self.question_observers.notify(&content_type);
  }

  fn invoke_tell_handler(&self, content_type: &str, handler: &Arc<TellHandlerFn>, content: Option<String>) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| handler(content))) {
      self.handle_panic(content_type, payload);
    }
  }

  fn invoke_answer_handler(
    &self,
    content_type: &str,
    handler: &Arc<AnswerHandlerFn>,
    pending: PendingQuestion,
  ) {
    match catch_unwind(AssertUnwindSafe(|| handler(pending.question()))) {
      Ok(answer) => {
        self.cache.store(&pending.question().correlation_id, answer.clone());
        pending.answer(answer);
      }
      Err(payload) => {
        // The question is dropped unanswered; the asking side sees its
        // configured timeout and this box keeps serving.
        self.handle_panic(content_type, payload);
      }
    }
  }

  fn handle_panic(&self, content_type: &str, payload: Box<dyn Any + Send>) {
    let hook = self.panic_hook.lock().clone();
    match hook {
      Some(hook) => hook(content_type, payload),
      None => tracing::error!(
        box_name = %self.name,
        content_type,
        panic = panic_message(payload.as_ref()),
        "handler panicked; message dropped"
      ),
    }
  }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
  if let Some(message) = payload.downcast_ref::<&'static str>() {
    message
  } else if let Some(message) = payload.downcast_ref::<String>() {
    message
  } else {
    "<non-string panic payload>"
  }
}

/// A named endpoint within a node that sends and receives mesh messages.
///
/// Each box owns a DEALER socket with a random routing identity and one
/// background worker thread; all socket I/O happens on that thread. Boxes
/// are created through [`Node::at`](crate::node::Node::at) and shared as
/// `Arc<MessageBox>`.
pub struct MessageBox {
  name: String,
  endpoint: String,
  shared: Arc<BoxShared>,
  worker: Mutex<Option<JoinHandle<()>>>,
}

impl MessageBox {
  pub(crate) fn new(name: &str, address: &str, context: &zmq::Context) -> MeshResult<Arc<Self>> {
    let socket = context.socket(zmq::DEALER)?;
    let identity = Uuid::new_v4().to_string();
    // Identity must be in place before connect so the peer router sees it
    // on the very first frame.
    socket.set_identity(identity.as_bytes())?;
    socket.set_linger(0)?;
    let endpoint = format!("tcp://{address}");
    socket.connect(&endpoint)?;
    tracing::debug!(box_name = name, %endpoint, %identity, "message box connected");

    let shared = BoxShared::new(name);
    let worker_shared = Arc::clone(&shared);
    let worker = std::thread::Builder::new()
      .name(format!("zmesh-box-{name}"))
      .spawn(move || worker::run(socket, worker_shared))
      .map_err(|e| MeshError::Internal(format!("failed to spawn worker thread: {e}")))?;

    Ok(Arc::new(Self {
      name: name.to_string(),
      endpoint,
      shared,
      worker: Mutex::new(Some(worker)),
    }))
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn endpoint(&self) -> &str {
    &self.endpoint
  }

  /// Enqueues a one-way notification and returns once it is queued.
  pub fn tell(&self, content_type: &str, content: Option<&str>) -> MeshResult<()> {
    require_content_type(content_type)?;
    let message = TellMessage {
      message_type: MessageType::Tell,
      content_type: content_type.to_string(),
      content: content.map(str::to_string),
      message_box_name: self.name.clone(),
    };
    let payload = codec::encode_tell(&message)?;
    self.shared.outbound.push(OutboundMessage {
      kind: MessageType::Tell,
      payload,
    })
  }

  /// Sends a question and blocks for the answer with default options
  /// (3 s timeout, 3 attempts).
  pub fn ask(&self, content_type: &str, content: Option<&str>) -> MeshResult<Answer> {
    self.ask_inner(content_type, content, None, RequestOptions::default(), None)
  }

  /// Sends a question and blocks for the answer, subject to `options`.
  pub fn ask_with(
    &self,
    content_type: &str,
    content: Option<&str>,
    options: RequestOptions,
  ) -> MeshResult<Answer> {
    self.ask_inner(content_type, content, None, options, None)
  }

  /// Like [`ask_with`](Self::ask_with), carrying a hint for the content
  /// type the caller expects back. The answering handler stays
  /// authoritative and may ignore the hint.
  pub fn ask_expecting(
    &self,
    content_type: &str,
    content: Option<&str>,
    answer_content_type: &str,
    options: RequestOptions,
  ) -> MeshResult<Answer> {
    self.ask_inner(content_type, content, Some(answer_content_type), options, None)
  }

  /// Like [`ask_with`](Self::ask_with) but returns promptly with
  /// [`MeshError::Cancelled`] once `token` is cancelled. Cancelling before
  /// the call emits nothing on the wire.
  pub fn ask_cancellable(
    &self,
    content_type: &str,
    content: Option<&str>,
    options: RequestOptions,
    token: &CancelToken,
  ) -> MeshResult<Answer> {
    self.ask_inner(content_type, content, None, options, Some(token))
  }

  /// Registers the question once, without retries, and returns a handle the
  /// caller can wait on later. Dropping the handle abandons the question.
  pub fn ask_deferred(&self, content_type: &str, content: Option<&str>) -> MeshResult<AnswerHandle> {
    require_content_type(content_type)?;
    let question = self.build_question(content_type, content, None);
    let payload = codec::encode_question(&question)?;
    let cell = self.shared.pending_answers.register(&question.correlation_id);
    if let Err(e) = self.shared.outbound.push(OutboundMessage {
      kind: MessageType::Question,
      payload,
    }) {
      self.shared.pending_answers.remove(&question.correlation_id);
      return Err(e);
    }
    Ok(AnswerHandle::new(
      question.correlation_id,
      cell,
      Arc::downgrade(&self.shared.pending_answers),
    ))
  }

  fn ask_inner(
    &self,
    content_type: &str,
    content: Option<&str>,
    answer_content_type: Option<&str>,
    options: RequestOptions,
    cancel: Option<&CancelToken>,
  ) -> MeshResult<Answer> {
    require_content_type(content_type)?;
    options.validate()?;
    if let Some(token) = cancel {
      if token.is_cancelled() {
        return Err(MeshError::Cancelled);
      }
    }

    let question = self.build_question(content_type, content, answer_content_type);
    let payload = codec::encode_question(&question)?;
    let correlation_id = question.correlation_id;
    let cell = self.shared.pending_answers.register(&correlation_id);

    // The guard deregisters the hook again on every exit from this call, so
    // a token reused across many asks does not collect stale closures.
    let _cancel_registration = cancel.map(|token| {
      let table = Arc::downgrade(&self.shared.pending_answers);
      let hook_cell = Arc::clone(&cell);
      let hook_id = correlation_id.clone();
      token.on_cancel(Box::new(move || {
        if let Some(table) = table.upgrade() {
          table.remove(&hook_id);
        }
        hook_cell.complete(Err(MeshError::Cancelled));
      }))
    });

    let started = Instant::now();
    for attempt in 1..=options.max_retries {
      if let Err(e) = self.shared.outbound.push(OutboundMessage {
        kind: MessageType::Question,
        payload: payload.clone(),
      }) {
        self.shared.pending_answers.remove(&correlation_id);
        return Err(e);
      }
      let deadline = Instant::now() + options.timeout;
      if let Some(result) = cell.wait_deadline(deadline) {
        self.shared.pending_answers.remove(&correlation_id);
        return result;
      }
      tracing::debug!(
        box_name = %self.name,
        content_type,
        %correlation_id,
        attempt,
        "no answer within timeout, retrying"
      );
    }
    self.shared.pending_answers.remove(&correlation_id);
    Err(MeshError::RequestTimeout {
      attempts: options.max_retries,
      elapsed: started.elapsed(),
    })
  }

  fn build_question(
    &self,
    content_type: &str,
    content: Option<&str>,
    answer_content_type: Option<&str>,
  ) -> QuestionMessage {
    QuestionMessage {
      message_type: MessageType::Question,
      content_type: content_type.to_string(),
      content: content.map(str::to_string),
      message_box_name: self.name.clone(),
      correlation_id: Uuid::new_v4().simple().to_string(),
      answer_content_type: answer_content_type.map(str::to_string),
    }
  }

  /// Registers the persistent listen handler for `content_type`, draining
  /// any already-buffered tells through it. At most one handler per content
  /// type; returns `false` without replacing if one is already registered.
  pub fn try_listen(
    &self,
    content_type: &str,
    handler: impl Fn(Option<String>) + Send + Sync + 'static,
  ) -> bool {
    let handler: Arc<TellHandlerFn> = Arc::new(handler);
    let backlog = match self.shared.inbox.register_listen(content_type, Arc::clone(&handler)) {
      Some(backlog) => backlog,
      None => return false,
    };
    for content in backlog {
      self.shared.invoke_tell_handler(content_type, &handler, content);
    }
    true
  }

  /// Pops exactly one buffered tell of `content_type` and runs `handler` on
  /// the calling thread. Returns `true` iff a message was available.
  pub fn try_listen_once(&self, content_type: &str, handler: impl FnOnce(Option<String>)) -> bool {
    match self.shared.inbox.pop_tell(content_type) {
      Some(content) => {
        handler(content);
        true
      }
      None => false,
    }
  }

  /// Registers the persistent answer handler for `content_type`, draining
  /// queued questions through it. At most one handler per content type;
  /// returns `false` without replacing if one is already registered.
  pub fn try_answer(
    &self,
    content_type: &str,
    handler: impl Fn(&QuestionMessage) -> Answer + Send + Sync + 'static,
  ) -> bool {
    let handler: Arc<AnswerHandlerFn> = Arc::new(handler);
    let backlog = match self.shared.inbox.register_answer(content_type, Arc::clone(&handler)) {
      Some(backlog) => backlog,
      None => return false,
    };
    for pending in backlog {
      self.shared.invoke_answer_handler(content_type, &handler, pending);
    }
    true
  }

  /// Pops exactly one queued question of `content_type`, produces its answer
  /// on the calling thread and routes it back. Returns `true` iff a question
  /// was available.
  pub fn try_answer_once(
    &self,
    content_type: &str,
    handler: impl FnOnce(&QuestionMessage) -> Answer,
  ) -> bool {
    let pending = match self.shared.inbox.pop_question(content_type) {
      Some(pending) => pending,
      None => return false,
    };
    let answer = handler(pending.question());
    self
      .shared
      .cache
      .store(&pending.question().correlation_id, answer.clone());
    pending.answer(answer);
    true
  }

  /// Pops one queued question of `content_type` for manual handling.
  pub fn get_question(&self, content_type: &str) -> Option<PendingQuestion> {
    self.shared.inbox.pop_question(content_type)
  }

  /// Adds an observer invoked with the content type of every arriving tell.
  /// Observers must not consume the message; dropping the returned
  /// subscription removes the callback.
  pub fn on_tell_received(&self, callback: impl Fn(&str) + Send + Sync + 'static) -> Subscription {
    self.shared.tell_observers.add(Arc::new(callback))
  }

  /// Adds an observer invoked with the content type of every newly accepted
  /// question (retries served from the cache do not notify).
  pub fn on_question_received(&self, callback: impl Fn(&str) + Send + Sync + 'static) -> Subscription {
    self.shared.question_observers.add(Arc::new(callback))
  }

  /// Installs the hook receiving payloads of panics caught in handler
  /// invocations. Without a hook, panics are logged and the box continues.
  pub fn set_panic_hook(&self, hook: impl Fn(&str, Box<dyn Any + Send>) + Send + Sync + 'static) {
    *self.shared.panic_hook.lock() = Some(Arc::new(hook));
  }

  /// Stops the worker, closes the socket and fails every outstanding `ask`
  /// with [`MeshError::Shutdown`]. Idempotent; also runs on drop.
  pub fn shutdown(&self) {
    self.shared.outbound.stop();
    let worker = self.worker.lock().take();
    if let Some(worker) = worker {
      if worker.join().is_err() {
        tracing::error!(box_name = %self.name, "worker thread panicked");
        // The worker could not run its own cleanup.
        self.shared.pending_answers.fail_all(MeshError::Shutdown);
      }
    }
  }

  // --- Router-side intake ---

  pub(crate) fn accept_tell(&self, message: TellMessage) {
    self.shared.accept_tell(message);
  }

  pub(crate) fn accept_question(&self, pending: PendingQuestion) {
    self.shared.accept_question(pending);
  }

  pub(crate) fn handle_answer(&self, message: AnswerMessage) {
    self.shared.handle_answer(message);
  }
}

impl Drop for MessageBox {
  fn drop(&mut self) {
    self.shutdown();
  }
}

impl std::fmt::Debug for MessageBox {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("MessageBox")
      .field("name", &self.name)
      .field("endpoint", &self.endpoint)
      .finish()
  }
}

fn require_content_type(content_type: &str) -> MeshResult<()> {
  if content_type.is_empty() {
    return Err(MeshError::invalid_argument("content_type must not be empty"));
  }
  Ok(())
}
