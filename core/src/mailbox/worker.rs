// core/src/mailbox/worker.rs

//! The per-box worker thread.
//!
//! The worker is the only thread that ever touches the box's DEALER socket.
//! Each cycle it waits briefly for outbound work, flushes the queue as
//! `[type_string, payload]` frame pairs, then drains whatever replies the
//! socket has buffered. Stop is cooperative: the queue's stop flag wakes the
//! condvar wait, the worker performs one final flush-and-drain, and every
//! outstanding pending answer is failed with `Shutdown`.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{MeshError, MeshResult};
use crate::mailbox::message_box::BoxShared;
use crate::message::{codec, MessageType};
use crate::options::POLL_INTERVAL;

/// Marker returned by I/O helpers when the ZeroMQ context has terminated and
/// the owning loop should exit without further socket use.
pub(crate) struct Terminated;

/// A tell or question queued for the worker to put on the wire.
pub(crate) struct OutboundMessage {
  pub kind: MessageType,
  pub payload: Vec<u8>,
}

struct OutboundState {
  items: VecDeque<OutboundMessage>,
  stopped: bool,
}

/// Bounded outbound FIFO shared between callers and the worker.
pub(crate) struct OutboundQueue {
  state: Mutex<OutboundState>,
  cv: Condvar,
  capacity: usize,
}

impl OutboundQueue {
  pub fn new(capacity: usize) -> Self {
    Self {
      state: Mutex::new(OutboundState {
        items: VecDeque::new(),
        stopped: false,
      }),
      cv: Condvar::new(),
      capacity,
    }
  }

  /// Enqueues and wakes the worker. Fails with `Shutdown` once stopped and
  /// with `Busy` at capacity.
  pub fn push(&self, message: OutboundMessage) -> MeshResult<()> {
    let mut state = self.state.lock();
    if state.stopped {
      return Err(MeshError::Shutdown);
    }
    if state.items.len() >= self.capacity {
      return Err(MeshError::Busy);
    }
    state.items.push_back(message);
    self.cv.notify_one();
    Ok(())
  }

  /// Puts already-accepted messages back at the head of the queue, keeping
  /// their order. Used after a transient send failure; the capacity check
  /// does not apply because these were admitted once.
  pub fn requeue_front(&self, items: Vec<OutboundMessage>) {
    let mut state = self.state.lock();
    for item in items.into_iter().rev() {
      state.items.push_front(item);
    }
  }

  /// Waits up to `timeout` for work or a stop signal, then drains the queue.
  /// Returns the drained batch and whether stop has been requested.
  pub fn wait_drain(&self, timeout: Duration) -> (Vec<OutboundMessage>, bool) {
    let mut state = self.state.lock();
    if state.items.is_empty() && !state.stopped {
      self.cv.wait_for(&mut state, timeout);
    }
    (state.items.drain(..).collect(), state.stopped)
  }

  pub fn drain_remaining(&self) -> Vec<OutboundMessage> {
    self.state.lock().items.drain(..).collect()
  }

  pub fn stop(&self) {
    let mut state = self.state.lock();
    state.stopped = true;
    self.cv.notify_all();
  }
}

pub(crate) fn run(socket: zmq::Socket, shared: Arc<BoxShared>) {
  tracing::debug!(box_name = %shared.name(), "message box worker started");
  let mut terminated = false;
  loop {
    let (batch, stopped) = shared.outbound().wait_drain(POLL_INTERVAL);
    let mut blocked = false;
    match send_outbound(&socket, &shared, batch) {
      Ok(sent_all) => blocked = !sent_all,
      Err(Terminated) => terminated = true,
    }
    if !terminated && drain_incoming(&socket, &shared).is_err() {
      terminated = true;
    }
    if stopped || terminated {
      break;
    }
    if blocked {
      // The transport is at its high-water mark; back off instead of
      // spinning on the requeued batch.
      std::thread::sleep(Duration::from_millis(10));
    }
  }
  if !terminated {
    let _ = send_outbound(&socket, &shared, shared.outbound().drain_remaining());
    let _ = drain_incoming(&socket, &shared);
  }
  shared.pending_answers().fail_all(MeshError::Shutdown);
  tracing::debug!(box_name = %shared.name(), "message box worker stopped");
  // Socket drops here, on the only thread that ever used it.
}

/// Returns `Ok(true)` when the whole batch went out, `Ok(false)` when part
/// of it was requeued behind a full transport buffer.
fn send_outbound(
  socket: &zmq::Socket,
  shared: &Arc<BoxShared>,
  batch: Vec<OutboundMessage>,
) -> Result<bool, Terminated> {
  let mut iter = batch.into_iter();
  while let Some(message) = iter.next() {
    match socket.send(message.kind.as_str(), zmq::SNDMORE | zmq::DONTWAIT) {
      Ok(()) => {}
      Err(zmq::Error::EAGAIN) | Err(zmq::Error::EINTR) => {
        // HWM or interrupt; retry this message and the rest next cycle.
        let mut rest = vec![message];
        rest.extend(iter);
        shared.outbound().requeue_front(rest);
        return Ok(false);
      }
      Err(zmq::Error::ETERM) => return Err(Terminated),
      Err(e) => {
        tracing::warn!(box_name = %shared.name(), error = %e, "dropping outbound message");
        continue;
      }
    }
    // The first part was accepted, so the message slot is reserved and the
    // payload part cannot hit the HWM.
    match socket.send(message.payload, 0) {
      Ok(()) => {}
      Err(zmq::Error::ETERM) => return Err(Terminated),
      Err(e) => {
        tracing::warn!(box_name = %shared.name(), error = %e, "payload frame send failed");
      }
    }
  }
  Ok(true)
}

fn drain_incoming(socket: &zmq::Socket, shared: &Arc<BoxShared>) -> Result<(), Terminated> {
  loop {
    match socket.recv_multipart(zmq::DONTWAIT) {
      Ok(frames) => handle_reply(shared, frames),
      Err(zmq::Error::EAGAIN) => return Ok(()),
      Err(zmq::Error::EINTR) => continue,
      Err(zmq::Error::ETERM) => return Err(Terminated),
      Err(e) => {
        tracing::warn!(box_name = %shared.name(), error = %e, "dealer receive failed");
        return Ok(());
      }
    }
  }
}

fn handle_reply(shared: &Arc<BoxShared>, frames: Vec<Vec<u8>>) {
  // The router sends [identity, payload]; the DEALER strips the identity so
  // we normally see a single frame. Tolerate an explicit "Answer" type frame
  // in front of the payload.
  let payload = match frames.as_slice() {
    [payload] => payload,
    [type_frame, payload] if type_frame.as_slice() == b"Answer" => payload,
    _ => {
      tracing::warn!(
        box_name = %shared.name(),
        frame_count = frames.len(),
        "dropping reply with unexpected framing"
      );
      return;
    }
  };
  match codec::decode_answer(payload) {
    Ok(answer) => shared.handle_answer(answer),
    Err(e) => {
      tracing::warn!(box_name = %shared.name(), error = %e, "dropping undecodable answer");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::time::Instant;

  fn message(tag: &str) -> OutboundMessage {
    OutboundMessage {
      kind: MessageType::Tell,
      payload: tag.as_bytes().to_vec(),
    }
  }

  #[test]
  fn push_wakes_a_waiting_drain() {
    let queue = Arc::new(OutboundQueue::new(8));
    let producer = Arc::clone(&queue);
    let handle = std::thread::spawn(move || {
      std::thread::sleep(Duration::from_millis(20));
      producer.push(message("a")).unwrap();
    });
    let started = Instant::now();
    let (batch, stopped) = queue.wait_drain(Duration::from_secs(2));
    assert_eq!(batch.len(), 1);
    assert!(!stopped);
    assert!(started.elapsed() < Duration::from_secs(1));
    handle.join().unwrap();
  }

  #[test]
  fn capacity_overflow_is_busy() {
    let queue = OutboundQueue::new(2);
    queue.push(message("a")).unwrap();
    queue.push(message("b")).unwrap();
    assert!(matches!(queue.push(message("c")), Err(MeshError::Busy)));
  }

  #[test]
  fn stop_rejects_pushes_and_reports_in_drain() {
    let queue = OutboundQueue::new(8);
    queue.push(message("a")).unwrap();
    queue.stop();
    assert!(matches!(queue.push(message("b")), Err(MeshError::Shutdown)));
    let (batch, stopped) = queue.wait_drain(Duration::from_millis(10));
    assert_eq!(batch.len(), 1);
    assert!(stopped);
  }

  #[test]
  fn requeue_front_preserves_order() {
    let queue = OutboundQueue::new(8);
    queue.push(message("c")).unwrap();
    queue.requeue_front(vec![message("a"), message("b")]);
    let (batch, _) = queue.wait_drain(Duration::from_millis(10));
    let tags: Vec<&[u8]> = batch.iter().map(|m| m.payload.as_slice()).collect();
    assert_eq!(tags, vec![b"a" as &[u8], b"b", b"c"]);
  }
}
