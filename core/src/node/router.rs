// core/src/node/router.rs

//! The node's ROUTER loop.
//!
//! Single-threaded and cooperative: poll with a small timeout, pull one
//! three-frame message (`[origin_identity, type_string, payload]`), dispatch
//! it to the named box, then drain the answer queue back through the ROUTER
//! as `[identity, payload]`. Malformed frames are logged and dropped without
//! disturbing the link; a final drain runs on stop.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::mailbox::worker::Terminated;
use crate::mailbox::AnswerSink;
use crate::message::{codec, Blob, MessageType};
use crate::node::NodeShared;
use crate::options::POLL_INTERVAL;

pub(crate) fn run(socket: zmq::Socket, shared: Arc<NodeShared>) {
  tracing::debug!("router loop started");
  while shared.running.load(Ordering::Acquire) {
    match socket.poll(zmq::POLLIN, POLL_INTERVAL.as_millis() as i64) {
      Ok(readable) if readable > 0 => receive_and_dispatch(&socket, &shared),
      Ok(_) => {}
      Err(zmq::Error::EINTR) => {}
      Err(zmq::Error::ETERM) => break,
      Err(e) => {
        tracing::error!(error = %e, "router poll failed");
        break;
      }
    }
    if flush_answers(&socket, &shared).is_err() {
      break;
    }
  }
  let _ = flush_answers(&socket, &shared);
  tracing::debug!("router loop stopped");
}

fn receive_and_dispatch(socket: &zmq::Socket, shared: &Arc<NodeShared>) {
  let frames = match socket.recv_multipart(zmq::DONTWAIT) {
    Ok(frames) => frames,
    Err(zmq::Error::EAGAIN) | Err(zmq::Error::EINTR) => return,
    Err(e) => {
      tracing::warn!(error = %e, "router receive failed");
      return;
    }
  };
  let [identity, type_frame, payload]: [Vec<u8>; 3] = match frames.try_into() {
    Ok(frames) => frames,
    Err(frames) => {
      tracing::warn!(frame_count = frames.len(), "dropping message with unexpected framing");
      return;
    }
  };

  let message_type = match std::str::from_utf8(&type_frame)
    .ok()
    .and_then(|s| s.parse::<MessageType>().ok())
  {
    Some(message_type) => message_type,
    None => {
      tracing::warn!("dropping message with unknown type frame");
      return;
    }
  };

  match message_type {
    MessageType::Tell => match codec::decode_tell(&payload) {
      Ok(tell) => match shared.at(&tell.message_box_name) {
        Ok(message_box) => message_box.accept_tell(tell),
        Err(e) => tracing::warn!(error = %e, "dropping tell for unroutable box"),
      },
      Err(e) => tracing::warn!(error = %e, "dropping undecodable tell"),
    },
    MessageType::Question => match codec::decode_question(&payload) {
      Ok(question) => match shared.at(&question.message_box_name) {
        Ok(message_box) => {
          let pending = crate::mailbox::PendingQuestion::new(
            question,
            Blob::from(identity),
            AnswerSink::new(&shared.answers),
          );
          message_box.accept_question(pending);
        }
        Err(e) => tracing::warn!(error = %e, "dropping question for unroutable box"),
      },
      Err(e) => tracing::warn!(error = %e, "dropping undecodable question"),
    },
    MessageType::Answer => match codec::decode_answer(&payload) {
      Ok(answer) => match shared.at(&answer.message_box_name) {
        Ok(message_box) => message_box.handle_answer(answer),
        Err(e) => tracing::warn!(error = %e, "dropping answer for unroutable box"),
      },
      Err(e) => tracing::warn!(error = %e, "dropping undecodable answer"),
    },
  }
}

fn flush_answers(socket: &zmq::Socket, shared: &Arc<NodeShared>) -> Result<(), Terminated> {
  let mut iter = shared.answers.drain().into_iter();
  while let Some((identity, message)) = iter.next() {
    let payload = match codec::encode_answer(&message) {
      Ok(payload) => payload,
      Err(e) => {
        tracing::warn!(error = %e, "dropping unencodable answer");
        continue;
      }
    };
    match socket.send(&identity[..], zmq::SNDMORE | zmq::DONTWAIT) {
      Ok(()) => {}
      Err(zmq::Error::EAGAIN) | Err(zmq::Error::EINTR) => {
        let mut rest = vec![(identity, message)];
        rest.extend(iter);
        shared.answers.requeue_front(rest);
        return Ok(());
      }
      Err(zmq::Error::ETERM) => return Err(Terminated),
      Err(e) => {
        tracing::warn!(error = %e, "dropping undeliverable answer");
        continue;
      }
    }
    match socket.send(payload, 0) {
      Ok(()) => {}
      Err(zmq::Error::ETERM) => return Err(Terminated),
      Err(e) => {
        tracing::warn!(error = %e, "answer payload frame send failed");
      }
    }
  }
  Ok(())
}
