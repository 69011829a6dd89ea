// core/src/node/mod.rs

//! The process-wide [`Node`]: ZeroMQ context, system map, live-box registry
//! and the optional router thread.

mod answer_queue;
mod router;

pub(crate) use answer_queue::AnswerQueue;

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;

use crate::error::{MeshError, MeshResult};
use crate::mailbox::MessageBox;

/// Static table mapping box names to `host:port` addresses.
pub type SystemMap = HashMap<String, String>;

pub(crate) struct NodeShared {
  context: zmq::Context,
  system_map: SystemMap,
  boxes: Mutex<HashMap<String, Weak<MessageBox>>>,
  pub(crate) answers: Arc<AnswerQueue>,
  pub(crate) running: AtomicBool,
}

impl NodeShared {
  /// Returns the live box named `name`, creating it on demand from the
  /// system map. Lookup and creation are serialized under one lock; a stale
  /// weak entry is replaced.
  pub(crate) fn at(self: &Arc<Self>, name: &str) -> MeshResult<Arc<MessageBox>> {
    let mut boxes = self.boxes.lock();
    if let Some(entry) = boxes.get(name) {
      if let Some(live) = entry.upgrade() {
        return Ok(live);
      }
      boxes.remove(name);
    }
    let address = self
      .system_map
      .get(name)
      .ok_or_else(|| MeshError::UnknownBox(name.to_string()))?;
    let message_box = MessageBox::new(name, address, &self.context)?;
    boxes.insert(name.to_string(), Arc::downgrade(&message_box));
    Ok(message_box)
  }
}

/// A process's entry point into the mesh.
///
/// Construct with the node's own bind address (or `None` for a client-only
/// node that hosts no inbound boxes) and the shared system map. Boxes are
/// handed out by [`at`](Node::at) and stay live while somebody holds their
/// `Arc`; dropping the node stops the router and shuts down every live box,
/// failing their outstanding asks with [`MeshError::Shutdown`].
pub struct Node {
  shared: Arc<NodeShared>,
  router: Mutex<Option<JoinHandle<()>>>,
}

impl Node {
  pub fn new(bind_address: Option<&str>, system_map: SystemMap) -> MeshResult<Self> {
    let shared = Arc::new(NodeShared {
      context: zmq::Context::new(),
      system_map,
      boxes: Mutex::new(HashMap::new()),
      answers: AnswerQueue::new(),
      running: AtomicBool::new(true),
    });

    let router = match bind_address {
      Some(address) => {
        let socket = shared.context.socket(zmq::ROUTER)?;
        socket.set_linger(0)?;
        let endpoint = format!("tcp://{address}");
        socket.bind(&endpoint)?;
        tracing::info!(%endpoint, "router bound");
        let loop_shared = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
          .name("zmesh-router".to_string())
          .spawn(move || router::run(socket, loop_shared))
          .map_err(|e| MeshError::Internal(format!("failed to spawn router thread: {e}")))?;
        Some(handle)
      }
      None => None,
    };

    Ok(Self {
      shared,
      router: Mutex::new(router),
    })
  }

  /// Returns the box named `name`, creating it on first use. Fails with
  /// [`MeshError::UnknownBox`] for names missing from the system map.
  pub fn at(&self, name: &str) -> MeshResult<Arc<MessageBox>> {
    self.shared.at(name)
  }

  /// Stops the router thread and shuts down every live box. Idempotent;
  /// also runs on drop. Must not be called from a handler running on the
  /// router thread.
  pub fn shutdown(&self) {
    self.shared.running.store(false, Ordering::Release);
    let router = self.router.lock().take();
    if let Some(router) = router {
      if router.join().is_err() {
        tracing::error!("router thread panicked");
      }
    }
    let live: Vec<Arc<MessageBox>> = {
      let boxes = self.shared.boxes.lock();
      boxes.values().filter_map(Weak::upgrade).collect()
    };
    for message_box in live {
      message_box.shutdown();
    }
  }
}

impl Drop for Node {
  fn drop(&mut self) {
    self.shutdown();
  }
}

impl std::fmt::Debug for Node {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Node")
      .field("boxes", &self.shared.boxes.lock().len())
      .field("running", &self.shared.running.load(Ordering::Relaxed))
      .finish()
  }
}
