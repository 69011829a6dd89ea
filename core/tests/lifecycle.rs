// tests/lifecycle.rs

use std::sync::Arc;
use std::time::{Duration, Instant};

use serial_test::serial;
use zmesh::{MeshError, Node, RequestOptions};

mod common;

const BASE_PORT: u16 = 5900;

#[test]
#[serial]
fn unknown_box_name_fails() {
  common::setup_tracing();
  let port_b = common::unique_port(BASE_PORT);
  let node = Node::new(None, common::system_map(&[("B", port_b)])).unwrap();
  match node.at("nonexistent") {
    Err(MeshError::UnknownBox(name)) => assert_eq!(name, "nonexistent"),
    other => panic!("expected UnknownBox, got {other:?}"),
  }
}

#[test]
#[serial]
fn binding_an_occupied_endpoint_fails() {
  common::setup_tracing();
  let port = common::unique_port(BASE_PORT);
  let map = common::system_map(&[("B", port)]);

  let _first = Node::new(Some(&common::local_addr(port)), map.clone()).unwrap();
  match Node::new(Some(&common::local_addr(port)), map) {
    Err(MeshError::Transport(_)) => {}
    other => panic!("expected Transport error, got {other:?}"),
  }
}

#[test]
#[serial]
fn node_shutdown_fails_outstanding_asks() {
  common::setup_tracing();
  let port_b = common::unique_port(BASE_PORT);
  let map = common::system_map(&[("B", port_b)]);

  let node = Node::new(None, map.clone()).unwrap();
  // Nobody ever answers: the remote node exists but has no handler.
  let _remote = Node::new(Some(&common::local_addr(port_b)), map).unwrap();

  let message_box = node.at("B").unwrap();
  let asker = std::thread::spawn(move || {
    let started = Instant::now();
    let result = message_box.ask_with(
      "slow",
      Some(""),
      RequestOptions::new(Duration::from_secs(10), 1),
    );
    (result, started.elapsed())
  });

  std::thread::sleep(Duration::from_millis(200));
  drop(node);

  let (result, elapsed) = asker.join().unwrap();
  assert!(matches!(result, Err(MeshError::Shutdown)), "got {result:?}");
  assert!(elapsed < Duration::from_secs(5), "elapsed {elapsed:?}");
}

#[test]
#[serial]
fn box_rejects_sends_after_shutdown() {
  common::setup_tracing();
  let port_b = common::unique_port(BASE_PORT);
  let node = Node::new(None, common::system_map(&[("B", port_b)])).unwrap();
  let message_box = node.at("B").unwrap();

  node.shutdown();
  assert!(matches!(
    message_box.tell("ping", None),
    Err(MeshError::Shutdown)
  ));
  assert!(matches!(
    message_box.ask("ping", None),
    Err(MeshError::Shutdown)
  ));
  // Shutdown is idempotent.
  node.shutdown();
}

#[test]
#[serial]
fn at_returns_live_box_and_replaces_stale_entries() {
  common::setup_tracing();
  let port_b = common::unique_port(BASE_PORT);
  let node = Node::new(None, common::system_map(&[("B", port_b)])).unwrap();

  let first = node.at("B").unwrap();
  let same = node.at("B").unwrap();
  assert!(Arc::ptr_eq(&first, &same));

  drop(first);
  drop(same);
  // The weak entry is stale now; a fresh box takes its place and works.
  let replacement = node.at("B").unwrap();
  replacement.tell("ping", None).unwrap();
}

#[test]
#[serial]
fn full_outbound_queue_rejects_with_busy() {
  common::setup_tracing();
  // The port is allocated but never bound, so nothing drains the socket and
  // both the transport buffer and the outbound queue fill up.
  let port_b = common::unique_port(BASE_PORT);
  let node = Node::new(None, common::system_map(&[("B", port_b)])).unwrap();
  let message_box = node.at("B").unwrap();

  let payload = "x".repeat(64);
  let mut saw_busy = false;
  for _ in 0..5000 {
    match message_box.tell("flood", Some(&payload)) {
      Ok(()) => {}
      Err(MeshError::Busy) => {
        saw_busy = true;
        break;
      }
      Err(other) => panic!("unexpected error while flooding: {other:?}"),
    }
  }
  assert!(saw_busy, "outbound queue never reported Busy");
}
