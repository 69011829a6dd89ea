// tests/common.rs
#![allow(dead_code)]

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Once;
use std::time::{Duration, Instant};

use tracing_subscriber::{EnvFilter, FmtSubscriber};

use zmesh::SystemMap;

static TRACING_INIT: Once = Once::new();
static PORT_COUNTER: AtomicU16 = AtomicU16::new(0);

/// Initializes the tracing subscriber once per test binary. The default
/// filter can be overridden through `RUST_LOG`.
pub fn setup_tracing() {
  TRACING_INIT.call_once(|| {
    let env_filter =
      EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("zmesh=debug,warn"));
    let subscriber = FmtSubscriber::builder()
      .with_env_filter(env_filter)
      .with_target(true)
      .with_test_writer()
      .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
  });
}

/// Allocates a port unique within this test binary. Each test file passes
/// its own base so concurrently running binaries never overlap.
pub fn unique_port(base: u16) -> u16 {
  base + PORT_COUNTER.fetch_add(1, Ordering::Relaxed)
}

pub fn local_addr(port: u16) -> String {
  format!("127.0.0.1:{port}")
}

/// Builds a system map from `(box name, port)` pairs on loopback.
pub fn system_map(entries: &[(&str, u16)]) -> SystemMap {
  entries
    .iter()
    .map(|(name, port)| (name.to_string(), local_addr(*port)))
    .collect()
}

/// Polls `condition` every 10 ms until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
  let deadline = Instant::now() + timeout;
  while Instant::now() < deadline {
    if condition() {
      return true;
    }
    std::thread::sleep(Duration::from_millis(10));
  }
  condition()
}
