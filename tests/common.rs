// tests/common.rs
#![allow(dead_code)]

use spcore::{Msg, Socket, SpError};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Once;
use std::time::Duration;

use tokio::time::timeout;

static IPC_ENDPOINT_COUNTER: AtomicUsize = AtomicUsize::new(0);
static INPROC_ENDPOINT_COUNTER: AtomicUsize = AtomicUsize::new(0);

static TRACING_INIT: Once = Once::new();

pub const SHORT_TIMEOUT: Duration = Duration::from_millis(200);
pub const LONG_TIMEOUT: Duration = Duration::from_secs(5);

// Overridable with RUST_LOG.
pub fn setup_tracing() {
  TRACING_INIT.call_once(|| {
    let default_filter = "spcore=trace,info";
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let subscriber = FmtSubscriber::builder()
      .with_env_filter(env_filter)
      .with_target(true)
      .with_line_number(true)
      .with_test_writer()
      .finish();

    // Another test binary helper may have installed one already.
    let _ = tracing::subscriber::set_global_default(subscriber);
  });
}

/// A PAIR socket with every compiled-in transport registered.
pub fn test_socket() -> Socket {
  setup_tracing();
  spcore::socket().expect("Failed to create test socket")
}

pub fn unique_ipc_endpoint() -> String {
  let pid = std::process::id();
  let count = IPC_ENDPOINT_COUNTER.fetch_add(1, Ordering::Relaxed);
  format!("ipc:///tmp/spcore_test_{}_{}", pid, count)
}

pub fn unique_inproc_endpoint() -> String {
  let pid = std::process::id();
  let count = INPROC_ENDPOINT_COUNTER.fetch_add(1, Ordering::Relaxed);
  format!("inproc://spcore_test_{}_{}", pid, count)
}

pub async fn recv_timeout(socket: &Socket, duration: Duration) -> Result<Msg, SpError> {
  match timeout(duration, socket.recv_msg()).await {
    Ok(res) => res,
    Err(_) => Err(SpError::Timeout),
  }
}

/// Polls until `socket` holds exactly `expected` pipes.
pub async fn wait_for_pipes(socket: &Socket, expected: usize, within: Duration) -> Result<(), String> {
  let start = tokio::time::Instant::now();
  loop {
    let count = socket.pipe_count();
    if count == expected {
      return Ok(());
    }
    if start.elapsed() > within {
      return Err(format!(
        "Timed out after {:?} waiting for {} pipes (have {})",
        within, expected, count
      ));
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
  }
}
