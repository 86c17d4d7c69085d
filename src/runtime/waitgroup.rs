// src/runtime/waitgroup.rs

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Counts live background tasks so a socket can wait for all of them on close.
///
/// Each task holds a [`TaskToken`] for its whole run. The token is released on
/// drop, so a task that panics or is cancelled still checks out.
#[derive(Debug, Clone, Default)]
pub(crate) struct WaitGroup {
  inner: Arc<GroupInner>,
}

#[derive(Debug, Default)]
struct GroupInner {
  live: AtomicUsize,
  idle: Notify,
}

/// Proof of membership in a [`WaitGroup`]. Dropping it leaves the group.
#[derive(Debug)]
pub(crate) struct TaskToken {
  inner: Arc<GroupInner>,
}

impl WaitGroup {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn enter(&self) -> TaskToken {
    self.inner.live.fetch_add(1, Ordering::AcqRel);
    TaskToken {
      inner: self.inner.clone(),
    }
  }

  /// Resolves once no token is outstanding.
  pub async fn wait(&self) {
    loop {
      let idle = self.inner.idle.notified();
      if self.inner.live.load(Ordering::Acquire) == 0 {
        return;
      }
      idle.await;
    }
  }
}

impl Drop for TaskToken {
  fn drop(&mut self) {
    if self.inner.live.fetch_sub(1, Ordering::AcqRel) == 1 {
      tracing::trace!("Last tracked task finished");
      self.inner.idle.notify_waiters();
    }
  }
}
