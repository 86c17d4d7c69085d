// src/runtime/close_signal.rs

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// A one-shot, payload-free broadcast.
///
/// The only operation besides waiting is [`fire`](CloseSignal::fire), which
/// releases every current waiter and every future one. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct CloseSignal {
  inner: Arc<SignalInner>,
}

#[derive(Debug, Default)]
struct SignalInner {
  fired: AtomicBool,
  notify: Notify,
}

impl CloseSignal {
  pub fn new() -> Self {
    Self::default()
  }

  /// Fires the signal. Returns `true` only for the call that actually fired it.
  pub fn fire(&self) -> bool {
    if self.inner.fired.swap(true, Ordering::AcqRel) {
      return false;
    }
    self.inner.notify.notify_waiters();
    true
  }

  pub fn is_fired(&self) -> bool {
    self.inner.fired.load(Ordering::Acquire)
  }

  /// Waits until the signal has fired. Returns immediately if it already has.
  pub async fn wait(&self) {
    loop {
      // Register before checking the flag so a concurrent fire() cannot slip
      // between the check and the await.
      let notified = self.inner.notify.notified();
      if self.is_fired() {
        return;
      }
      notified.await;
    }
  }
}
