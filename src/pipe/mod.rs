// src/pipe/mod.rs

//! Pipes: registered, self-closing wrappers around transport connections.
//!
//! A [`Pipe`] owns exactly one [`TransportPipe`] and adds a process-wide
//! identifier, a one-shot close signal and a non-owning link back to the
//! socket that created it. Every path that can end a pipe (explicit close,
//! failed send, failed receive) funnels into [`Pipe::close`], which performs
//! the teardown exactly once.

pub mod registry;

pub use registry::PipeRegistry;

use crate::error::SpError;
use crate::message::Msg;
use crate::runtime::CloseSignal;
use crate::transport::TransportPipe;

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Weak;

/// The callback a socket supplies so pipe close can drop the socket's reference.
///
/// Called at most once per pipe, during the first [`Pipe::close`]. It must
/// tolerate pipes that were never added to the owner's pipe set.
pub trait PipeOwner: Send + Sync {
  fn rem_pipe(&self, pipe: &Pipe);
}

const NO_SLOT: usize = usize::MAX;

pub struct Pipe {
  /// Written only while the registry lock is held; 0 once released.
  id: AtomicU32,
  transport: Box<dyn TransportPipe>,
  close_signal: CloseSignal,
  owner: Weak<dyn PipeOwner>,
  closing: Mutex<bool>,
  slot: AtomicUsize,
  registry: PipeRegistry,
}

impl Pipe {
  pub(crate) fn new(transport: Box<dyn TransportPipe>, owner: Weak<dyn PipeOwner>, registry: PipeRegistry) -> Self {
    Self {
      id: AtomicU32::new(0),
      transport,
      close_signal: CloseSignal::new(),
      owner,
      closing: Mutex::new(false),
      slot: AtomicUsize::new(NO_SLOT),
      registry,
    }
  }

  /// The pipe's process-wide identifier, or 0 once the pipe has closed.
  pub fn id(&self) -> u32 {
    self.registry.id_of(self)
  }

  pub(crate) fn raw_id(&self) -> u32 {
    self.id.load(Ordering::Acquire)
  }

  pub(crate) fn set_raw_id(&self, id: u32) {
    self.id.store(id, Ordering::Release);
  }

  /// Sends through the transport. A transport error closes the pipe and is returned as-is.
  pub async fn send_msg(&self, msg: Msg) -> Result<(), SpError> {
    match self.transport.send(msg).await {
      Ok(()) => Ok(()),
      Err(e) => {
        tracing::debug!(pipe_id = self.raw_id(), error = %e, "Pipe send failed, closing pipe");
        let _ = self.close().await;
        Err(e)
      }
    }
  }

  /// Receives from the transport, stamping the message with the peer address.
  ///
  /// A transport error closes the pipe and yields `None`; the error itself is
  /// only logged. A closed pipe is signaled to the caller by absence alone.
  pub async fn recv_msg(&self) -> Option<Msg> {
    match self.transport.recv().await {
      Ok(mut msg) => {
        msg.set_remote(self.transport.remote_addr());
        Some(msg)
      }
      Err(e) => {
        tracing::debug!(pipe_id = self.raw_id(), error = %e, "Pipe receive failed, closing pipe");
        let _ = self.close().await;
        None
      }
    }
  }

  /// Closes the pipe. Only the first call does anything; every call returns `Ok`.
  ///
  /// Teardown order: fire the close signal, detach from the owning socket,
  /// close the transport, then release the identifier. Waiters on
  /// [`closed`](Pipe::closed) wake before the transport close runs.
  pub async fn close(&self) -> Result<(), SpError> {
    {
      let mut closing = self.closing.lock();
      if *closing {
        return Ok(());
      }
      *closing = true;
    }
    let id = self.raw_id();
    tracing::debug!(pipe_id = id, remote = %self.transport.remote_addr(), "Closing pipe");

    self.close_signal.fire();

    if let Some(owner) = self.owner.upgrade() {
      owner.rem_pipe(self);
    }

    if let Err(e) = self.transport.close().await {
      tracing::debug!(pipe_id = id, error = %e, "Transport close reported an error");
    }

    self.registry.release(self);
    tracing::trace!(pipe_id = id, "Pipe released");
    Ok(())
  }

  /// Resolves once the pipe has begun closing.
  pub async fn closed(&self) {
    self.close_signal.wait().await
  }

  pub fn is_closing(&self) -> bool {
    *self.closing.lock()
  }

  pub fn remote_addr(&self) -> String {
    self.transport.remote_addr()
  }

  /// Opaque position hint for the owning socket's own bookkeeping.
  pub fn slot(&self) -> Option<usize> {
    match self.slot.load(Ordering::Acquire) {
      NO_SLOT => None,
      slot => Some(slot),
    }
  }

  pub fn set_slot(&self, slot: usize) {
    self.slot.store(slot, Ordering::Release);
  }

  pub fn clear_slot(&self) {
    self.slot.store(NO_SLOT, Ordering::Release);
  }
}

impl Drop for Pipe {
  fn drop(&mut self) {
    // A pipe dropped without close still owns its table entry.
    if self.raw_id() != 0 {
      self.registry.forget(self);
    }
  }
}

impl fmt::Debug for Pipe {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Pipe")
      .field("id", &self.raw_id())
      .field("remote", &self.transport.remote_addr())
      .field("closing", &*self.closing.lock())
      .field("slot", &self.slot())
      .finish_non_exhaustive()
  }
}
