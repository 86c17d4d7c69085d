// src/socket/types.rs

use crate::error::SpError;
use crate::message::Msg;
use crate::pipe::{registry, Pipe, PipeRegistry};
use crate::protocol::sp::ProtocolIds;
use crate::socket::core::SocketCore;
use crate::socket::{ISocket, OptionValue};
use crate::transport::Transport;

use bytes::Bytes;
use std::fmt;
use std::sync::Arc;

/// The public handle for an SP socket.
///
/// Handles are cheap to clone and share one underlying socket. Transports
/// must be added (see [`crate::transport::add_all`]) before dialing or
/// listening on their scheme.
#[derive(Clone)]
pub struct Socket {
  core: Arc<SocketCore>,
}

impl Socket {
  /// Creates a PAIR-protocol socket registered with the process-wide pipe registry.
  pub fn new() -> Self {
    Self::with_protocol(ProtocolIds::PAIR)
  }

  pub fn with_protocol(protocol: ProtocolIds) -> Self {
    Self::with_registry(protocol, registry::global().clone())
  }

  /// Creates a socket whose pipes are registered in `registry` instead of the global one.
  pub fn with_registry(protocol: ProtocolIds, registry: PipeRegistry) -> Self {
    Self {
      core: SocketCore::new(protocol, registry),
    }
  }

  pub async fn send(&self, data: impl Into<Bytes>) -> Result<(), SpError> {
    self.core.send(data.into()).await
  }

  pub async fn recv(&self) -> Result<Bytes, SpError> {
    self.core.recv().await
  }

  pub async fn send_msg(&self, msg: Msg) -> Result<(), SpError> {
    self.core.send_msg(msg).await
  }

  pub async fn recv_msg(&self) -> Result<Msg, SpError> {
    self.core.recv_msg().await
  }

  pub async fn dial(&self, endpoint: &str) -> Result<(), SpError> {
    self.core.dial(endpoint).await
  }

  pub async fn listen(&self, endpoint: &str) -> Result<(), SpError> {
    self.core.listen(endpoint).await
  }

  pub async fn close(&self) -> Result<(), SpError> {
    self.core.close().await
  }

  pub fn get_option(&self, name: &str) -> Result<OptionValue, SpError> {
    self.core.get_option(name)
  }

  pub fn set_option(&self, name: &str, value: impl Into<OptionValue>) -> Result<(), SpError> {
    self.core.set_option(name, value.into())
  }

  pub fn protocol(&self) -> ProtocolIds {
    self.core.protocol()
  }

  pub fn add_transport(&self, transport: Arc<dyn Transport>) -> Result<(), SpError> {
    self.core.add_transport(transport)
  }

  /// Process-unique handle used in log output.
  pub fn handle(&self) -> usize {
    self.core.handle()
  }

  /// Snapshot of the pipes currently in the socket's pipe set.
  pub fn pipes(&self) -> Vec<Arc<Pipe>> {
    self.core.pipes()
  }

  pub fn pipe_count(&self) -> usize {
    self.core.pipe_count()
  }

  /// The socket as a trait object, for code written against the contract.
  pub fn as_dyn(&self) -> Arc<dyn ISocket> {
    self.core.clone()
  }
}

impl Default for Socket {
  fn default() -> Self {
    Self::new()
  }
}

impl fmt::Debug for Socket {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Socket")
      .field("handle", &self.core.handle())
      .field("pipes", &self.core.pipe_count())
      .finish_non_exhaustive()
  }
}
