// src/socket/mod.rs

//! The socket contract pipes are built to serve, and a protocol-agnostic
//! implementation of it.

pub mod core;
pub mod options;
pub mod types;

use crate::error::SpError;
use crate::message::Msg;
use crate::pipe::PipeOwner;
use crate::protocol::sp::ProtocolIds;
use crate::transport::Transport;

pub use options::OptionValue;
pub use types::Socket;

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

/// Capabilities every socket implementation offers applications.
///
/// Implementations also act as [`PipeOwner`] so that a closing pipe can remove
/// itself from the socket's pipe set.
#[async_trait]
pub trait ISocket: PipeOwner + Send + Sync {
  /// Tears the socket down exactly once: stops background dial/accept work and
  /// closes every pipe. Later calls return `SpError::Closed`.
  async fn close(&self) -> Result<(), SpError>;

  /// Sends a full message, headers included (raw mode).
  async fn send_msg(&self, msg: Msg) -> Result<(), SpError>;

  /// Receives a full message, headers included (raw mode).
  async fn recv_msg(&self) -> Result<Msg, SpError>;

  /// Validates `endpoint` and starts a background dialer that keeps a pipe
  /// to it alive until the socket closes. Connection failures are never
  /// reported here.
  async fn dial(&self, endpoint: &str) -> Result<(), SpError>;

  /// Validates and binds `endpoint`, then accepts inbound pipes in the background.
  async fn listen(&self, endpoint: &str) -> Result<(), SpError>;

  fn get_option(&self, name: &str) -> Result<OptionValue, SpError>;

  fn set_option(&self, name: &str, value: OptionValue) -> Result<(), SpError>;

  /// The protocol numbers this socket announces and expects from peers.
  fn protocol(&self) -> ProtocolIds;

  /// Makes `transport` available for endpoints using its scheme.
  fn add_transport(&self, transport: Arc<dyn Transport>) -> Result<(), SpError>;

  /// Payload-only send.
  async fn send(&self, data: Bytes) -> Result<(), SpError> {
    self.send_msg(Msg::from_bytes(data)).await
  }

  /// Payload-only receive.
  async fn recv(&self) -> Result<Bytes, SpError> {
    Ok(self.recv_msg().await?.into_body())
  }
}
