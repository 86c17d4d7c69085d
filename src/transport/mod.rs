//! Transport capability traits and the concrete transports (TCP, IPC, inproc).
//!
//! Sockets never touch sockets or channels directly: a [`Transport`] turns an
//! [`Endpoint`] into [`TransportPipe`]s, either by dialing or through a
//! [`TransportListener`], and the socket wraps each one in a registered
//! [`Pipe`](crate::pipe::Pipe).

pub mod endpoint;
#[cfg(feature = "inproc")]
pub mod inproc;
#[cfg(all(unix, feature = "ipc"))]
pub mod ipc;
pub(crate) mod stream;
pub mod tcp;

pub use endpoint::{parse_endpoint, Endpoint};

use crate::error::SpError;
use crate::message::Msg;
use crate::socket::options::TransportConfig;
use crate::socket::Socket;

use async_trait::async_trait;
use std::sync::Arc;

/// One live connection as provided by a transport.
///
/// All methods take `&self`: `close` may run while a `send` or `recv` is
/// blocked, and must make that call return an error promptly.
#[async_trait]
pub trait TransportPipe: Send + Sync {
  async fn send(&self, msg: Msg) -> Result<(), SpError>;

  async fn recv(&self) -> Result<Msg, SpError>;

  async fn close(&self) -> Result<(), SpError>;

  fn remote_addr(&self) -> String;
}

/// A bound endpoint producing inbound connections.
#[async_trait]
pub trait TransportListener: Send + Sync {
  /// Waits for the next inbound connection. Returns `SpError::Closed` once the
  /// listener has been closed; other errors concern a single connection.
  async fn accept(&self) -> Result<Box<dyn TransportPipe>, SpError>;

  async fn close(&self) -> Result<(), SpError>;

  /// The address actually bound (e.g. with the OS-assigned TCP port filled in).
  fn local_addr(&self) -> String;
}

/// Factory for pipes over one URI scheme.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
  fn scheme(&self) -> &'static str;

  async fn dial(&self, endpoint: &Endpoint, config: &TransportConfig) -> Result<Box<dyn TransportPipe>, SpError>;

  async fn listen(
    &self,
    endpoint: &Endpoint,
    config: &TransportConfig,
  ) -> Result<Box<dyn TransportListener>, SpError>;
}

/// Registers every transport compiled into this build with `socket`.
pub fn add_all(socket: &Socket) -> Result<(), SpError> {
  socket.add_transport(Arc::new(tcp::TcpTransport))?;
  #[cfg(all(unix, feature = "ipc"))]
  socket.add_transport(Arc::new(ipc::IpcTransport))?;
  #[cfg(feature = "inproc")]
  socket.add_transport(Arc::new(inproc::InprocTransport))?;
  Ok(())
}
