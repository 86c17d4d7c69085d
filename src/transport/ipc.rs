// src/transport/ipc.rs

use super::stream::StreamPipe;
use super::{Endpoint, Transport, TransportListener, TransportPipe};
use crate::error::SpError;
use crate::protocol::sp::greeting::exchange_greetings;
use crate::runtime::CloseSignal;
use crate::socket::options::TransportConfig;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::net::{UnixListener, UnixStream};

/// Unix domain socket transport (`ipc:///path/to/socket`).
#[derive(Debug, Default, Clone, Copy)]
pub struct IpcTransport;

fn ipc_path(endpoint: &Endpoint) -> Result<&Path, SpError> {
  match endpoint {
    Endpoint::Ipc(path) => Ok(path.as_path()),
    other => Err(SpError::InvalidEndpoint(other.to_string())),
  }
}

#[async_trait]
impl Transport for IpcTransport {
  fn scheme(&self) -> &'static str {
    "ipc"
  }

  async fn dial(&self, endpoint: &Endpoint, config: &TransportConfig) -> Result<Box<dyn TransportPipe>, SpError> {
    let path = ipc_path(endpoint)?;
    let uri = endpoint.to_string();

    let mut stream = UnixStream::connect(path)
      .await
      .map_err(|e| SpError::from_io_endpoint(e, &uri))?;
    exchange_greetings(&mut stream, config.protocol).await?;
    tracing::debug!(endpoint = %uri, "IPC connection established");
    Ok(Box::new(StreamPipe::new(stream, uri, config.max_recv_size)))
  }

  async fn listen(
    &self,
    endpoint: &Endpoint,
    config: &TransportConfig,
  ) -> Result<Box<dyn TransportListener>, SpError> {
    let path = ipc_path(endpoint)?.to_path_buf();
    let uri = endpoint.to_string();

    // A socket file left behind by a dead process would make bind fail.
    match std::fs::remove_file(&path) {
      Ok(()) => tracing::debug!(path = ?path, "Removed existing IPC socket file before binding"),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
      Err(e) => tracing::warn!(path = ?path, error = %e, "Failed to remove existing IPC socket file"),
    }

    let listener = UnixListener::bind(&path).map_err(|e| SpError::from_io_endpoint(e, &uri))?;
    tracing::info!(endpoint = %uri, "IPC listener bound");
    Ok(Box::new(IpcStreamListener {
      listener,
      path,
      uri,
      config: config.clone(),
      shutdown: CloseSignal::new(),
    }))
  }
}

struct IpcStreamListener {
  listener: UnixListener,
  path: PathBuf,
  uri: String,
  config: TransportConfig,
  shutdown: CloseSignal,
}

impl IpcStreamListener {
  fn unlink(&self) {
    match std::fs::remove_file(&self.path) {
      Ok(()) => tracing::debug!(path = ?self.path, "Removed IPC socket file"),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
      Err(e) => tracing::warn!(path = ?self.path, error = %e, "Failed to remove IPC socket file"),
    }
  }
}

#[async_trait]
impl TransportListener for IpcStreamListener {
  async fn accept(&self) -> Result<Box<dyn TransportPipe>, SpError> {
    let (mut stream, _peer) = tokio::select! {
      biased;
      _ = self.shutdown.wait() => return Err(SpError::Closed),
      res = self.listener.accept() => res?,
    };
    tokio::select! {
      biased;
      _ = self.shutdown.wait() => return Err(SpError::Closed),
      res = exchange_greetings(&mut stream, self.config.protocol) => { res?; }
    }
    // Unix peers are normally unnamed; report the endpoint they reached us on.
    Ok(Box::new(StreamPipe::new(stream, self.uri.clone(), self.config.max_recv_size)))
  }

  async fn close(&self) -> Result<(), SpError> {
    if self.shutdown.fire() {
      self.unlink();
    }
    Ok(())
  }

  fn local_addr(&self) -> String {
    self.uri.clone()
  }
}

impl Drop for IpcStreamListener {
  fn drop(&mut self) {
    if !self.shutdown.is_fired() {
      self.unlink();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::message::Msg;
  use crate::transport::parse_endpoint;

  #[tokio::test]
  async fn ipc_round_trip_and_cleanup() {
    let path = std::env::temp_dir().join(format!("spcore_ipc_unit_{}.sock", std::process::id()));
    let endpoint = parse_endpoint(&format!("ipc://{}", path.display())).unwrap();
    let config = TransportConfig::default();

    let listener = IpcTransport.listen(&endpoint, &config).await.unwrap();
    let (dialed, accepted) = tokio::join!(IpcTransport.dial(&endpoint, &config), listener.accept());
    let (dialed, accepted) = (dialed.unwrap(), accepted.unwrap());

    accepted.send(Msg::from_static(b"over ipc")).await.unwrap();
    assert_eq!(dialed.recv().await.unwrap().body(), b"over ipc");

    listener.close().await.unwrap();
    assert!(!path.exists());
  }
}
