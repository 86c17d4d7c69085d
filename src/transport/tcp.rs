// src/transport/tcp.rs

use super::stream::StreamPipe;
use super::{Endpoint, Transport, TransportListener, TransportPipe};
use crate::error::SpError;
use crate::protocol::sp::greeting::exchange_greetings;
use crate::runtime::CloseSignal;
use crate::socket::options::TransportConfig;

use async_trait::async_trait;
use socket2::{SockRef, TcpKeepalive};
use tokio::net::{TcpListener, TcpStream};

/// TCP transport (`tcp://host:port`).
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpTransport;

fn tcp_parts(endpoint: &Endpoint) -> Result<(&str, u16), SpError> {
  match endpoint {
    Endpoint::Tcp { host, port } => Ok((host.as_str(), *port)),
    #[allow(unreachable_patterns)]
    other => Err(SpError::InvalidEndpoint(other.to_string())),
  }
}

fn apply_tcp_socket_options(stream: &TcpStream, config: &TransportConfig) -> Result<(), SpError> {
  stream.set_nodelay(config.tcp_nodelay)?;
  if let Some(idle) = config.tcp_keepalive {
    let keepalive = TcpKeepalive::new().with_time(idle);
    SockRef::from(stream).set_tcp_keepalive(&keepalive)?;
  }
  Ok(())
}

#[async_trait]
impl Transport for TcpTransport {
  fn scheme(&self) -> &'static str {
    "tcp"
  }

  async fn dial(&self, endpoint: &Endpoint, config: &TransportConfig) -> Result<Box<dyn TransportPipe>, SpError> {
    let (host, port) = tcp_parts(endpoint)?;
    let uri = endpoint.to_string();

    let mut stream = TcpStream::connect((host, port))
      .await
      .map_err(|e| SpError::from_io_endpoint(e, &uri))?;
    apply_tcp_socket_options(&stream, config)?;
    let remote = match stream.peer_addr() {
      Ok(addr) => format!("tcp://{}", addr),
      Err(_) => uri.clone(),
    };

    exchange_greetings(&mut stream, config.protocol).await?;
    tracing::debug!(endpoint = %uri, remote = %remote, "TCP connection established");
    Ok(Box::new(StreamPipe::new(stream, remote, config.max_recv_size)))
  }

  async fn listen(
    &self,
    endpoint: &Endpoint,
    config: &TransportConfig,
  ) -> Result<Box<dyn TransportListener>, SpError> {
    let (host, port) = tcp_parts(endpoint)?;
    let uri = endpoint.to_string();
    let bind_host = if host == "*" { "0.0.0.0" } else { host };

    let listener = TcpListener::bind((bind_host, port))
      .await
      .map_err(|e| SpError::from_io_endpoint(e, &uri))?;
    let local = format!("tcp://{}", listener.local_addr()?);
    tracing::info!(endpoint = %uri, local = %local, "TCP listener bound");

    Ok(Box::new(TcpStreamListener {
      listener,
      config: config.clone(),
      shutdown: CloseSignal::new(),
      local,
    }))
  }
}

struct TcpStreamListener {
  listener: TcpListener,
  config: TransportConfig,
  shutdown: CloseSignal,
  local: String,
}

#[async_trait]
impl TransportListener for TcpStreamListener {
  async fn accept(&self) -> Result<Box<dyn TransportPipe>, SpError> {
    let (mut stream, peer) = tokio::select! {
      biased;
      _ = self.shutdown.wait() => return Err(SpError::Closed),
      res = self.listener.accept() => res?,
    };
    apply_tcp_socket_options(&stream, &self.config)?;

    tokio::select! {
      biased;
      _ = self.shutdown.wait() => return Err(SpError::Closed),
      res = exchange_greetings(&mut stream, self.config.protocol) => { res?; }
    }
    let remote = format!("tcp://{}", peer);
    tracing::debug!(local = %self.local, remote = %remote, "TCP connection accepted");
    Ok(Box::new(StreamPipe::new(stream, remote, self.config.max_recv_size)))
  }

  async fn close(&self) -> Result<(), SpError> {
    if self.shutdown.fire() {
      tracing::debug!(local = %self.local, "TCP listener closed");
    }
    Ok(())
  }

  fn local_addr(&self) -> String {
    self.local.clone()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::message::Msg;
  use crate::protocol::sp::ProtocolIds;
  use crate::transport::parse_endpoint;

  #[tokio::test]
  async fn dial_and_accept_exchange_messages() {
    let config = TransportConfig::default();
    let listener = TcpTransport
      .listen(&parse_endpoint("tcp://127.0.0.1:0").unwrap(), &config)
      .await
      .unwrap();
    let local = parse_endpoint(&listener.local_addr()).unwrap();

    let (dialed, accepted) = tokio::join!(TcpTransport.dial(&local, &config), listener.accept());
    let (dialed, accepted) = (dialed.unwrap(), accepted.unwrap());

    dialed.send(Msg::from_static(b"over tcp")).await.unwrap();
    assert_eq!(accepted.recv().await.unwrap().body(), b"over tcp");
    assert!(accepted.remote_addr().starts_with("tcp://127.0.0.1:"));

    dialed.close().await.unwrap();
    assert!(accepted.recv().await.is_err());
  }

  #[tokio::test]
  async fn mismatched_protocols_fail_handshake() {
    let listener = TcpTransport
      .listen(&parse_endpoint("tcp://127.0.0.1:0").unwrap(), &TransportConfig::default())
      .await
      .unwrap();
    let local = parse_endpoint(&listener.local_addr()).unwrap();
    let req = TransportConfig {
      protocol: ProtocolIds::new(0x30, 0x31),
      ..Default::default()
    };

    let (dialed, accepted) = tokio::join!(TcpTransport.dial(&local, &req), listener.accept());
    assert!(dialed.is_err());
    assert!(accepted.is_err());
  }

  #[tokio::test]
  async fn closed_listener_stops_accepting() {
    let listener = TcpTransport
      .listen(&parse_endpoint("tcp://127.0.0.1:0").unwrap(), &TransportConfig::default())
      .await
      .unwrap();
    listener.close().await.unwrap();
    assert!(matches!(listener.accept().await, Err(SpError::Closed)));
  }
}
