// src/transport/inproc.rs

//! In-process transport (`inproc://name`) built on `async-channel` pairs.

use super::{Endpoint, Transport, TransportListener, TransportPipe};
use crate::error::SpError;
use crate::message::Msg;
use crate::protocol::sp::ProtocolIds;
use crate::runtime::CloseSignal;
use crate::socket::options::TransportConfig;

use async_channel::{bounded, Receiver, Sender};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Messages buffered per direction of an inproc pipe.
pub const INPROC_PIPE_CAPACITY: usize = 128;
const INPROC_BACKLOG: usize = 16;

struct InprocBinding {
  binding_id: u64,
  protocol: ProtocolIds,
  connect_tx: Sender<InprocPipe>,
}

/// Registry for in-process bindings, keyed by name.
static INPROC_BINDINGS: Lazy<Mutex<HashMap<String, InprocBinding>>> = Lazy::new(|| Mutex::new(HashMap::new()));
static NEXT_BINDING_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Default, Clone, Copy)]
pub struct InprocTransport;

fn inproc_name(endpoint: &Endpoint) -> Result<&str, SpError> {
  match endpoint {
    Endpoint::Inproc(name) => Ok(name.as_str()),
    other => Err(SpError::InvalidEndpoint(other.to_string())),
  }
}

#[async_trait]
impl Transport for InprocTransport {
  fn scheme(&self) -> &'static str {
    "inproc"
  }

  async fn dial(&self, endpoint: &Endpoint, config: &TransportConfig) -> Result<Box<dyn TransportPipe>, SpError> {
    let name = inproc_name(endpoint)?;
    let uri = endpoint.to_string();

    let (connect_tx, binder_protocol) = {
      let bindings = INPROC_BINDINGS.lock();
      let binding = bindings
        .get(name)
        .ok_or_else(|| SpError::ConnectionRefused(uri.clone()))?;
      (binding.connect_tx.clone(), binding.protocol)
    };
    if !config.protocol.accepts(&binder_protocol) {
      return Err(SpError::ProtocolViolation(format!(
        "Incompatible protocols on {}: {:#x} cannot talk to {:#x}",
        uri, config.protocol.local, binder_protocol.local
      )));
    }

    let (to_binder_tx, to_binder_rx) = bounded(INPROC_PIPE_CAPACITY);
    let (to_dialer_tx, to_dialer_rx) = bounded(INPROC_PIPE_CAPACITY);
    let binder_end = InprocPipe {
      tx: to_dialer_tx,
      rx: to_binder_rx,
      remote: uri.clone(),
      closed: CloseSignal::new(),
    };
    let dialer_end = InprocPipe {
      tx: to_binder_tx,
      rx: to_dialer_rx,
      remote: uri.clone(),
      closed: CloseSignal::new(),
    };

    connect_tx
      .send(binder_end)
      .await
      .map_err(|_| SpError::ConnectionRefused(uri.clone()))?;
    tracing::debug!(endpoint = %uri, "Inproc connection established");
    Ok(Box::new(dialer_end))
  }

  async fn listen(
    &self,
    endpoint: &Endpoint,
    config: &TransportConfig,
  ) -> Result<Box<dyn TransportListener>, SpError> {
    let name = inproc_name(endpoint)?.to_string();
    let (connect_tx, connect_rx) = bounded(INPROC_BACKLOG);
    let binding_id = NEXT_BINDING_ID.fetch_add(1, Ordering::Relaxed);

    {
      let mut bindings = INPROC_BINDINGS.lock();
      if bindings.contains_key(&name) {
        return Err(SpError::AddrInUse(endpoint.to_string()));
      }
      bindings.insert(
        name.clone(),
        InprocBinding {
          binding_id,
          protocol: config.protocol,
          connect_tx,
        },
      );
    }
    tracing::info!(endpoint = %endpoint, "Inproc listener bound");

    Ok(Box::new(InprocListener {
      name,
      binding_id,
      connect_rx,
      shutdown: CloseSignal::new(),
    }))
  }
}

struct InprocListener {
  name: String,
  binding_id: u64,
  connect_rx: Receiver<InprocPipe>,
  shutdown: CloseSignal,
}

impl InprocListener {
  fn unbind(&self) {
    let mut bindings = INPROC_BINDINGS.lock();
    if bindings.get(&self.name).map_or(false, |b| b.binding_id == self.binding_id) {
      bindings.remove(&self.name);
      tracing::debug!(name = %self.name, "Inproc name unbound");
    }
  }
}

#[async_trait]
impl TransportListener for InprocListener {
  async fn accept(&self) -> Result<Box<dyn TransportPipe>, SpError> {
    tokio::select! {
      biased;
      _ = self.shutdown.wait() => Err(SpError::Closed),
      res = self.connect_rx.recv() => match res {
        Ok(pipe) => Ok(Box::new(pipe) as Box<dyn TransportPipe>),
        Err(_) => Err(SpError::Closed),
      },
    }
  }

  async fn close(&self) -> Result<(), SpError> {
    if self.shutdown.fire() {
      self.unbind();
      self.connect_rx.close();
    }
    Ok(())
  }

  fn local_addr(&self) -> String {
    format!("inproc://{}", self.name)
  }
}

impl Drop for InprocListener {
  fn drop(&mut self) {
    self.unbind();
  }
}

/// One end of an inproc connection.
struct InprocPipe {
  tx: Sender<Msg>,
  rx: Receiver<Msg>,
  remote: String,
  closed: CloseSignal,
}

#[async_trait]
impl TransportPipe for InprocPipe {
  async fn send(&self, msg: Msg) -> Result<(), SpError> {
    if self.closed.is_fired() {
      return Err(SpError::ConnectionClosed);
    }
    // Flatten so the receiver sees exactly what a stream transport would deliver.
    let wire = Msg::from_bytes(msg.into_wire());
    self.tx.send(wire).await.map_err(|_| SpError::ConnectionClosed)
  }

  async fn recv(&self) -> Result<Msg, SpError> {
    // Messages still queued for a locally closed end are discarded. The peer
    // closing first leaves what it already sent readable.
    if self.closed.is_fired() {
      return Err(SpError::ConnectionClosed);
    }
    self.rx.recv().await.map_err(|_| SpError::ConnectionClosed)
  }

  async fn close(&self) -> Result<(), SpError> {
    self.closed.fire();
    // Closing both channels wakes blocked calls on this end and the peer's.
    self.tx.close();
    self.rx.close();
    Ok(())
  }

  fn remote_addr(&self) -> String {
    self.remote.clone()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::transport::parse_endpoint;
  use std::time::Duration;

  fn unique(name: &str) -> Endpoint {
    parse_endpoint(&format!("inproc://unit-{}-{}", name, std::process::id())).unwrap()
  }

  #[tokio::test]
  async fn dial_unbound_name_is_refused() {
    let res = InprocTransport.dial(&unique("nobody"), &TransportConfig::default()).await;
    assert!(matches!(res, Err(SpError::ConnectionRefused(_))));
  }

  #[tokio::test]
  async fn double_bind_is_rejected_until_close() {
    let ep = unique("double");
    let config = TransportConfig::default();
    let first = InprocTransport.listen(&ep, &config).await.unwrap();
    assert!(matches!(
      InprocTransport.listen(&ep, &config).await,
      Err(SpError::AddrInUse(_))
    ));
    first.close().await.unwrap();
    let second = InprocTransport.listen(&ep, &config).await.unwrap();
    second.close().await.unwrap();
  }

  #[tokio::test]
  async fn close_wakes_both_ends() {
    let ep = unique("wake");
    let config = TransportConfig::default();
    let listener = InprocTransport.listen(&ep, &config).await.unwrap();
    let dialed = InprocTransport.dial(&ep, &config).await.unwrap();
    let accepted = listener.accept().await.unwrap();

    let mut header_msg = Msg::from_static(b"body");
    header_msg.set_header(bytes::Bytes::from_static(b"hd"));
    dialed.send(header_msg).await.unwrap();
    let got = accepted.recv().await.unwrap();
    assert!(got.header().is_empty());
    assert_eq!(got.body(), b"hdbody");

    let accepted = std::sync::Arc::new(accepted);
    let blocked = {
      let accepted = accepted.clone();
      tokio::spawn(async move { accepted.recv().await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    dialed.close().await.unwrap();
    let res = tokio::time::timeout(Duration::from_millis(200), blocked).await.unwrap().unwrap();
    assert!(matches!(res, Err(SpError::ConnectionClosed)));
    assert!(accepted.send(Msg::new()).await.is_err());
    listener.close().await.unwrap();
  }

  #[tokio::test]
  async fn recv_after_local_close_discards_queued_messages() {
    let ep = unique("queued");
    let config = TransportConfig::default();
    let listener = InprocTransport.listen(&ep, &config).await.unwrap();
    let dialed = InprocTransport.dial(&ep, &config).await.unwrap();
    let accepted = listener.accept().await.unwrap();

    dialed.send(Msg::from_static(b"first")).await.unwrap();
    dialed.send(Msg::from_static(b"second")).await.unwrap();
    accepted.close().await.unwrap();
    assert!(matches!(accepted.recv().await, Err(SpError::ConnectionClosed)));
    assert!(matches!(accepted.send(Msg::new()).await, Err(SpError::ConnectionClosed)));
    assert!(matches!(dialed.send(Msg::new()).await, Err(SpError::ConnectionClosed)));
    listener.close().await.unwrap();
  }

  #[tokio::test]
  async fn peer_close_leaves_sent_messages_readable() {
    let ep = unique("drain");
    let config = TransportConfig::default();
    let listener = InprocTransport.listen(&ep, &config).await.unwrap();
    let dialed = InprocTransport.dial(&ep, &config).await.unwrap();
    let accepted = listener.accept().await.unwrap();

    dialed.send(Msg::from_static(b"last words")).await.unwrap();
    dialed.close().await.unwrap();
    assert_eq!(accepted.recv().await.unwrap().body(), b"last words");
    assert!(matches!(accepted.recv().await, Err(SpError::ConnectionClosed)));
    listener.close().await.unwrap();
  }

  #[tokio::test]
  async fn incompatible_protocols_are_rejected() {
    let ep = unique("proto");
    let listener = InprocTransport.listen(&ep, &TransportConfig::default()).await.unwrap();
    let req = TransportConfig {
      protocol: ProtocolIds::new(0x30, 0x31),
      ..Default::default()
    };
    assert!(matches!(
      InprocTransport.dial(&ep, &req).await,
      Err(SpError::ProtocolViolation(_))
    ));
    listener.close().await.unwrap();
  }
}
