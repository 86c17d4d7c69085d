// src/socket/core.rs

use crate::error::SpError;
use crate::message::Msg;
use crate::pipe::{Pipe, PipeOwner, PipeRegistry};
use crate::protocol::sp::ProtocolIds;
use crate::runtime::{CloseSignal, WaitGroup};
use crate::socket::options::{OptionValue, SocketOptions, TransportConfig};
use crate::socket::ISocket;
use crate::transport::{parse_endpoint, Endpoint, Transport, TransportListener, TransportPipe};

use async_channel::{Receiver, Sender};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Notify;

/// Inbound messages buffered between pipe readers and `recv`.
pub const RECV_QUEUE_CAPACITY: usize = 128;
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

static NEXT_SOCKET_HANDLE: AtomicUsize = AtomicUsize::new(1);

/// Mutable socket state, guarded by one lock never held across an await.
struct CoreState {
  closed: bool,
  /// The pipe set; each pipe's slot hint is its index here.
  pipes: Vec<Arc<Pipe>>,
  next_send: usize,
  listeners: Vec<Arc<dyn TransportListener>>,
  transports: HashMap<&'static str, Arc<dyn Transport>>,
  options: SocketOptions,
}

impl CoreState {
  fn ensure_open(&self) -> Result<(), SpError> {
    if self.closed {
      Err(SpError::Closed)
    } else {
      Ok(())
    }
  }

  /// Round-robin over pipes that have not started closing.
  fn next_pipe(&mut self) -> Option<Arc<Pipe>> {
    let len = self.pipes.len();
    for _ in 0..len {
      let idx = self.next_send % len;
      self.next_send = self.next_send.wrapping_add(1);
      let pipe = &self.pipes[idx];
      if !pipe.is_closing() {
        return Some(pipe.clone());
      }
    }
    None
  }

  fn resolve(&self, endpoint_str: &str) -> Result<(Endpoint, Arc<dyn Transport>, TransportConfig), SpError> {
    self.ensure_open()?;
    let endpoint = parse_endpoint(endpoint_str)?;
    let transport = self
      .transports
      .get(endpoint.scheme())
      .cloned()
      .ok_or_else(|| SpError::UnsupportedTransport(endpoint_str.to_string()))?;
    Ok((endpoint, transport, self.options.transport_config()))
  }
}

/// A protocol-agnostic socket: owns a pipe set, dials and listens through
/// registered transports, sends round-robin and receives fair-queued.
pub struct SocketCore {
  handle: usize,
  weak_self: Weak<SocketCore>,
  registry: PipeRegistry,
  state: Mutex<CoreState>,
  recv_tx: Sender<Msg>,
  recv_rx: Receiver<Msg>,
  close_signal: CloseSignal,
  pipe_added: Notify,
  tasks: WaitGroup,
}

impl SocketCore {
  pub(crate) fn new(protocol: ProtocolIds, registry: PipeRegistry) -> Arc<Self> {
    let handle = NEXT_SOCKET_HANDLE.fetch_add(1, Ordering::Relaxed);
    let (recv_tx, recv_rx) = async_channel::bounded(RECV_QUEUE_CAPACITY);
    let options = SocketOptions {
      protocol,
      ..Default::default()
    };
    tracing::debug!(socket_handle = handle, protocol = protocol.local, "Socket created");

    Arc::new_cyclic(|weak_self| SocketCore {
      handle,
      weak_self: weak_self.clone(),
      registry,
      state: Mutex::new(CoreState {
        closed: false,
        pipes: Vec::new(),
        next_send: 0,
        listeners: Vec::new(),
        transports: HashMap::new(),
        options,
      }),
      recv_tx,
      recv_rx,
      close_signal: CloseSignal::new(),
      pipe_added: Notify::new(),
      tasks: WaitGroup::new(),
    })
  }

  pub fn handle(&self) -> usize {
    self.handle
  }

  pub fn pipes(&self) -> Vec<Arc<Pipe>> {
    self.state.lock().pipes.clone()
  }

  pub fn pipe_count(&self) -> usize {
    self.state.lock().pipes.len()
  }

  /// Registers a fresh transport pipe and adds it to the pipe set.
  async fn attach(&self, transport_pipe: Box<dyn TransportPipe>) -> Result<Arc<Pipe>, SpError> {
    let owner: Weak<dyn PipeOwner> = self.weak_self.clone();
    let pipe = self.registry.register(transport_pipe, owner)?;
    self.add_pipe(pipe.clone()).await?;
    Ok(pipe)
  }

  async fn add_pipe(&self, pipe: Arc<Pipe>) -> Result<(), SpError> {
    let added = {
      let mut state = self.state.lock();
      // Checked under the state lock: a pipe that starts closing after this
      // point will find itself in the set when rem_pipe runs.
      if state.closed || pipe.is_closing() {
        false
      } else {
        pipe.set_slot(state.pipes.len());
        state.pipes.push(pipe.clone());
        true
      }
    };
    if !added {
      let _ = pipe.close().await;
      return Err(SpError::Closed);
    }

    tracing::debug!(
      socket_handle = self.handle,
      pipe_id = pipe.id(),
      remote = %pipe.remote_addr(),
      "Pipe attached"
    );
    self.pipe_added.notify_waiters();
    self.spawn_tracked(run_pipe_reader(self.handle, pipe, self.recv_tx.clone()));
    Ok(())
  }

  fn spawn_tracked<F>(&self, fut: F)
  where
    F: std::future::Future<Output = ()> + Send + 'static,
  {
    let token = self.tasks.enter();
    tokio::spawn(async move {
      let _token = token;
      fut.await;
    });
  }
}

#[async_trait]
impl ISocket for SocketCore {
  async fn close(&self) -> Result<(), SpError> {
    let (pipes, listeners, linger) = {
      let mut state = self.state.lock();
      state.ensure_open()?;
      state.closed = true;
      (
        std::mem::take(&mut state.pipes),
        std::mem::take(&mut state.listeners),
        state.options.linger,
      )
    };
    tracing::debug!(
      socket_handle = self.handle,
      pipes = pipes.len(),
      listeners = listeners.len(),
      "Closing socket"
    );

    self.close_signal.fire();
    self.pipe_added.notify_waiters();

    for listener in &listeners {
      let _ = listener.close().await;
    }
    for pipe in &pipes {
      pipe.clear_slot();
      let _ = pipe.close().await;
    }
    self.recv_tx.close();

    let drained = match linger {
      None => {
        self.tasks.wait().await;
        true
      }
      Some(limit) => tokio::time::timeout(limit, self.tasks.wait()).await.is_ok(),
    };
    if !drained {
      tracing::warn!(
        socket_handle = self.handle,
        linger_ms = linger.map(|l| l.as_millis() as u64),
        "Background tasks still running after linger period"
      );
    }
    tracing::debug!(socket_handle = self.handle, "Socket closed");
    Ok(())
  }

  async fn send_msg(&self, msg: Msg) -> Result<(), SpError> {
    let deadline = {
      let state = self.state.lock();
      state.ensure_open()?;
      state.options.sndtimeo.map(|d| tokio::time::Instant::now() + d)
    };

    let pipe = loop {
      let notified = self.pipe_added.notified();
      {
        let mut state = self.state.lock();
        state.ensure_open()?;
        if let Some(pipe) = state.next_pipe() {
          break pipe;
        }
      }
      match deadline {
        None => notified.await,
        Some(deadline) => {
          if tokio::time::timeout_at(deadline, notified).await.is_err() {
            return Err(SpError::NoPipeAvailable);
          }
        }
      }
    };

    tracing::trace!(socket_handle = self.handle, pipe_id = pipe.id(), size = msg.size(), "Sending message");
    pipe.send_msg(msg).await
  }

  async fn recv_msg(&self) -> Result<Msg, SpError> {
    let timeout = {
      let state = self.state.lock();
      state.ensure_open()?;
      state.options.rcvtimeo
    };
    let received = match timeout {
      None => self.recv_rx.recv().await,
      Some(limit) => tokio::time::timeout(limit, self.recv_rx.recv())
        .await
        .map_err(|_| SpError::Timeout)?,
    };
    received.map_err(|_| SpError::Closed)
  }

  async fn dial(&self, endpoint: &str) -> Result<(), SpError> {
    let (endpoint_parsed, transport, _) = self.state.lock().resolve(endpoint)?;
    if endpoint_parsed.is_wildcard() {
      return Err(SpError::InvalidEndpoint(endpoint.to_string()));
    }

    tracing::debug!(socket_handle = self.handle, endpoint = %endpoint_parsed, "Starting dialer");
    self.spawn_tracked(run_dialer(
      self.handle,
      self.weak_self.clone(),
      endpoint_parsed,
      transport,
      self.close_signal.clone(),
    ));
    Ok(())
  }

  async fn listen(&self, endpoint: &str) -> Result<(), SpError> {
    let (endpoint_parsed, transport, config) = self.state.lock().resolve(endpoint)?;
    let listener: Arc<dyn TransportListener> = Arc::from(transport.listen(&endpoint_parsed, &config).await?);

    let accepted = {
      let mut state = self.state.lock();
      if state.closed {
        false
      } else {
        state.listeners.push(listener.clone());
        state.options.last_endpoint = listener.local_addr();
        true
      }
    };
    if !accepted {
      let _ = listener.close().await;
      return Err(SpError::Closed);
    }

    tracing::debug!(
      socket_handle = self.handle,
      endpoint = %endpoint_parsed,
      local = %listener.local_addr(),
      "Listening"
    );
    self.spawn_tracked(run_acceptor(
      self.handle,
      self.weak_self.clone(),
      listener,
      self.close_signal.clone(),
    ));
    Ok(())
  }

  fn get_option(&self, name: &str) -> Result<OptionValue, SpError> {
    let state = self.state.lock();
    state.ensure_open()?;
    state.options.get(name)
  }

  fn set_option(&self, name: &str, value: OptionValue) -> Result<(), SpError> {
    let mut state = self.state.lock();
    state.ensure_open()?;
    tracing::debug!(socket_handle = self.handle, option = name, value = %value, "Setting option");
    state.options.set(name, value)
  }

  fn protocol(&self) -> ProtocolIds {
    self.state.lock().options.protocol
  }

  fn add_transport(&self, transport: Arc<dyn Transport>) -> Result<(), SpError> {
    let mut state = self.state.lock();
    state.ensure_open()?;
    let scheme = transport.scheme();
    if state.transports.insert(scheme, transport).is_some() {
      tracing::debug!(socket_handle = self.handle, scheme, "Replaced transport");
    }
    Ok(())
  }
}

impl PipeOwner for SocketCore {
  fn rem_pipe(&self, pipe: &Pipe) {
    let mut state = self.state.lock();
    let Some(slot) = pipe.slot() else {
      return;
    };
    let owned = state
      .pipes
      .get(slot)
      .map_or(false, |p| std::ptr::eq(Arc::as_ptr(p), pipe));
    if !owned {
      return;
    }
    state.pipes.swap_remove(slot);
    if let Some(moved) = state.pipes.get(slot) {
      moved.set_slot(slot);
    }
    pipe.clear_slot();
    tracing::debug!(
      socket_handle = self.handle,
      pipe_id = pipe.raw_id(),
      remaining = state.pipes.len(),
      "Pipe removed from socket"
    );
  }
}

impl Drop for SocketCore {
  fn drop(&mut self) {
    let state = self.state.get_mut();
    if state.closed {
      return;
    }
    state.closed = true;
    let pipes = std::mem::take(&mut state.pipes);
    let listeners = std::mem::take(&mut state.listeners);
    self.close_signal.fire();
    self.recv_tx.close();
    if pipes.is_empty() && listeners.is_empty() {
      return;
    }

    tracing::debug!(socket_handle = self.handle, pipes = pipes.len(), "Socket dropped without close");
    match tokio::runtime::Handle::try_current() {
      Ok(rt) => {
        rt.spawn(async move {
          for listener in listeners {
            let _ = listener.close().await;
          }
          for pipe in pipes {
            pipe.clear_slot();
            let _ = pipe.close().await;
          }
        });
      }
      // Outside a runtime the transports are simply dropped.
      Err(_) => tracing::debug!("No runtime available to close pipes of dropped socket"),
    }
  }
}

impl fmt::Debug for SocketCore {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SocketCore")
      .field("handle", &self.handle)
      .field("registry", &self.registry)
      .finish_non_exhaustive()
  }
}

/// Feeds one pipe's inbound messages into the socket's receive queue until the pipe dies.
async fn run_pipe_reader(socket_handle: usize, pipe: Arc<Pipe>, recv_tx: Sender<Msg>) {
  let pipe_id = pipe.id();
  while let Some(msg) = pipe.recv_msg().await {
    tracing::trace!(socket_handle, pipe_id, size = msg.size(), "Message received");
    if recv_tx.send(msg).await.is_err() {
      break;
    }
  }
  let _ = pipe.close().await;
  tracing::trace!(socket_handle, pipe_id, "Pipe reader finished");
}

/// Keeps one outbound pipe alive: dial, attach, wait for it to die, repeat.
async fn run_dialer(
  socket_handle: usize,
  core: Weak<SocketCore>,
  endpoint: Endpoint,
  transport: Arc<dyn Transport>,
  socket_closed: CloseSignal,
) {
  let mut retry_delay: Option<Duration> = None;

  loop {
    // Re-read every attempt so option changes apply to the next connection.
    let options = match core.upgrade() {
      Some(core) => {
        let options = core.state.lock().options.clone();
        options
      }
      None => break,
    };
    let config = options.transport_config();

    let attempt = tokio::select! {
      biased;
      _ = socket_closed.wait() => break,
      res = transport.dial(&endpoint, &config) => res,
    };

    let delay = match attempt {
      Ok(transport_pipe) => {
        let Some(core) = core.upgrade() else {
          let _ = transport_pipe.close().await;
          break;
        };
        let attached = core.attach(transport_pipe).await;
        drop(core);
        match attached {
          Ok(pipe) => {
            tracing::info!(socket_handle, endpoint = %endpoint, pipe_id = pipe.id(), "Connected");
            tokio::select! {
              biased;
              _ = socket_closed.wait() => break,
              _ = pipe.closed() => {}
            }
            tracing::debug!(socket_handle, endpoint = %endpoint, "Connection lost, will redial");
            retry_delay = None;
            options.reconnect_ivl
          }
          Err(e) => {
            tracing::debug!(socket_handle, endpoint = %endpoint, error = %e, "Could not attach dialed pipe");
            next_retry(&options, &mut retry_delay)
          }
        }
      }
      Err(e) => {
        tracing::debug!(socket_handle, endpoint = %endpoint, error = %e, "Dial attempt failed");
        next_retry(&options, &mut retry_delay)
      }
    };

    tokio::select! {
      biased;
      _ = socket_closed.wait() => break,
      _ = tokio::time::sleep(delay) => {}
    }
  }
  tracing::debug!(socket_handle, endpoint = %endpoint, "Dialer stopped");
}

fn next_retry(options: &SocketOptions, retry_delay: &mut Option<Duration>) -> Duration {
  let delay = match *retry_delay {
    None => options.reconnect_ivl,
    Some(previous) => options.next_reconnect_delay(previous),
  };
  *retry_delay = Some(delay);
  delay
}

/// Turns every inbound connection on `listener` into an attached pipe.
async fn run_acceptor(
  socket_handle: usize,
  core: Weak<SocketCore>,
  listener: Arc<dyn TransportListener>,
  socket_closed: CloseSignal,
) {
  let local = listener.local_addr();
  loop {
    let accepted = tokio::select! {
      biased;
      _ = socket_closed.wait() => break,
      res = listener.accept() => res,
    };
    match accepted {
      Ok(transport_pipe) => {
        let Some(core) = core.upgrade() else {
          let _ = transport_pipe.close().await;
          break;
        };
        if let Err(e) = core.attach(transport_pipe).await {
          tracing::debug!(socket_handle, local = %local, error = %e, "Could not attach accepted pipe");
        }
      }
      Err(SpError::Closed) => break,
      Err(SpError::Io(e)) => {
        tracing::warn!(socket_handle, local = %local, error = %e, "Accept failed");
        tokio::select! {
          biased;
          _ = socket_closed.wait() => break,
          _ = tokio::time::sleep(ACCEPT_ERROR_BACKOFF) => {}
        }
      }
      Err(e) => {
        tracing::debug!(socket_handle, local = %local, error = %e, "Inbound connection rejected");
      }
    }
  }
  let _ = listener.close().await;
  tracing::debug!(socket_handle, local = %local, "Acceptor stopped");
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::pipe::tests::MockTransport;

  fn socket(registry: &PipeRegistry) -> Arc<SocketCore> {
    SocketCore::new(ProtocolIds::PAIR, registry.clone())
  }

  #[tokio::test]
  async fn pipe_close_removes_it_from_the_set() {
    let registry = PipeRegistry::new();
    let core = socket(&registry);
    let a = core.attach(Box::new(MockTransport::default())).await.unwrap();
    let b = core.attach(Box::new(MockTransport::default())).await.unwrap();
    let c = core.attach(Box::new(MockTransport::default())).await.unwrap();
    assert_eq!(core.pipe_count(), 3);

    a.close().await.unwrap();
    assert_eq!(core.pipe_count(), 2);
    // The last pipe was moved into the freed slot.
    assert_eq!(c.slot(), Some(0));
    assert_eq!(b.slot(), Some(1));
    assert_eq!(a.slot(), None);

    // Removing a pipe that is not in the set is a no-op.
    core.rem_pipe(&a);
    assert_eq!(core.pipe_count(), 2);
  }

  #[tokio::test]
  async fn close_is_exactly_once_and_closes_pipes() {
    let registry = PipeRegistry::new();
    let core = socket(&registry);
    let pipe = core.attach(Box::new(MockTransport::default())).await.unwrap();

    core.close().await.unwrap();
    assert!(pipe.is_closing());
    assert_eq!(pipe.id(), 0);
    assert!(registry.is_empty());
    assert!(matches!(core.close().await, Err(SpError::Closed)));
    assert!(matches!(core.send_msg(Msg::new()).await, Err(SpError::Closed)));
    assert!(matches!(core.recv_msg().await, Err(SpError::Closed)));
    assert!(matches!(core.get_option("linger"), Err(SpError::Closed)));
  }

  #[tokio::test]
  async fn attach_after_close_is_refused() {
    let registry = PipeRegistry::new();
    let core = socket(&registry);
    core.close().await.unwrap();
    assert!(matches!(
      core.attach(Box::new(MockTransport::default())).await,
      Err(SpError::Closed)
    ));
    assert!(registry.is_empty());
  }

  #[tokio::test]
  async fn send_without_pipes_times_out() {
    let registry = PipeRegistry::new();
    let core = socket(&registry);
    core
      .set_option(crate::socket::options::SEND_TIMEOUT, Duration::from_millis(20).into())
      .unwrap();
    assert!(matches!(
      core.send_msg(Msg::from_static(b"x")).await,
      Err(SpError::NoPipeAvailable)
    ));
  }

  #[tokio::test]
  async fn protocol_is_fixed_at_creation() {
    let registry = PipeRegistry::new();
    let core = SocketCore::new(ProtocolIds::new(0x30, 0x31), registry);
    assert_eq!(core.protocol(), ProtocolIds::new(0x30, 0x31));
    core.close().await.unwrap();
    assert_eq!(core.protocol().local, 0x30);
  }

  #[tokio::test]
  async fn dial_validates_synchronously() {
    let registry = PipeRegistry::new();
    let core = socket(&registry);
    assert!(matches!(core.dial("tcp://nohost").await, Err(SpError::InvalidEndpoint(_))));
    assert!(matches!(
      core.dial("tcp://127.0.0.1:5555").await,
      Err(SpError::UnsupportedTransport(_))
    ));
    core.add_transport(Arc::new(crate::transport::tcp::TcpTransport)).unwrap();
    assert!(matches!(core.dial("tcp://*:5555").await, Err(SpError::InvalidEndpoint(_))));
  }
}
