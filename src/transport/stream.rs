// src/transport/stream.rs

//! A [`TransportPipe`] over any byte stream, shared by TCP and IPC.

use super::TransportPipe;
use crate::error::SpError;
use crate::message::Msg;
use crate::protocol::sp::SpCodec;
use crate::runtime::CloseSignal;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite};

pub(crate) struct StreamPipe<S> {
  reader: Mutex<FramedRead<ReadHalf<S>, SpCodec>>,
  writer: Mutex<FramedWrite<WriteHalf<S>, SpCodec>>,
  shutdown: CloseSignal,
  remote: String,
}

impl<S> StreamPipe<S>
where
  S: AsyncRead + AsyncWrite + Send + 'static,
{
  /// Wraps a stream whose SP header exchange has already completed.
  pub(crate) fn new(stream: S, remote: String, max_recv_size: usize) -> Self {
    let (read_half, write_half) = tokio::io::split(stream);
    Self {
      reader: Mutex::new(FramedRead::new(read_half, SpCodec::new(max_recv_size))),
      writer: Mutex::new(FramedWrite::new(write_half, SpCodec::new(max_recv_size))),
      shutdown: CloseSignal::new(),
      remote,
    }
  }
}

#[async_trait]
impl<S> TransportPipe for StreamPipe<S>
where
  S: AsyncRead + AsyncWrite + Send + 'static,
{
  async fn send(&self, msg: Msg) -> Result<(), SpError> {
    let mut writer = tokio::select! {
      biased;
      _ = self.shutdown.wait() => return Err(SpError::ConnectionClosed),
      guard = self.writer.lock() => guard,
    };
    tokio::select! {
      biased;
      _ = self.shutdown.wait() => Err(SpError::ConnectionClosed),
      res = writer.send(msg) => res,
    }
  }

  async fn recv(&self) -> Result<Msg, SpError> {
    let mut reader = tokio::select! {
      biased;
      _ = self.shutdown.wait() => return Err(SpError::ConnectionClosed),
      guard = self.reader.lock() => guard,
    };
    tokio::select! {
      biased;
      _ = self.shutdown.wait() => Err(SpError::ConnectionClosed),
      frame = reader.next() => match frame {
        Some(res) => res,
        None => Err(SpError::ConnectionClosed),
      },
    }
  }

  async fn close(&self) -> Result<(), SpError> {
    if !self.shutdown.fire() {
      return Ok(());
    }
    // In-flight calls bail out on the signal and release the writer lock.
    let mut writer = self.writer.lock().await;
    if let Err(e) = writer.get_mut().shutdown().await {
      tracing::trace!(remote = %self.remote, error = %e, "Stream shutdown failed");
    }
    Ok(())
  }

  fn remote_addr(&self) -> String {
    self.remote.clone()
  }
}
