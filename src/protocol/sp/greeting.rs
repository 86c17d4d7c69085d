use crate::error::SpError;
use bytes::{BufMut, BytesMut};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::ProtocolIds;

/// Size of the SP connection header: `00 'S' 'P' <version> <proto u16 BE> 00 00`.
pub const GREETING_LEN: usize = 8;
pub const SP_VERSION: u8 = 0;
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

const SIGNATURE: [u8; 3] = [0x00, b'S', b'P'];

/// The 8-byte header each side writes before any message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpGreeting {
  pub version: u8,
  pub protocol: u16,
}

impl SpGreeting {
  pub fn new(protocol: u16) -> Self {
    Self {
      version: SP_VERSION,
      protocol,
    }
  }

  pub fn encode(&self, dst: &mut BytesMut) {
    dst.reserve(GREETING_LEN);
    dst.put_slice(&SIGNATURE);
    dst.put_u8(self.version);
    dst.put_u16(self.protocol);
    dst.put_u16(0); // reserved
  }

  pub fn decode(src: &[u8; GREETING_LEN]) -> Result<Self, SpError> {
    if src[..3] != SIGNATURE {
      return Err(SpError::ProtocolViolation("Invalid SP header signature".into()));
    }
    let version = src[3];
    if version != SP_VERSION {
      return Err(SpError::ProtocolViolation(format!("Unsupported SP version {}", version)));
    }
    if src[6] != 0 || src[7] != 0 {
      return Err(SpError::ProtocolViolation("Reserved SP header bytes are non-zero".into()));
    }
    Ok(Self {
      version,
      protocol: u16::from_be_bytes([src[4], src[5]]),
    })
  }
}

/// Exchanges SP headers over a fresh stream and checks protocol compatibility.
///
/// Both sides write first and then read, so the exchange cannot deadlock.
pub(crate) async fn exchange_greetings<S>(stream: &mut S, protocol: ProtocolIds) -> Result<SpGreeting, SpError>
where
  S: AsyncRead + AsyncWrite + Unpin,
{
  let exchange = async {
    let mut out = BytesMut::with_capacity(GREETING_LEN);
    SpGreeting::new(protocol.local).encode(&mut out);
    stream.write_all(&out).await?;
    stream.flush().await?;

    let mut raw = [0u8; GREETING_LEN];
    stream.read_exact(&mut raw).await.map_err(|e| match e.kind() {
      std::io::ErrorKind::UnexpectedEof => SpError::ConnectionClosed,
      _ => SpError::Io(e),
    })?;
    SpGreeting::decode(&raw)
  };

  let peer = tokio::time::timeout(HANDSHAKE_TIMEOUT, exchange)
    .await
    .map_err(|_| SpError::Timeout)??;

  if peer.protocol != protocol.peer {
    return Err(SpError::ProtocolViolation(format!(
      "Peer announced protocol {:#x}, expected {:#x}",
      peer.protocol, protocol.peer
    )));
  }
  tracing::trace!(peer_protocol = peer.protocol, "SP header exchange complete");
  Ok(peer)
}
