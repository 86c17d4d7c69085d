use crate::error::SpError;
use crate::message::Msg;
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

const LENGTH_PREFIX: usize = 8;
/// Hard ceiling on a frame length, applied even when `max_recv_size` is 0.
pub const MAX_FRAME_SIZE: u64 = isize::MAX as u64;
/// The read buffer grows by at most this much per partial frame.
const RESERVE_CHUNK: usize = 64 * 1024;

/// Codec for SP stream framing: a 64-bit big-endian length, then the payload.
///
/// Outbound messages are written as header bytes followed by body bytes.
/// Inbound payloads land entirely in the message body.
#[derive(Debug, Clone)]
pub struct SpCodec {
  /// Largest accepted inbound payload; 0 disables the check.
  max_recv_size: usize,
  pending: Option<u64>,
}

impl SpCodec {
  pub fn new(max_recv_size: usize) -> Self {
    Self {
      max_recv_size,
      pending: None,
    }
  }
}

impl Decoder for SpCodec {
  type Item = Msg;
  type Error = SpError;

  fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Msg>, SpError> {
    let size = match self.pending {
      Some(size) => size,
      None => {
        if src.len() < LENGTH_PREFIX {
          return Ok(None);
        }
        let size = src.get_u64();
        if self.max_recv_size > 0 && size > self.max_recv_size as u64 {
          return Err(SpError::MessageTooLarge {
            size,
            max: self.max_recv_size,
          });
        }
        if size > MAX_FRAME_SIZE {
          return Err(SpError::MessageTooLarge {
            size,
            max: MAX_FRAME_SIZE as usize,
          });
        }
        self.pending = Some(size);
        size
      }
    };

    let size = usize::try_from(size).map_err(|_| SpError::MessageTooLarge {
      size,
      max: usize::MAX,
    })?;
    if src.len() < size {
      // Trust the peer's length only as far as bytes actually arrive.
      src.reserve((size - src.len()).min(RESERVE_CHUNK));
      return Ok(None);
    }
    self.pending = None;
    Ok(Some(Msg::from_bytes(src.split_to(size).freeze())))
  }
}

impl Encoder<Msg> for SpCodec {
  type Error = SpError;

  fn encode(&mut self, item: Msg, dst: &mut BytesMut) -> Result<(), SpError> {
    dst.reserve(LENGTH_PREFIX + item.size());
    dst.put_u64(item.size() as u64);
    dst.put_slice(item.header());
    dst.put_slice(item.body());
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use bytes::Bytes;

  #[test]
  fn decodes_across_partial_reads() {
    let mut codec = SpCodec::new(0);
    let mut buf = BytesMut::new();
    buf.put_u64(5);
    buf.put_slice(b"he");
    assert!(codec.decode(&mut buf).unwrap().is_none());
    buf.put_slice(b"llo");
    let msg = codec.decode(&mut buf).unwrap().expect("complete frame");
    assert_eq!(msg.body(), b"hello");
    assert!(msg.header().is_empty());
    assert!(buf.is_empty());
  }

  #[test]
  fn encodes_header_then_body() {
    let mut codec = SpCodec::new(0);
    let mut msg = Msg::from_static(b"body");
    msg.set_header(Bytes::from_static(b"hd"));
    let mut buf = BytesMut::new();
    codec.encode(msg, &mut buf).unwrap();
    assert_eq!(&buf[..], b"\x00\x00\x00\x00\x00\x00\x00\x06hdbody");
  }

  #[test]
  fn rejects_oversized_frames() {
    let mut codec = SpCodec::new(4);
    let mut buf = BytesMut::new();
    buf.put_u64(5);
    buf.put_slice(b"12345");
    assert!(matches!(
      codec.decode(&mut buf),
      Err(SpError::MessageTooLarge { size: 5, max: 4 })
    ));
  }

  #[test]
  fn unlimited_size_still_bounds_allocation() {
    let mut codec = SpCodec::new(0);
    let mut buf = BytesMut::new();
    buf.put_u64(u64::MAX >> 1);
    buf.put_slice(b"abc");
    assert!(codec.decode(&mut buf).unwrap().is_none());
    assert!(buf.capacity() < 4 * RESERVE_CHUNK);

    let mut codec = SpCodec::new(0);
    let mut buf = BytesMut::new();
    buf.put_u64(u64::MAX);
    assert!(matches!(
      codec.decode(&mut buf),
      Err(SpError::MessageTooLarge { size: u64::MAX, .. })
    ));
  }

  #[test]
  fn zero_length_frames_are_valid() {
    let mut codec = SpCodec::new(16);
    let mut buf = BytesMut::new();
    buf.put_u64(0);
    let msg = codec.decode(&mut buf).unwrap().expect("empty frame");
    assert_eq!(msg.size(), 0);
  }
}
