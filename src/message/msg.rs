use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// A single SP message: optional protocol header bytes followed by the body.
///
/// Transports deliver everything they read in the body; raw-mode protocol code
/// moves leading bytes into the header itself. The `remote` field is stamped by
/// the pipe that received the message.
#[derive(Clone, Default)]
pub struct Msg {
  header: Bytes,
  body: Bytes,
  remote: Option<String>,
}

impl Msg {
  /// Creates an empty message.
  pub fn new() -> Self {
    Self::default()
  }

  /// Creates a message from a `Vec<u8>`, taking ownership.
  pub fn from_vec(body: Vec<u8>) -> Self {
    Self {
      body: Bytes::from(body),
      ..Default::default()
    }
  }

  /// Creates a message from `bytes::Bytes`.
  pub fn from_bytes(body: Bytes) -> Self {
    Self {
      body,
      ..Default::default()
    }
  }

  /// Creates a message from a static byte slice (zero-copy).
  pub fn from_static(body: &'static [u8]) -> Self {
    Self {
      body: Bytes::from_static(body),
      ..Default::default()
    }
  }

  pub fn header(&self) -> &[u8] {
    &self.header
  }

  pub fn set_header(&mut self, header: impl Into<Bytes>) {
    self.header = header.into();
  }

  pub fn body(&self) -> &[u8] {
    &self.body
  }

  pub fn set_body(&mut self, body: impl Into<Bytes>) {
    self.body = body.into();
  }

  /// Consumes the message, returning the body bytes.
  pub fn into_body(self) -> Bytes {
    self.body
  }

  /// Total number of bytes carried (header plus body).
  pub fn size(&self) -> usize {
    self.header.len() + self.body.len()
  }

  /// Address of the peer this message arrived from, if it came off a pipe.
  pub fn remote(&self) -> Option<&str> {
    self.remote.as_deref()
  }

  pub(crate) fn set_remote(&mut self, remote: String) {
    self.remote = Some(remote);
  }

  /// Returns header and body as one contiguous buffer, the way they travel on the wire.
  pub(crate) fn into_wire(self) -> Bytes {
    if self.header.is_empty() {
      return self.body;
    }
    let mut buf = BytesMut::with_capacity(self.size());
    buf.put_slice(&self.header);
    buf.put_slice(&self.body);
    buf.freeze()
  }
}

impl From<Vec<u8>> for Msg {
  fn from(body: Vec<u8>) -> Self {
    Msg::from_vec(body)
  }
}

impl From<Bytes> for Msg {
  fn from(body: Bytes) -> Self {
    Msg::from_bytes(body)
  }
}

impl fmt::Debug for Msg {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Msg")
      .field("header", &format!("{} bytes", self.header.len()))
      .field("body", &format!("{} bytes", self.body.len())) // Avoid printing large data
      .field("remote", &self.remote)
      .finish()
  }
}
