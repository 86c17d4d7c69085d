//! SP (scalability protocols) stream framing: connection header and message codec.

pub mod codec;
pub mod greeting;

pub use codec::SpCodec;
pub use greeting::{SpGreeting, GREETING_LEN};

/// Protocol numbers a socket announces for itself and expects from its peer.
///
/// Numbers follow the SP convention of `major * 16 + minor` (e.g. PAIR is 0x10).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProtocolIds {
  pub local: u16,
  pub peer: u16,
}

impl ProtocolIds {
  pub const PAIR: ProtocolIds = ProtocolIds::new(0x10, 0x10);

  pub const fn new(local: u16, peer: u16) -> Self {
    Self { local, peer }
  }

  /// True if a peer announcing `other` may talk to us and we may talk to it.
  pub fn accepts(&self, other: &ProtocolIds) -> bool {
    self.peer == other.local && other.peer == self.local
  }
}

impl Default for ProtocolIds {
  fn default() -> Self {
    ProtocolIds::PAIR
  }
}
