//! spcore - pipe lifecycle and socket plumbing for scalability-protocol messaging on Tokio.

pub mod error;
pub mod message;
pub mod pipe;
pub mod protocol;
pub mod runtime;
pub mod socket;
pub mod transport;

// Re-export core types for user convenience
pub use error::SpError;
pub use message::Msg;
pub use pipe::{Pipe, PipeOwner, PipeRegistry};
pub use protocol::sp::ProtocolIds;
pub use socket::{ISocket, OptionValue, Socket};
pub use transport::{Transport, TransportListener, TransportPipe};

// --- Top-Level Functions ---

const VERSION_MAJOR: i32 = 0;
const VERSION_MINOR: i32 = 1;
const VERSION_PATCH: i32 = 0;

/// Returns the library version as a tuple (major, minor, patch).
pub fn version() -> (i32, i32, i32) {
  (VERSION_MAJOR, VERSION_MINOR, VERSION_PATCH)
}

pub fn version_major() -> i32 {
  VERSION_MAJOR
}

pub fn version_minor() -> i32 {
  VERSION_MINOR
}

pub fn version_patch() -> i32 {
  VERSION_PATCH
}

/// Creates a PAIR socket with every compiled-in transport registered.
pub fn socket() -> Result<Socket, SpError> {
  let socket = Socket::new();
  transport::add_all(&socket)?;
  Ok(socket)
}
