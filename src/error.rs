use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive] // Allows adding more variants later without breaking change
pub enum SpError {
  // --- I/O Errors ---
  #[error("I/O error: {0}")]
  Io(#[from] io::Error),

  // --- Endpoint Errors ---
  #[error("Invalid endpoint format: {0}")]
  InvalidEndpoint(String),
  #[error("Transport scheme not supported or not registered: {0}")]
  UnsupportedTransport(String),

  // --- Connection/Binding Errors ---
  #[error("Address already in use: {0}")]
  AddrInUse(String),
  #[error("Connection refused by peer: {0}")]
  ConnectionRefused(String),
  #[error("Connection closed by peer or transport")]
  ConnectionClosed,

  // --- State Errors ---
  #[error("Object is closed")]
  Closed,
  #[error("No pipe available to carry the message")]
  NoPipeAvailable,
  #[error("Operation timed out")]
  Timeout,

  // --- Option Errors ---
  #[error("Socket option not supported: {0}")]
  UnsupportedOption(String),
  #[error("Invalid value provided for option {0}")]
  InvalidOptionValue(String),
  #[error("Socket option is read-only: {0}")]
  ReadOnlyOption(String),

  // --- Protocol Errors ---
  #[error("SP protocol violation: {0}")]
  ProtocolViolation(String),
  #[error("Message of {size} bytes exceeds the receive limit of {max} bytes")]
  MessageTooLarge { size: u64, max: usize },

  // --- Resource Limits ---
  #[error("Pipe identifier space exhausted ({live} live pipes)")]
  IdentifiersExhausted { live: usize },
}

impl SpError {
  /// Maps common `std::io::Error` kinds onto endpoint-aware variants.
  pub fn from_io_endpoint(e: io::Error, endpoint: &str) -> Self {
    match e.kind() {
      io::ErrorKind::AddrInUse => SpError::AddrInUse(endpoint.to_string()),
      io::ErrorKind::ConnectionRefused => SpError::ConnectionRefused(endpoint.to_string()),
      io::ErrorKind::TimedOut => SpError::Timeout,
      io::ErrorKind::ConnectionReset | io::ErrorKind::BrokenPipe | io::ErrorKind::UnexpectedEof => {
        SpError::ConnectionClosed
      }
      _ => SpError::Io(e),
    }
  }
}
