// src/socket/options.rs

use std::fmt;
use std::time::Duration;

use crate::protocol::sp::ProtocolIds;
use crate::SpError;

// Option names understood by `Socket::get_option` / `Socket::set_option`.
pub const RECV_TIMEOUT: &str = "recv-timeout";
pub const SEND_TIMEOUT: &str = "send-timeout";
pub const LINGER: &str = "linger";
pub const RECONNECT_IVL: &str = "reconnect-interval";
pub const RECONNECT_IVL_MAX: &str = "reconnect-interval-max";
pub const MAX_RECV_SIZE: &str = "max-recv-size";
pub const TCP_NODELAY: &str = "tcp-nodelay";
pub const TCP_KEEPALIVE: &str = "tcp-keepalive";
/// Read-only: local address of the most recent successful `listen`.
pub const LAST_ENDPOINT: &str = "last-endpoint";

pub const DEFAULT_RECONNECT_IVL: Duration = Duration::from_millis(100);
pub const DEFAULT_LINGER: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_RECV_SIZE: usize = 1024 * 1024;

/// A typed option value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
  /// `None` means "no limit" / "disabled" depending on the option.
  Duration(Option<Duration>),
  Size(usize),
  Bool(bool),
  Str(String),
}

impl fmt::Display for OptionValue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      OptionValue::Duration(Some(d)) => write!(f, "{:?}", d),
      OptionValue::Duration(None) => f.write_str("none"),
      OptionValue::Size(n) => write!(f, "{}", n),
      OptionValue::Bool(b) => write!(f, "{}", b),
      OptionValue::Str(s) => f.write_str(s),
    }
  }
}

impl From<Duration> for OptionValue {
  fn from(d: Duration) -> Self {
    OptionValue::Duration(Some(d))
  }
}

impl From<Option<Duration>> for OptionValue {
  fn from(d: Option<Duration>) -> Self {
    OptionValue::Duration(d)
  }
}

impl From<usize> for OptionValue {
  fn from(n: usize) -> Self {
    OptionValue::Size(n)
  }
}

impl From<bool> for OptionValue {
  fn from(b: bool) -> Self {
    OptionValue::Bool(b)
  }
}

/// Holds parsed and validated socket options.
#[derive(Debug, Clone)]
pub(crate) struct SocketOptions {
  pub rcvtimeo: Option<Duration>,
  pub sndtimeo: Option<Duration>,
  /// How long `close` waits for background tasks; `None` waits indefinitely.
  pub linger: Option<Duration>,
  pub reconnect_ivl: Duration,
  /// Enables exponential backoff between retries, capped at this value.
  pub reconnect_ivl_max: Option<Duration>,
  pub max_recv_size: usize,
  pub tcp_nodelay: bool,
  pub tcp_keepalive: Option<Duration>,
  pub last_endpoint: String,
  pub protocol: ProtocolIds,
}

impl Default for SocketOptions {
  fn default() -> Self {
    Self {
      rcvtimeo: None,
      sndtimeo: None,
      linger: Some(DEFAULT_LINGER),
      reconnect_ivl: DEFAULT_RECONNECT_IVL,
      reconnect_ivl_max: None,
      max_recv_size: DEFAULT_MAX_RECV_SIZE,
      tcp_nodelay: true,
      tcp_keepalive: None,
      last_endpoint: String::new(),
      protocol: ProtocolIds::default(),
    }
  }
}

impl SocketOptions {
  pub fn get(&self, name: &str) -> Result<OptionValue, SpError> {
    let value = match name {
      RECV_TIMEOUT => OptionValue::Duration(self.rcvtimeo),
      SEND_TIMEOUT => OptionValue::Duration(self.sndtimeo),
      LINGER => OptionValue::Duration(self.linger),
      RECONNECT_IVL => OptionValue::Duration(Some(self.reconnect_ivl)),
      RECONNECT_IVL_MAX => OptionValue::Duration(self.reconnect_ivl_max),
      MAX_RECV_SIZE => OptionValue::Size(self.max_recv_size),
      TCP_NODELAY => OptionValue::Bool(self.tcp_nodelay),
      TCP_KEEPALIVE => OptionValue::Duration(self.tcp_keepalive),
      LAST_ENDPOINT => OptionValue::Str(self.last_endpoint.clone()),
      _ => return Err(SpError::UnsupportedOption(name.to_string())),
    };
    Ok(value)
  }

  pub fn set(&mut self, name: &str, value: OptionValue) -> Result<(), SpError> {
    match name {
      RECV_TIMEOUT => self.rcvtimeo = parse_duration_option(name, value)?,
      SEND_TIMEOUT => self.sndtimeo = parse_duration_option(name, value)?,
      LINGER => self.linger = parse_duration_option(name, value)?,
      RECONNECT_IVL => {
        self.reconnect_ivl = parse_duration_option(name, value)?.ok_or_else(|| invalid(name))?;
      }
      RECONNECT_IVL_MAX => {
        self.reconnect_ivl_max = parse_duration_option(name, value)?.filter(|d| !d.is_zero());
      }
      MAX_RECV_SIZE => self.max_recv_size = parse_size_option(name, value)?,
      TCP_NODELAY => self.tcp_nodelay = parse_bool_option(name, value)?,
      TCP_KEEPALIVE => {
        self.tcp_keepalive = parse_duration_option(name, value)?;
        if self.tcp_keepalive.map_or(false, |d| d.is_zero()) {
          self.tcp_keepalive = None;
        }
      }
      LAST_ENDPOINT => return Err(SpError::ReadOnlyOption(name.to_string())),
      _ => return Err(SpError::UnsupportedOption(name.to_string())),
    }
    Ok(())
  }

  /// Snapshot of what transports need when creating new connections.
  pub fn transport_config(&self) -> TransportConfig {
    TransportConfig {
      protocol: self.protocol,
      max_recv_size: self.max_recv_size,
      tcp_nodelay: self.tcp_nodelay,
      tcp_keepalive: self.tcp_keepalive,
    }
  }

  /// Delay before the next dial attempt, given the delay used for the last one.
  pub fn next_reconnect_delay(&self, current: Duration) -> Duration {
    match self.reconnect_ivl_max {
      Some(max) => (current * 2).min(max).max(self.reconnect_ivl),
      None => self.reconnect_ivl,
    }
  }
}

/// Socket-derived settings handed to a transport at dial/listen time.
#[derive(Debug, Clone)]
pub struct TransportConfig {
  pub protocol: ProtocolIds,
  /// Largest inbound message accepted; 0 means unlimited.
  pub max_recv_size: usize,
  pub tcp_nodelay: bool,
  pub tcp_keepalive: Option<Duration>,
}

impl Default for TransportConfig {
  fn default() -> Self {
    SocketOptions::default().transport_config()
  }
}

// --- Helper functions for parsing option values ---

fn invalid(name: &str) -> SpError {
  SpError::InvalidOptionValue(name.to_string())
}

pub(crate) fn parse_duration_option(name: &str, value: OptionValue) -> Result<Option<Duration>, SpError> {
  match value {
    OptionValue::Duration(d) => Ok(d),
    _ => Err(invalid(name)),
  }
}

pub(crate) fn parse_size_option(name: &str, value: OptionValue) -> Result<usize, SpError> {
  match value {
    OptionValue::Size(n) => Ok(n),
    _ => Err(invalid(name)),
  }
}

pub(crate) fn parse_bool_option(name: &str, value: OptionValue) -> Result<bool, SpError> {
  match value {
    OptionValue::Bool(b) => Ok(b),
    _ => Err(invalid(name)),
  }
}
