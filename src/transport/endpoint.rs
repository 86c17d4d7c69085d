use crate::error::SpError;
use std::fmt;
#[cfg(feature = "ipc")]
use std::path::PathBuf;

/// A parsed and validated endpoint address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
  /// `tcp://host:port`; host `*` binds every interface.
  Tcp { host: String, port: u16 },
  #[cfg(feature = "ipc")]
  Ipc(PathBuf),
  #[cfg(feature = "inproc")]
  Inproc(String),
}

impl Endpoint {
  /// The URI scheme this endpoint uses, which is also the key of the transport handling it.
  pub fn scheme(&self) -> &'static str {
    match self {
      Endpoint::Tcp { .. } => "tcp",
      #[cfg(feature = "ipc")]
      Endpoint::Ipc(_) => "ipc",
      #[cfg(feature = "inproc")]
      Endpoint::Inproc(_) => "inproc",
    }
  }

  /// True for addresses that can only be listened on, never dialed.
  pub fn is_wildcard(&self) -> bool {
    matches!(self, Endpoint::Tcp { host, .. } if host == "*")
  }
}

impl fmt::Display for Endpoint {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Endpoint::Tcp { host, port } if host.contains(':') => write!(f, "tcp://[{}]:{}", host, port),
      Endpoint::Tcp { host, port } => write!(f, "tcp://{}:{}", host, port),
      #[cfg(feature = "ipc")]
      Endpoint::Ipc(path) => write!(f, "ipc://{}", path.display()),
      #[cfg(feature = "inproc")]
      Endpoint::Inproc(name) => write!(f, "inproc://{}", name),
    }
  }
}

/// Parses an endpoint string into a structured [`Endpoint`].
///
/// Malformed addresses fail with `InvalidEndpoint`; unknown or disabled
/// schemes fail with `UnsupportedTransport`.
pub fn parse_endpoint(endpoint_str: &str) -> Result<Endpoint, SpError> {
  let invalid_endpoint_err = || SpError::InvalidEndpoint(endpoint_str.to_string());

  let (scheme, address_part) = endpoint_str.split_once("://").ok_or_else(invalid_endpoint_err)?;

  match scheme {
    "tcp" => {
      let (host, port) = address_part.rsplit_once(':').ok_or_else(invalid_endpoint_err)?;
      let port: u16 = port.parse().map_err(|_| invalid_endpoint_err())?;
      let host = match host.strip_prefix('[') {
        Some(v6) => v6.strip_suffix(']').ok_or_else(invalid_endpoint_err)?,
        None if host.contains(':') => return Err(invalid_endpoint_err()),
        None => host,
      };
      if host.is_empty() || host.chars().any(char::is_whitespace) {
        return Err(invalid_endpoint_err());
      }
      Ok(Endpoint::Tcp {
        host: host.to_string(),
        port,
      })
    }

    #[cfg(feature = "ipc")]
    "ipc" => {
      if address_part.is_empty() || address_part.contains('\0') {
        Err(invalid_endpoint_err())
      } else {
        Ok(Endpoint::Ipc(PathBuf::from(address_part)))
      }
    }

    #[cfg(feature = "inproc")]
    "inproc" => {
      if address_part.is_empty() || address_part.contains('\0') {
        Err(invalid_endpoint_err())
      } else {
        Ok(Endpoint::Inproc(address_part.to_string()))
      }
    }

    "" => Err(invalid_endpoint_err()),
    _ => Err(SpError::UnsupportedTransport(endpoint_str.to_string())),
  }
}
