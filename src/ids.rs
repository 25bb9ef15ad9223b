//! 20-byte identifiers (info-hash, peer-id) and the `host:port` address type
//! used to key peers within a swarm.

use std::{fmt, net::SocketAddr, str::FromStr};

/// Length in bytes of an info-hash or a peer-id, per the BitTorrent wire
/// format.
pub const ID_LEN: usize = 20;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum IdError {
  #[error("expected {ID_LEN} bytes, got {0}")]
  BadLength(usize),
  #[error("invalid hex encoding: {0}")]
  BadHex(#[from] hex::FromHexError),
  #[error("address {0:?} is not in host:port form")]
  BadAddr(String),
}

macro_rules! id20 {
  ($name:ident) => {
    #[derive(Clone, Copy, PartialEq, Eq, Hash)]
    pub struct $name([u8; ID_LEN]);

    impl $name {
      pub fn from_bytes(bytes: [u8; ID_LEN]) -> Self {
        Self(bytes)
      }

      /// Decodes a 40-character hex string into the 20 raw bytes it encodes.
      pub fn from_hex(hex_str: &str) -> Result<Self, IdError> {
        let mut bytes = [0u8; ID_LEN];
        hex::decode_to_slice(hex_str, &mut bytes)?;
        Ok(Self(bytes))
      }

      /// Treats `text` as the raw byte encoding of the identifier (the
      /// usual convention for peer-ids, e.g. `"-WW0001-" + 12 bytes`).
      pub fn from_raw_text(text: &str) -> Result<Self, IdError> {
        let raw = text.as_bytes();
        if raw.len() != ID_LEN {
          return Err(IdError::BadLength(raw.len()));
        }
        let mut bytes = [0u8; ID_LEN];
        bytes.copy_from_slice(raw);
        Ok(Self(bytes))
      }

      pub fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
      }

      pub fn to_hex(&self) -> String {
        hex::encode(self.0)
      }
    }

    impl fmt::Debug for $name {
      fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", stringify!($name), self.to_hex())
      }
    }
  };
}

id20!(InfoHash);
id20!(LocalPeerId);
id20!(RemotePeerId);

/// A remote address in `host:port` textual form. IPv6 literals are not
/// supported; addresses always have exactly one colon separator.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PeerAddr(String);

impl PeerAddr {
  pub fn as_str(&self) -> &str {
    &self.0
  }

  /// Resolves this address to a concrete `SocketAddr` usable with
  /// `TcpStream::connect`. Only plain IPv4 `host:port` and already-numeric
  /// addresses are supported, matching the "no IPv6" non-goal.
  pub fn to_socket_addr(&self) -> Result<SocketAddr, IdError> {
    self
      .0
      .parse()
      .map_err(|_| IdError::BadAddr(self.0.clone()))
  }
}

impl FromStr for PeerAddr {
  type Err = IdError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    if s.matches(':').count() != 1 {
      return Err(IdError::BadAddr(s.to_owned()));
    }
    Ok(Self(s.to_owned()))
  }
}

impl From<SocketAddr> for PeerAddr {
  fn from(addr: SocketAddr) -> Self {
    Self(addr.to_string())
  }
}

impl fmt::Display for PeerAddr {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl fmt::Debug for PeerAddr {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn hex_roundtrip() {
    let hash = InfoHash::from_bytes([7u8; ID_LEN]);
    let hex_str = hash.to_hex();
    assert_eq!(hex_str.len(), ID_LEN * 2);
    assert_eq!(InfoHash::from_hex(&hex_str).unwrap(), hash);
  }

  #[test]
  fn bad_hex_length() {
    assert!(matches!(InfoHash::from_hex("abcd"), Err(IdError::BadHex(_))));
  }

  #[test]
  fn raw_text_peer_id() {
    let text = "-WW0001-0123456789ab";
    assert_eq!(text.len(), ID_LEN);
    let id = LocalPeerId::from_raw_text(text).unwrap();
    assert_eq!(id.as_bytes(), text.as_bytes());
  }

  #[test]
  fn raw_text_wrong_length() {
    assert_eq!(
      LocalPeerId::from_raw_text("too short"),
      Err(IdError::BadLength(9))
    );
  }

  #[test]
  fn addr_requires_single_colon() {
    assert!("127.0.0.1:6881".parse::<PeerAddr>().is_ok());
    assert!("nocolon".parse::<PeerAddr>().is_err());
    assert!("too:many:colons".parse::<PeerAddr>().is_err());
  }

  #[test]
  fn addr_resolves_to_socket_addr() {
    let addr: PeerAddr = "127.0.0.1:6881".parse().unwrap();
    let sock = addr.to_socket_addr().unwrap();
    assert_eq!(sock.port(), 6881);
  }
}
