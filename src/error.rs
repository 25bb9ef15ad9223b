use crate::ids::IdError;

/// Errors surfaced to callers through [`crate::SwarmEvent::Error`].
///
/// Transport-level faults that the swarm recovers from on its own
/// (handshake timeout, info-hash mismatch, a peer's TCP link dropping)
/// never reach this type.
#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
  /// A second swarm tried to register the same info-hash on a port that
  /// already has one. Delivered only to the swarm that arrived second.
  #[error("info-hash already registered on this port")]
  PortCollision,

  /// The pool's listener failed to bind, after exhausting retries where
  /// applicable. Delivered to every swarm attached to the failing pool.
  #[error("listen failed: {0}")]
  ListenFailed(String),

  /// An ambient IO failure not covered by the two kinds above.
  #[error("io error: {0}")]
  Io(String),
}

impl From<IdError> for Error {
  fn from(e: IdError) -> Self {
    Error::Io(e.to_string())
  }
}
