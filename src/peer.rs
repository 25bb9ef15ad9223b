//! Peer records and the handle published to callers once a peer completes
//! its handshake.

use {
  crate::ids::{PeerAddr, RemotePeerId},
  tokio::task::JoinHandle,
};

/// A wire that has completed handshake and is part of a swarm's "active
/// wires" list.
///
/// Deliberately just identity — sending/receiving piece messages is the
/// application's job via the underlying [`crate::wire::PeerWire`], which is
/// out of this crate's scope. Tearing a wire down is done by calling
/// [`crate::Swarm::remove`] with its address, which aborts the owning
/// connection task and lets the resulting TCP close propagate to the
/// remote end — there is no separate `close()` handle.
#[derive(Debug, Clone)]
pub struct ActiveWire {
  pub addr: PeerAddr,
  pub remote_peer_id: RemotePeerId,
  pub extensions: u64,
}

/// Per-address bookkeeping inside a single [`crate::Swarm`].
///
/// Invariant: at most one `Peer` exists per address in a given swarm at
/// any time — enforced by the peer table being a `HashMap<PeerAddr,
/// Peer>` that `add`/`remove` maintain exclusively.
pub(crate) struct Peer {
  /// The task driving this peer's connection (dial + handshake + pump, or
  /// just the pump for an inbound peer). `Some` is the Rust analogue of
  /// "transport field is non-null": it counts toward the connection
  /// ceiling regardless of handshake state.
  pub task: Option<JoinHandle<()>>,

  /// Set once the peer's wire has completed handshake and was appended to
  /// the swarm's active wires list.
  pub wired: bool,

  /// Preserved so reconnection can be enabled without a schema change.
  /// Not currently read by any live code path.
  #[allow(dead_code)]
  pub reconnect_eligible: bool,
  #[allow(dead_code)]
  pub retry: u32,

  /// True iff this address currently sits in the dial queue.
  pub queued: bool,
}

impl Peer {
  pub fn new() -> Self {
    Self {
      task: None,
      wired: false,
      reconnect_eligible: true,
      retry: 0,
      queued: true,
    }
  }

  pub fn has_transport(&self) -> bool {
    self.task.is_some()
  }
}
