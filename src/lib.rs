//! Peer swarm manager: bounded peer population, handshake scheduling, and
//! a shared per-port listener pool for a BitTorrent-style peer-wire
//! protocol.
//!
//! A [`Swarm`] tracks one torrent's peer population — a bounded dial
//! queue, active connections up to a configurable ceiling, and the list
//! of wires that have completed handshake. Swarms that call
//! [`Swarm::listen`] on the same port share one [`TcpListener`](tokio::net::TcpListener)
//! through the process-wide [`Registry`], which demultiplexes inbound
//! connections by the info-hash carried in each peer's handshake.
//!
//! The peer-wire protocol past the initial handshake — piece framing,
//! choke/interest messages — is out of scope; callers plug in their own
//! framer behind the [`PeerWire`] trait.

mod config;
mod error;
mod ids;
mod peer;
mod pool;
mod registry;
mod swarm;
mod wire;

pub use crate::{
  config::{Limits, RECONNECT_BACKOFF_SECS},
  error::Error,
  ids::{IdError, InfoHash, LocalPeerId, PeerAddr, RemotePeerId, ID_LEN},
  peer::ActiveWire,
  registry::Registry,
  swarm::{Swarm, SwarmEvent, SwarmEvents},
  wire::{Handshake, HandshakeWire, PeerWire, TerminalReason, WireEvent},
};
