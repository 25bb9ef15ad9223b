//! A single torrent's connection population: queue, peer table, byte
//! counters, and the listener port, driven by one background actor task
//! so no per-object lock is needed to serialize mutation.

use {
  crate::{
    config::Limits,
    error::Error,
    ids::{InfoHash, LocalPeerId, PeerAddr, RemotePeerId},
    peer::{ActiveWire, Peer},
    pool::SwarmLink,
    registry::Registry,
    wire::{recv_handshake, Handshake, HandshakeWire, PeerWire, WireEvent},
  },
  parking_lot::Mutex,
  std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
  },
  tokio::{net::TcpStream, sync::mpsc, task::JoinHandle},
  tracing::{debug, info, warn},
};

/// Events a caller observes on a swarm.
#[derive(Debug, Clone)]
pub enum SwarmEvent {
  /// A peer completed handshake, in either direction, and was appended to
  /// the active wires list.
  Wire(ActiveWire),
  /// Forwarded per-chunk download delta from an active wire.
  Download(u64),
  /// Forwarded per-chunk upload delta from an active wire.
  Upload(u64),
  /// The pool's listener for this swarm's port has bound.
  Listening(u16),
  /// `PortCollision` or `ListenFailed`.
  Error(Error),
  /// Emitted exactly once, after `destroy()`.
  Close,
}

/// Receiver half of a swarm's event sink. Obtained once, from
/// [`Swarm::new`] (or [`Swarm::with_registry`]).
pub type SwarmEvents = mpsc::UnboundedReceiver<SwarmEvent>;

/// Snapshot of swarm state, synchronously readable from [`Swarm`]'s
/// accessor methods without crossing the actor's channel. Mutations to a
/// swarm must be serialized by a per-object lock on a multi-threaded
/// runtime; this is that lock, kept to a plain-data snapshot the actor
/// republishes after every mutation.
#[derive(Default)]
struct SwarmShared {
  port: u16,
  downloaded: u64,
  uploaded: u64,
  num_queued: usize,
  num_conns: usize,
  wires: Vec<ActiveWire>,
}

/// Commands sent to a swarm's actor task. Crate-private: all mutation
/// goes through the public [`Swarm`] handle or through the pool/dial
/// tasks that know about a swarm only by its command sender.
pub(crate) enum SwarmCommand {
  Add(PeerAddr),
  Remove(PeerAddr),
  Pause,
  Resume,
  Listen(u16),
  Destroy,
  DialFailed(PeerAddr),
  HandshakeMismatch(PeerAddr),
  Incoming { addr: PeerAddr, handshake: Handshake, wire: Box<dyn PeerWire> },
  Wired { addr: PeerAddr, handshake: Handshake },
  WireEvent(PeerAddr, WireEvent),
  PoolListening,
  PoolError(Error),
}

/// A torrent's connection population.
///
/// Cheap to clone: every clone shares the same background actor via its
/// command sender and the synchronously-readable state snapshot.
#[derive(Clone)]
pub struct Swarm {
  info_hash: InfoHash,
  peer_id: LocalPeerId,
  cmd_tx: mpsc::UnboundedSender<SwarmCommand>,
  shared: Arc<Mutex<SwarmShared>>,
}

impl Swarm {
  /// Constructs a swarm and starts its actor, attaching to the
  /// process-wide pool registry on `listen()`.
  pub fn new(
    info_hash: InfoHash,
    peer_id: LocalPeerId,
    extensions: Option<u64>,
  ) -> (Self, SwarmEvents) {
    Self::with_registry(
      info_hash,
      peer_id,
      extensions,
      Limits::default(),
      Registry::global().clone(),
    )
  }

  /// As [`Swarm::new`], with custom [`Limits`].
  pub fn with_limits(
    info_hash: InfoHash,
    peer_id: LocalPeerId,
    extensions: Option<u64>,
    limits: Limits,
  ) -> (Self, SwarmEvents) {
    Self::with_registry(
      info_hash,
      peer_id,
      extensions,
      limits,
      Registry::global().clone(),
    )
  }

  /// As [`Swarm::new`], with an injected [`Registry`] instead of the
  /// process-wide default. Intended for test isolation.
  pub fn with_registry(
    info_hash: InfoHash,
    peer_id: LocalPeerId,
    extensions: Option<u64>,
    limits: Limits,
    registry: Registry,
  ) -> (Self, SwarmEvents) {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let shared = Arc::new(Mutex::new(SwarmShared::default()));

    let actor = SwarmActor {
      info_hash,
      local_peer_id: peer_id,
      extensions: extensions.unwrap_or(0),
      limits,
      registry,
      port: 0,
      paused: false,
      destroyed: false,
      downloaded: 0,
      uploaded: 0,
      queue: VecDeque::new(),
      peers: HashMap::new(),
      wires: Vec::new(),
      shared: shared.clone(),
      events: event_tx,
      cmd_tx: cmd_tx.clone(),
    };
    tokio::spawn(actor.run(cmd_rx));

    (Self { info_hash, peer_id, cmd_tx, shared }, event_rx)
  }

  pub fn info_hash(&self) -> InfoHash {
    self.info_hash
  }

  pub fn peer_id(&self) -> LocalPeerId {
    self.peer_id
  }

  pub fn port(&self) -> u16 {
    self.shared.lock().port
  }

  pub fn downloaded(&self) -> u64 {
    self.shared.lock().downloaded
  }

  pub fn uploaded(&self) -> u64 {
    self.shared.lock().uploaded
  }

  pub fn num_queued(&self) -> usize {
    self.shared.lock().num_queued
  }

  pub fn num_conns(&self) -> usize {
    self.shared.lock().num_conns
  }

  pub fn wires(&self) -> Vec<ActiveWire> {
    self.shared.lock().wires.clone()
  }

  /// Enqueues `addr` for an outbound dial. No-op if destroyed or already
  /// known.
  pub fn add(&self, addr: PeerAddr) {
    let _ = self.cmd_tx.send(SwarmCommand::Add(addr));
  }

  /// Drops `addr`, tearing down its connection if any.
  pub fn remove(&self, addr: PeerAddr) {
    let _ = self.cmd_tx.send(SwarmCommand::Remove(addr));
  }

  /// Suppresses future outbound dials. Existing connections are
  /// unaffected, and inbound connections still complete handshake.
  pub fn pause(&self) {
    let _ = self.cmd_tx.send(SwarmCommand::Pause);
  }

  pub fn resume(&self) {
    let _ = self.cmd_tx.send(SwarmCommand::Resume);
  }

  /// Records `port` and attaches to the pool registry for it, creating the
  /// pool's listener if this is the first swarm on that port. A
  /// [`SwarmEvent::Listening`] follows once bound (or
  /// [`SwarmEvent::Error`] on collision/bind failure).
  pub fn listen(&self, port: u16) {
    let _ = self.cmd_tx.send(SwarmCommand::Listen(port));
  }

  /// Tears down every peer, detaches from the pool, and emits exactly one
  /// [`SwarmEvent::Close`]. Idempotent; further mutations are silent
  /// no-ops afterward.
  pub fn destroy(&self) {
    let _ = self.cmd_tx.send(SwarmCommand::Destroy);
  }
}

struct SwarmActor {
  info_hash: InfoHash,
  local_peer_id: LocalPeerId,
  extensions: u64,
  limits: Limits,
  registry: Registry,

  port: u16,
  paused: bool,
  destroyed: bool,
  downloaded: u64,
  uploaded: u64,
  queue: VecDeque<PeerAddr>,
  peers: HashMap<PeerAddr, Peer>,
  wires: Vec<ActiveWire>,

  shared: Arc<Mutex<SwarmShared>>,
  events: mpsc::UnboundedSender<SwarmEvent>,
  cmd_tx: mpsc::UnboundedSender<SwarmCommand>,
}

impl SwarmActor {
  async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<SwarmCommand>) {
    while let Some(cmd) = cmd_rx.recv().await {
      self.handle(cmd).await;
    }
  }

  async fn handle(&mut self, cmd: SwarmCommand) {
    match cmd {
      SwarmCommand::Add(addr) => self.on_add(addr),
      SwarmCommand::Remove(addr) => self.on_remove(addr),
      SwarmCommand::Pause => self.paused = true,
      SwarmCommand::Resume => {
        self.paused = false;
        self.drain();
      }
      SwarmCommand::Listen(port) => self.on_listen(port),
      SwarmCommand::Destroy => self.on_destroy().await,
      SwarmCommand::DialFailed(addr) => self.on_dial_failed(addr),
      SwarmCommand::HandshakeMismatch(addr) => {
        self.on_handshake_mismatch(addr)
      }
      SwarmCommand::Incoming { addr, handshake, wire } => {
        self.on_incoming(addr, handshake, wire).await
      }
      SwarmCommand::Wired { addr, handshake } => {
        self.on_wired(addr, handshake)
      }
      SwarmCommand::WireEvent(addr, ev) => self.on_wire_event(addr, ev),
      SwarmCommand::PoolListening => {
        let _ = self.events.send(SwarmEvent::Listening(self.port));
      }
      SwarmCommand::PoolError(e) => {
        let _ = self.events.send(SwarmEvent::Error(e));
      }
    }
  }

  fn on_add(&mut self, addr: PeerAddr) {
    if self.destroyed || self.peers.contains_key(&addr) {
      return;
    }
    self.peers.insert(addr.clone(), Peer::new());
    self.queue.push_back(addr);
    self.sync_shared();
    self.drain();
  }

  fn on_remove(&mut self, addr: PeerAddr) {
    self.internal_remove(&addr);
    self.sync_shared();
    self.drain();
  }

  /// Detaches `addr` from the queue/peer table and aborts its connection
  /// task, without running `drain()` — used by `destroy()` (which must
  /// not admit new dials) and to displace a prior entry on inbound
  /// reconnect.
  fn internal_remove(&mut self, addr: &PeerAddr) {
    if let Some(mut peer) = self.peers.remove(addr) {
      self.queue.retain(|a| a != addr);
      if let Some(task) = peer.task.take() {
        task.abort();
      }
    }
    self.wires.retain(|w| &w.addr != addr);
  }

  /// Assigns the next queued address a dial task, up to the connection
  /// ceiling.
  fn drain(&mut self) {
    if self.destroyed || self.paused {
      return;
    }
    if self.num_conns() >= self.limits.max_conns {
      return;
    }
    let Some(addr) = self.queue.pop_front() else { return };
    let Some(peer) = self.peers.get_mut(&addr) else { return };
    peer.queued = false;
    let handle = spawn_dial(
      addr.clone(),
      self.info_hash,
      self.local_peer_id,
      self.extensions,
      self.limits.clone(),
      self.cmd_tx.clone(),
    );
    peer.task = Some(handle);
    self.sync_shared();
  }

  fn on_dial_failed(&mut self, addr: PeerAddr) {
    if let Some(peer) = self.peers.get_mut(&addr) {
      peer.task = None;
    }
    self.sync_shared();
    self.drain();
  }

  fn on_handshake_mismatch(&mut self, addr: PeerAddr) {
    metrics::increment_counter!("handshakes_mismatched_total");
    warn!(%addr, "peer handshake info-hash mismatch");
    // The peer record is retained so a repeat `add()` of the same address
    // stays a no-op rather than silently re-queuing a peer that already
    // proved to be on the wrong torrent.
    if let Some(peer) = self.peers.get_mut(&addr) {
      peer.task = None;
    }
    self.sync_shared();
    self.drain();
  }

  async fn on_incoming(
    &mut self,
    addr: PeerAddr,
    handshake: Handshake,
    mut wire: Box<dyn PeerWire>,
  ) {
    if self.destroyed {
      wire.shutdown().await;
      return;
    }

    // Displaces any prior entry at that address.
    self.internal_remove(&addr);

    let local_hs = Handshake {
      info_hash: self.info_hash,
      peer_id: *self.local_peer_id.as_bytes(),
      extensions: self.extensions,
    };
    if wire.send_handshake(local_hs).await.is_err() {
      wire.shutdown().await;
      return;
    }

    let mut peer = Peer::new();
    peer.queued = false;
    let cmd_tx = self.cmd_tx.clone();
    let task_addr = addr.clone();
    let task = tokio::spawn(async move {
      run_wire_pump(task_addr, wire, handshake, cmd_tx).await;
    });
    peer.task = Some(task);
    self.peers.insert(addr, peer);
    self.sync_shared();
  }

  fn on_wired(&mut self, addr: PeerAddr, handshake: Handshake) {
    if let Some(peer) = self.peers.get_mut(&addr) {
      peer.wired = true;
    }
    let wire = ActiveWire {
      addr: addr.clone(),
      remote_peer_id: RemotePeerId::from_bytes(handshake.peer_id),
      extensions: handshake.extensions,
    };
    self.wires.push(wire.clone());
    self.sync_shared();
    let _ = self.events.send(SwarmEvent::Wire(wire));
  }

  fn on_wire_event(&mut self, addr: PeerAddr, ev: WireEvent) {
    match ev {
      WireEvent::Download(n) => {
        self.downloaded += n;
        self.sync_shared();
        let _ = self.events.send(SwarmEvent::Download(n));
      }
      WireEvent::Upload(n) => {
        self.uploaded += n;
        self.sync_shared();
        let _ = self.events.send(SwarmEvent::Upload(n));
      }
      WireEvent::Handshake(_) => {
        debug!(%addr, "ignoring unexpected post-adoption handshake");
      }
      WireEvent::Terminal(reason) => {
        debug!(%addr, ?reason, "wire torn down");
        self.wires.retain(|w| w.addr != addr);
        if let Some(peer) = self.peers.get_mut(&addr) {
          peer.task = None;
          peer.wired = false;
        }
        self.sync_shared();
        self.drain();
      }
    }
  }

  fn on_listen(&mut self, port: u16) {
    if self.destroyed {
      return;
    }
    self.port = port;
    self.sync_shared();
    let link = SwarmLink {
      info_hash_hex: self.info_hash.to_hex(),
      cmd_tx: self.cmd_tx.clone(),
    };
    self.registry.attach(port, self.limits.clone(), link);
  }

  async fn on_destroy(&mut self) {
    if self.destroyed {
      return;
    }
    self.destroyed = true;
    let addrs: Vec<PeerAddr> = self.peers.keys().cloned().collect();
    for addr in addrs {
      self.internal_remove(&addr);
    }
    self.queue.clear();
    if self.port != 0 {
      self.registry.detach(self.port, self.info_hash.to_hex());
    }
    self.sync_shared();
    info!(port = self.port, "swarm destroyed");

    // Emission happens on a later tick, after every peer has actually
    // torn down, not in the same poll as the abort calls above.
    tokio::task::yield_now().await;
    let _ = self.events.send(SwarmEvent::Close);
  }

  fn num_conns(&self) -> usize {
    self.peers.values().filter(|p| p.has_transport()).count()
  }

  fn sync_shared(&self) {
    let num_conns = self.num_conns();
    let num_queued = self.queue.len();

    let mut shared = self.shared.lock();
    shared.port = self.port;
    shared.downloaded = self.downloaded;
    shared.uploaded = self.uploaded;
    shared.num_queued = num_queued;
    shared.num_conns = num_conns;
    shared.wires = self.wires.clone();
    drop(shared);

    metrics::gauge!("swarm_conns", num_conns as f64);
    metrics::gauge!("swarm_queued", num_queued as f64);
    metrics::gauge!("swarm_wires", self.wires.len() as f64);
  }
}

/// Drives a single post-handshake wire: sends `Wired` once (wire
/// adoption), then forwards download/upload/terminal events until the
/// wire ends. Shared between the outbound dial path and the inbound path
/// handed off from [`crate::pool`].
async fn run_wire_pump(
  addr: PeerAddr,
  mut wire: Box<dyn PeerWire>,
  handshake: Handshake,
  cmd_tx: mpsc::UnboundedSender<SwarmCommand>,
) {
  if cmd_tx.send(SwarmCommand::Wired { addr: addr.clone(), handshake }).is_err()
  {
    return;
  }

  loop {
    match wire.next_event().await {
      Some(WireEvent::Terminal(reason)) => {
        let _ = cmd_tx.send(SwarmCommand::WireEvent(
          addr,
          WireEvent::Terminal(reason),
        ));
        return;
      }
      Some(other) => {
        let _ = cmd_tx.send(SwarmCommand::WireEvent(addr.clone(), other));
      }
      None => return,
    }
  }
}

/// Outbound dial: connect, send our handshake, wait (bounded) for theirs,
/// then hand off to [`run_wire_pump`] on match.
fn spawn_dial(
  addr: PeerAddr,
  info_hash: InfoHash,
  local_peer_id: LocalPeerId,
  extensions: u64,
  limits: Limits,
  cmd_tx: mpsc::UnboundedSender<SwarmCommand>,
) -> JoinHandle<()> {
  tokio::spawn(async move {
    let socket_addr = match addr.to_socket_addr() {
      Ok(s) => s,
      Err(_) => {
        let _ = cmd_tx.send(SwarmCommand::DialFailed(addr));
        return;
      }
    };

    let stream = match TcpStream::connect(socket_addr).await {
      Ok(s) => s,
      Err(e) => {
        debug!(%addr, error = %e, "dial failed");
        let _ = cmd_tx.send(SwarmCommand::DialFailed(addr));
        return;
      }
    };
    metrics::increment_counter!("peers_dialed_total");

    let mut wire: Box<dyn PeerWire> = Box::new(HandshakeWire::new(stream));
    let local_hs = Handshake {
      info_hash,
      peer_id: *local_peer_id.as_bytes(),
      extensions,
    };
    if wire.send_handshake(local_hs).await.is_err() {
      wire.shutdown().await;
      let _ = cmd_tx.send(SwarmCommand::DialFailed(addr));
      return;
    }

    let Some(remote_hs) = recv_handshake(&mut wire, limits.handshake_timeout).await
    else {
      let _ = cmd_tx.send(SwarmCommand::DialFailed(addr));
      return;
    };

    if remote_hs.info_hash != info_hash {
      wire.shutdown().await;
      let _ = cmd_tx.send(SwarmCommand::HandshakeMismatch(addr));
      return;
    }

    run_wire_pump(addr, wire, remote_hs, cmd_tx).await;
  })
}
