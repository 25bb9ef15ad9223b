use {
  peerswarm::{InfoHash, LocalPeerId, Limits, PeerAddr, Swarm, SwarmEvent},
  std::time::Duration,
  tokio::time::timeout,
};

async fn recv_wire(events: &mut peerswarm::SwarmEvents) -> SwarmEvent {
  match timeout(Duration::from_secs(5), events.recv()).await {
    Ok(Some(ev)) => ev,
    Ok(None) => panic!("event channel closed unexpectedly"),
    Err(_) => panic!("timed out waiting for an event"),
  }
}

/// Two swarms sharing one torrent: one listens, one dials in. Both sides
/// should complete handshake and publish exactly one wire; removing the
/// dialed peer should tear the listener's wire down too.
#[tokio::test]
async fn dial_completes_handshake_both_directions() {
  let info_hash = InfoHash::from_bytes([0x42; 20]);
  let registry = peerswarm::Registry::new();
  let limits = Limits::default();
  let port = 39_217;

  let (listener_swarm, mut listener_events) = Swarm::with_registry(
    info_hash,
    LocalPeerId::from_bytes([1u8; 20]),
    None,
    limits.clone(),
    registry.clone(),
  );
  listener_swarm.listen(port);
  assert!(matches!(
    recv_wire(&mut listener_events).await,
    SwarmEvent::Listening(p) if p == port
  ));

  let (dialer_swarm, mut dialer_events) = Swarm::with_registry(
    info_hash,
    LocalPeerId::from_bytes([2u8; 20]),
    None,
    limits,
    registry,
  );
  let addr: PeerAddr = format!("127.0.0.1:{port}").parse().unwrap();
  dialer_swarm.add(addr.clone());

  assert!(matches!(recv_wire(&mut dialer_events).await, SwarmEvent::Wire(_)));
  assert!(matches!(recv_wire(&mut listener_events).await, SwarmEvent::Wire(_)));

  assert_eq!(dialer_swarm.num_conns(), 1);
  assert_eq!(listener_swarm.num_conns(), 1);

  dialer_swarm.remove(addr);
  tokio::time::sleep(Duration::from_millis(50)).await;
  assert_eq!(dialer_swarm.num_conns(), 0);

  // the listener side observes the TCP close independently, through its
  // own wire pump, without any direct signal between the two swarms.
  let mut saw_listener_drop = false;
  for _ in 0..20 {
    if listener_swarm.num_conns() == 0 {
      saw_listener_drop = true;
      break;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
  }
  assert!(saw_listener_drop, "listener side never observed the close");

  listener_swarm.destroy();
  dialer_swarm.destroy();
}

/// A swarm's dial queue drains only up to the connection ceiling; the
/// rest stay queued until a slot frees up.
#[tokio::test]
async fn queue_drains_up_to_the_connection_ceiling() {
  let info_hash = InfoHash::from_bytes([0x11; 20]);
  let registry = peerswarm::Registry::new();
  let limits = Limits { max_conns: 2, ..Limits::default() };

  let (swarm, _events) = Swarm::with_registry(
    info_hash,
    LocalPeerId::from_bytes([3u8; 20]),
    None,
    limits,
    registry,
  );

  // Nothing is listening on these ports, so every dial will fail the
  // connect and requeue via drain() — but only up to max_conns should
  // ever be in flight (task assigned) at once.
  for n in 0..5u16 {
    let addr: PeerAddr = format!("127.0.0.1:{}", 39_300 + n).parse().unwrap();
    swarm.add(addr);
  }

  tokio::time::sleep(Duration::from_millis(10)).await;
  assert!(swarm.num_conns() <= 2);
  assert_eq!(swarm.num_conns() + swarm.num_queued(), 5);

  swarm.destroy();
}
