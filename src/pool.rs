//! Shared TCP listener pool: demultiplexes inbound connections across the
//! swarms registered on one port, by reading the info-hash out of each
//! peer's handshake.

use {
  crate::{
    config::Limits,
    error::Error,
    ids::PeerAddr,
    swarm::SwarmCommand,
    wire::{recv_handshake, HandshakeWire, PeerWire},
  },
  parking_lot::Mutex,
  std::{collections::HashMap, io, net::SocketAddr, sync::Arc},
  tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc,
    task::JoinHandle,
  },
  tracing::{debug, info, warn},
};

/// A pool's view of one attached swarm: just enough to route a matched
/// handshake and to deliver `listening`/`error` asynchronously.
#[derive(Clone)]
pub(crate) struct SwarmLink {
  pub info_hash_hex: String,
  pub cmd_tx: mpsc::UnboundedSender<SwarmCommand>,
}

#[derive(Clone)]
pub(crate) struct PoolHandle {
  cmd_tx: mpsc::UnboundedSender<PoolCommand>,
}

impl PoolHandle {
  pub fn attach(&self, link: SwarmLink) {
    let _ = self.cmd_tx.send(PoolCommand::Attach(link));
  }

  pub fn detach(&self, info_hash_hex: String) {
    let _ = self.cmd_tx.send(PoolCommand::Detach(info_hash_hex));
  }
}

pub(crate) enum PoolCommand {
  Attach(SwarmLink),
  Detach(String),
}

type PoolTable = Arc<Mutex<HashMap<u16, PoolHandle>>>;

/// Spawns the background task driving the pool for `port`, registering it
/// in `table`. Only called while holding `table`'s lock via
/// `entry(..).or_insert_with(..)`, so there is exactly one pool per port.
pub(crate) fn spawn(port: u16, limits: Limits, table: PoolTable) -> PoolHandle {
  let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
  tokio::spawn(run_pool(port, limits, cmd_rx, table));
  PoolHandle { cmd_tx }
}

async fn bind_with_retry(
  port: u16,
  limits: &Limits,
) -> Result<TcpListener, Error> {
  let mut attempt = 0u32;
  loop {
    match TcpListener::bind(("0.0.0.0", port)).await {
      Ok(listener) => return Ok(listener),
      Err(e)
        if e.kind() == io::ErrorKind::AddrInUse
          && attempt < limits.listen_retries =>
      {
        attempt += 1;
        metrics::increment_counter!("listen_retries_total");
        warn!(port, attempt, "bind address in use, retrying");
        tokio::time::sleep(limits.listen_retry_delay).await;
      }
      Err(e) => return Err(Error::ListenFailed(e.to_string())),
    }
  }
}

async fn run_pool(
  port: u16,
  limits: Limits,
  mut cmd_rx: mpsc::UnboundedReceiver<PoolCommand>,
  table: PoolTable,
) {
  let swarms: Arc<Mutex<HashMap<String, SwarmLink>>> =
    Arc::new(Mutex::new(HashMap::new()));

  let bind_result = bind_with_retry(port, &limits).await;
  let (listener, bind_error) = match bind_result {
    Ok(l) => (Some(l), None),
    Err(e) => (None, Some(e)),
  };

  if listener.is_some() {
    info!(port, "pool listening");
  }

  let mut accepted: Vec<JoinHandle<()>> = Vec::new();

  loop {
    tokio::select! {
      cmd = cmd_rx.recv() => {
        match cmd {
          Some(PoolCommand::Attach(link)) => {
            handle_attach(link, &bind_error, listener.is_some(), &swarms);
            metrics::gauge!("pool_swarms", swarms.lock().len() as f64);
          }
          Some(PoolCommand::Detach(hex)) => {
            swarms.lock().remove(&hex);
            metrics::gauge!("pool_swarms", swarms.lock().len() as f64);
            if swarms.lock().is_empty() {
              debug!(port, "pool empty, tearing down");
              for h in accepted.drain(..) {
                h.abort();
              }
              table.lock().remove(&port);
              return;
            }
          }
          None => return,
        }
      }
      accepted_conn = accept_if_listening(&listener) => {
        match accepted_conn {
          Ok((stream, remote)) => {
            let swarms = swarms.clone();
            let limits = limits.clone();
            let handle = tokio::spawn(async move {
              handle_inbound(stream, remote, swarms, limits).await;
            });
            accepted.push(handle);
          }
          Err(e) => warn!(port, error = %e, "accept failed"),
        }
      }
    }

    accepted.retain(|h| !h.is_finished());
  }
}

fn handle_attach(
  link: SwarmLink,
  bind_error: &Option<Error>,
  listening: bool,
  swarms: &Arc<Mutex<HashMap<String, SwarmLink>>>,
) {
  if let Some(err) = bind_error {
    let _ = link.cmd_tx.send(SwarmCommand::PoolError(err.clone()));
    return;
  }

  let mut swarms = swarms.lock();
  if swarms.contains_key(&link.info_hash_hex) {
    let _ = link.cmd_tx.send(SwarmCommand::PoolError(Error::PortCollision));
    return;
  }

  swarms.insert(link.info_hash_hex.clone(), link.clone());
  drop(swarms);

  if listening {
    let _ = link.cmd_tx.send(SwarmCommand::PoolListening);
  }
}

/// Waits for an accept only if the listener bound successfully; otherwise
/// never resolves, so the `select!` arm simply never fires.
async fn accept_if_listening(
  listener: &Option<TcpListener>,
) -> io::Result<(TcpStream, SocketAddr)> {
  match listener {
    Some(l) => l.accept().await,
    None => futures::future::pending().await,
  }
}

/// Performs the inbound handshake deadline and info-hash routing. Ends
/// either by handing the connection off to a matching swarm
/// (`SwarmCommand::Incoming`) or by silently tearing the transport down.
async fn handle_inbound(
  stream: TcpStream,
  remote: SocketAddr,
  swarms: Arc<Mutex<HashMap<String, SwarmLink>>>,
  limits: Limits,
) {
  let addr = PeerAddr::from(remote);
  let mut wire: Box<dyn PeerWire> = Box::new(HandshakeWire::new(stream));

  let Some(handshake) = recv_handshake(&mut wire, limits.handshake_timeout).await
  else {
    return;
  };

  let hex = handshake.info_hash.to_hex();
  let link = swarms.lock().get(&hex).cloned();
  match link {
    None => wire.shutdown().await,
    Some(link) => {
      let _ = link.cmd_tx.send(SwarmCommand::Incoming { addr, handshake, wire });
    }
  }
}
