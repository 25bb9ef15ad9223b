//! The protocol framer boundary.
//!
//! The peer-wire protocol itself — handshake encoding, message framing,
//! choke/interest/piece messages — is explicitly out of scope for this
//! crate. [`PeerWire`] is the seam a real framer plugs into: the core only
//! ever drives it through `send_handshake`/`next_event`/`shutdown` and
//! never inspects payload bytes.
//!
//! [`HandshakeWire`] is the one concrete implementation this crate ships,
//! just enough to prove the handshake and byte-accounting contract over a
//! real socket in tests: it speaks the fixed BitTorrent handshake and then
//! reports every post-handshake read/write as a `Download`/`Upload` delta.

use {
  crate::ids::{InfoHash, ID_LEN},
  async_trait::async_trait,
  std::{collections::VecDeque, io},
  tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
};

/// A peer's handshake payload: their info-hash, their 20-byte peer-id, and
/// their extension bits.
#[derive(Debug, Clone)]
pub struct Handshake {
  pub info_hash: InfoHash,
  pub peer_id: [u8; ID_LEN],
  pub extensions: u64,
}

/// Why a wire stopped producing events.
#[derive(Debug, Clone, Copy)]
pub enum TerminalReason {
  /// The remote closed its write half (or we read EOF).
  End,
  /// A transport or protocol error.
  Error(io::ErrorKind),
  /// The local side finished writing and the stream drained cleanly.
  Finish,
}

/// Events produced by a [`PeerWire`] while it is attached to a transport.
#[derive(Debug)]
pub enum WireEvent {
  /// Fires once, on receipt of the peer's handshake.
  Handshake(Handshake),
  /// A chunk of payload bytes was received.
  Download(u64),
  /// A chunk of payload bytes was sent.
  Upload(u64),
  /// The wire is done; exactly one of these (of any reason) is ever
  /// produced before `next_event` starts returning `None`.
  Terminal(TerminalReason),
}

/// Boundary around the external protocol framer collaborator.
/// Implementations own a duplex byte stream and translate it into
/// handshake/byte-flow/terminal events.
#[async_trait]
pub trait PeerWire: Send {
  /// Serializes and sends the initial handshake.
  async fn send_handshake(&mut self, hs: Handshake) -> io::Result<()>;

  /// Writes application payload bytes, reported back as an `Upload` event
  /// on the next `next_event` call.
  async fn write_payload(&mut self, data: &[u8]) -> io::Result<()>;

  /// Pulls the next event. Returns `None` once the wire has produced its
  /// terminal event and has nothing left to report.
  async fn next_event(&mut self) -> Option<WireEvent>;

  /// Tears the wire (and its transport) down. Idempotent.
  async fn shutdown(&mut self);
}

/// Bounded wait for a peer's handshake on a freshly attached wire, shared
/// between the outbound dial path and the inbound accept path. On
/// timeout, protocol violation, or early close, shuts the wire down
/// itself and returns `None`; a timeout additionally bumps
/// `handshake_timeouts_total`.
pub async fn recv_handshake(
  wire: &mut Box<dyn PeerWire>,
  deadline: std::time::Duration,
) -> Option<Handshake> {
  match tokio::time::timeout(deadline, wire.next_event()).await {
    Ok(Some(WireEvent::Handshake(hs))) => return Some(hs),
    Ok(_) => {}
    Err(_elapsed) => metrics::increment_counter!("handshake_timeouts_total"),
  }
  wire.shutdown().await;
  None
}

const PSTR: &[u8] = b"BitTorrent protocol";
const HANDSHAKE_LEN: usize = 1 + 19 + 8 + ID_LEN + ID_LEN;

/// A minimal concrete [`PeerWire`]: the fixed BitTorrent handshake, then a
/// pass-through byte counter. Generic over any duplex stream so it works
/// equally for inbound `TcpStream`s and outbound dials.
pub struct HandshakeWire<S> {
  stream: S,
  handshaken: bool,
  done: bool,
  pending: VecDeque<WireEvent>,
}

impl<S> HandshakeWire<S>
where
  S: AsyncRead + AsyncWrite + Unpin + Send,
{
  pub fn new(stream: S) -> Self {
    Self {
      stream,
      handshaken: false,
      done: false,
      pending: VecDeque::new(),
    }
  }

  async fn read_handshake(&mut self) -> io::Result<Handshake> {
    let mut buf = [0u8; HANDSHAKE_LEN];
    self.stream.read_exact(&mut buf).await?;

    if buf[0] as usize != PSTR.len() || &buf[1..20] != PSTR {
      return Err(io::Error::new(
        io::ErrorKind::InvalidData,
        "unrecognized handshake preamble",
      ));
    }

    let extensions = u64::from_be_bytes(buf[20..28].try_into().unwrap());
    let info_hash =
      InfoHash::from_bytes(buf[28..48].try_into().unwrap());
    let peer_id: [u8; ID_LEN] = buf[48..68].try_into().unwrap();

    Ok(Handshake { info_hash, peer_id, extensions })
  }
}

#[async_trait]
impl<S> PeerWire for HandshakeWire<S>
where
  S: AsyncRead + AsyncWrite + Unpin + Send,
{
  async fn send_handshake(&mut self, hs: Handshake) -> io::Result<()> {
    let mut buf = Vec::with_capacity(HANDSHAKE_LEN);
    buf.push(PSTR.len() as u8);
    buf.extend_from_slice(PSTR);
    buf.extend_from_slice(&hs.extensions.to_be_bytes());
    buf.extend_from_slice(hs.info_hash.as_bytes());
    buf.extend_from_slice(&hs.peer_id);
    self.stream.write_all(&buf).await
  }

  async fn write_payload(&mut self, data: &[u8]) -> io::Result<()> {
    self.stream.write_all(data).await?;
    self.pending.push_back(WireEvent::Upload(data.len() as u64));
    Ok(())
  }

  async fn next_event(&mut self) -> Option<WireEvent> {
    if self.done {
      return None;
    }
    if let Some(ev) = self.pending.pop_front() {
      return Some(ev);
    }

    if !self.handshaken {
      return match self.read_handshake().await {
        Ok(hs) => {
          self.handshaken = true;
          Some(WireEvent::Handshake(hs))
        }
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
          self.done = true;
          Some(WireEvent::Terminal(TerminalReason::End))
        }
        Err(e) => {
          self.done = true;
          Some(WireEvent::Terminal(TerminalReason::Error(e.kind())))
        }
      };
    }

    let mut buf = [0u8; 4096];
    match self.stream.read(&mut buf).await {
      Ok(0) => {
        self.done = true;
        Some(WireEvent::Terminal(TerminalReason::End))
      }
      Ok(n) => Some(WireEvent::Download(n as u64)),
      Err(e) => {
        self.done = true;
        Some(WireEvent::Terminal(TerminalReason::Error(e.kind())))
      }
    }
  }

  async fn shutdown(&mut self) {
    let _ = self.stream.shutdown().await;
    self.done = true;
  }
}
