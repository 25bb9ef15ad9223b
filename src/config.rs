use std::time::Duration;

/// Exponential reconnect backoff schedule, in seconds.
///
/// The schedule and the per-peer retry counter exist so reconnection can
/// be enabled later without a schema change, but nothing in this crate
/// currently drives a peer through it — see [`Limits::reconnect_enabled`].
pub const RECONNECT_BACKOFF_SECS: &[u64] =
  &[1, 5, 15, 30, 60, 120, 300, 600];

/// Tunable limits and timeouts for a [`crate::Swarm`] and the listener
/// pool it shares a port with.
///
/// There is no file or environment loading here — config is always
/// constructed in-process by the caller.
#[derive(Debug, Clone)]
pub struct Limits {
  /// Maximum number of peer records whose dial is in flight or
  /// established, counted regardless of handshake state.
  pub max_conns: usize,

  /// How long to wait for a peer's handshake after a transport is
  /// attached, inbound or outbound, before tearing it down.
  pub handshake_timeout: Duration,

  /// Number of times `Pool::listen` retries a bind that failed with
  /// "address in use".
  pub listen_retries: u32,

  /// Delay between listen retries.
  pub listen_retry_delay: Duration,

  /// Reconnection stays dormant even though the backoff schedule and
  /// per-peer retry counter are tracked: it should not be activated
  /// implicitly. Exists as the seam a future implementation would flip on.
  pub reconnect_enabled: bool,
}

impl Default for Limits {
  fn default() -> Self {
    Self {
      max_conns: 100,
      handshake_timeout: Duration::from_secs(5),
      listen_retries: 5,
      listen_retry_delay: Duration::from_secs(1),
      reconnect_enabled: false,
    }
  }
}
