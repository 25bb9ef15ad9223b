//! Process-wide port → pool directory.
//!
//! The default instance is a lazily-created singleton. [`Registry::new`]
//! additionally lets callers — tests, mainly — construct a private
//! instance instead of sharing global state.

use {
  crate::{config::Limits, pool, pool::PoolHandle, pool::SwarmLink},
  once_cell::sync::Lazy,
  parking_lot::Mutex,
  std::{collections::HashMap, sync::Arc},
};

static GLOBAL: Lazy<Registry> = Lazy::new(Registry::new);

#[derive(Clone)]
pub struct Registry {
  pools: Arc<Mutex<HashMap<u16, PoolHandle>>>,
}

impl Registry {
  pub fn new() -> Self {
    Self { pools: Arc::new(Mutex::new(HashMap::new())) }
  }

  pub fn global() -> &'static Registry {
    &GLOBAL
  }

  /// Attaches `link` to the pool for `port`, creating the pool (and
  /// binding its listener) if this is the first attach on that port.
  pub(crate) fn attach(&self, port: u16, limits: Limits, link: SwarmLink) {
    let handle = {
      let mut pools = self.pools.lock();
      pools
        .entry(port)
        .or_insert_with(|| pool::spawn(port, limits, self.pools.clone()))
        .clone()
    };
    handle.attach(link);
  }

  pub(crate) fn detach(&self, port: u16, info_hash_hex: String) {
    let handle = self.pools.lock().get(&port).cloned();
    if let Some(handle) = handle {
      handle.detach(info_hash_hex);
    }
  }

  /// Number of ports currently backed by a live pool. Test-only
  /// introspection hook.
  #[cfg(test)]
  pub(crate) fn pool_count(&self) -> usize {
    self.pools.lock().len()
  }
}

impl Default for Registry {
  fn default() -> Self {
    Self::new()
  }
}
