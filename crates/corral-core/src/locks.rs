//! Per-sandbox-id mutual exclusion.
//!
//! Transitions on a given sandbox id must be serialized so that, e.g., a
//! destroy request cannot race a still-running provisioning task for the
//! same id. Operations on different ids proceed in parallel without limit.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// A map of per-id async mutexes.
///
/// `acquire` hands out an owned guard; holders keep the underlying lock
/// alive even after `discard` removes the map entry, so a late task can
/// still finish under its guard.
#[derive(Default)]
pub(crate) struct SandboxLocks {
    inner: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SandboxLocks {
    /// Lock the given sandbox id, creating its mutex on first use.
    pub(crate) async fn acquire(&self, id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            Arc::clone(map.entry(id.to_string()).or_default())
        };
        lock.lock_owned().await
    }

    /// Drop the map entry for an id that reached a terminal state.
    pub(crate) async fn discard(&self, id: &str) {
        self.inner.lock().await.remove(id);
    }
}
