//! Shared configuration snapshot with atomic swap semantics.

use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::watch;

use crate::config::Config;

/// Process-wide handle to the active configuration snapshot.
///
/// Readers call [`ConfigHandle::load`] per operation and get an `Arc` to a
/// snapshot that stays valid for the duration of that operation regardless
/// of concurrent reloads. Publishing a new snapshot is a single atomic
/// pointer swap followed by a notification on the reload channel; there is
/// no intermediate state.
pub struct ConfigHandle {
    current: ArcSwap<Config>,
    reload_tx: watch::Sender<u64>,
}

impl ConfigHandle {
    pub fn new(initial: Config) -> Arc<Self> {
        let (reload_tx, _) = watch::channel(0);
        Arc::new(Self {
            current: ArcSwap::from_pointee(initial),
            reload_tx,
        })
    }

    /// Current snapshot. Lock-free.
    pub fn load(&self) -> Arc<Config> {
        self.current.load_full()
    }

    /// Publish a new snapshot and wake reload subscribers.
    ///
    /// Callers must have validated the snapshot first; this method does not
    /// re-validate.
    pub fn install(&self, config: Config) {
        self.current.store(Arc::new(config));
        self.reload_tx.send_modify(|generation| *generation += 1);
    }

    /// Subscribe to reload notifications. The value is a generation
    /// counter; subscribers should re-read [`ConfigHandle::load`] when it
    /// changes rather than interpret the number.
    pub fn subscribe_reloads(&self) -> watch::Receiver<u64> {
        self.reload_tx.subscribe()
    }
}
