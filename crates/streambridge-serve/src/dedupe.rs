//! Event deduplication cache.
//!
//! A keyed TTL store over event fingerprints. Dedup is best-effort and
//! bounded by the TTL; it is not a correctness boundary, so a single
//! reader/writer lock is plenty at the expected write rates. Entries
//! expire lazily on lookup and eagerly via a ten minute sweep, and the
//! live set is persisted on shutdown so restarts do not re-deliver.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use streambridge_core::ConfigHandle;

/// Cadence of the expired-entry sweep.
const SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// A seen event, as persisted in `cache.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupEntry {
    pub key: String,
    #[serde(default)]
    pub data_base64: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

pub struct DedupeCache {
    config: Arc<ConfigHandle>,
    entries: RwLock<HashMap<String, DedupEntry>>,
}

/// Fingerprint identifying an event for deduplication:
/// `sha256(broadcaster_user_id ':' event_id ':' unix_seconds)`, hex.
pub fn fingerprint(broadcaster_user_id: &str, event_id: &str, started_at: DateTime<Utc>) -> String {
    let data = format!("{broadcaster_user_id}:{event_id}:{}", started_at.timestamp());
    hex::encode(Sha256::digest(data.as_bytes()))
}

impl DedupeCache {
    pub fn new(config: Arc<ConfigHandle>) -> Self {
        Self {
            config,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// True if a live entry exists for `key`. An expired entry is removed
    /// on the way, which is why this takes the write lock.
    pub fn is_duplicate(&self, key: &str) -> bool {
        let mut entries = self.entries.write();

        match entries.get(key) {
            Some(entry) if Utc::now() > entry.expires_at => {
                entries.remove(key);
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    /// Record an event fingerprint with the configured TTL.
    pub fn add(&self, key: &str, data: &[u8]) {
        let ttl = self.config.load().cache.ttl();
        let now = Utc::now();
        let entry = DedupEntry {
            key: key.to_string(),
            data_base64: base64::engine::general_purpose::STANDARD.encode(data),
            expires_at: now + chrono::Duration::from_std(ttl).unwrap_or_default(),
            created_at: now,
        };

        let count = {
            let mut entries = self.entries.write();
            entries.insert(key.to_string(), entry);
            entries.len()
        };
        metrics::gauge!("dedup_cache_entries").set(count as f64);

        tracing::debug!(key, "added event to dedup cache");
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Remove all expired entries.
    pub fn sweep(&self) {
        let now = Utc::now();
        let (removed, remaining) = {
            let mut entries = self.entries.write();
            let before = entries.len();
            entries.retain(|_, entry| now <= entry.expires_at);
            (before - entries.len(), entries.len())
        };

        metrics::gauge!("dedup_cache_entries").set(remaining as f64);
        if removed > 0 {
            tracing::debug!(removed, remaining, "dedup cache sweep completed");
        }
    }

    /// Load persisted entries, discarding any that expired while the
    /// service was down.
    pub fn load(&self) {
        let path = self.config.load().cache.file_path.clone();
        if !path.exists() {
            return;
        }

        let entries: Vec<DedupEntry> = match std::fs::read_to_string(&path)
            .map_err(|e| e.to_string())
            .and_then(|raw| serde_json::from_str(&raw).map_err(|e| e.to_string()))
        {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "failed to load dedup cache");
                return;
            }
        };

        let now = Utc::now();
        let total = entries.len();
        let mut live = self.entries.write();
        for entry in entries {
            if now <= entry.expires_at {
                live.insert(entry.key.clone(), entry);
            }
        }

        tracing::info!(total, loaded = live.len(), "loaded dedup cache from disk");
    }

    /// Serialize the live set atomically (temp file + rename).
    pub fn persist(&self) {
        let path = self.config.load().cache.file_path.clone();
        let snapshot: Vec<DedupEntry> = self.entries.read().values().cloned().collect();

        let result = serde_json::to_vec_pretty(&snapshot)
            .map_err(std::io::Error::other)
            .and_then(|data| {
                let tmp = path.with_extension("json.tmp");
                std::fs::write(&tmp, data)?;
                std::fs::rename(&tmp, &path)
            });

        match result {
            Ok(()) => tracing::debug!(entries = snapshot.len(), "persisted dedup cache"),
            Err(err) => {
                tracing::error!(path = %path.display(), error = %err, "failed to persist dedup cache");
            }
        }
    }

    /// Spawn the periodic sweep task. Exits when `shutdown` flips to `true`.
    pub fn spawn_sweeper(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => self.sweep(),
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            return;
                        }
                    }
                }
            }
        })
    }
}
