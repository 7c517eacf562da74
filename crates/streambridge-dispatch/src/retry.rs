//! Durable retry queue for failed webhook deliveries.
//!
//! Items enter via [`RetryQueue::enqueue`], which bumps the attempt counter
//! and stamps the earliest next attempt using exponential backoff
//! (`initial * factor^(n-1)`, capped at `max_delay`). A 30 second tick
//! partitions the queue into ready, pending and expired items; ready items
//! are dispatched concurrently and re-enqueued on failure, expired items
//! are dropped with a warning.
//!
//! The queue mutex is held only to snapshot or swap the item list, never
//! across disk or network I/O. State is persisted atomically (temp file +
//! rename) on every mutation so a crash loses at most the attempt in
//! flight.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use streambridge_core::{ConfigHandle, DispatchRequest};

use crate::dispatcher::Dispatcher;

/// Cadence of the readiness check.
const TICK_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedState {
    queue: Vec<DispatchRequest>,
}

pub struct RetryQueue {
    config: Arc<ConfigHandle>,
    dispatcher: Dispatcher,
    queue: Mutex<Vec<DispatchRequest>>,
}

impl RetryQueue {
    pub fn new(config: Arc<ConfigHandle>, dispatcher: Dispatcher) -> Self {
        Self {
            config,
            dispatcher,
            queue: Mutex::new(Vec::new()),
        }
    }

    /// Load persisted state, replacing the in-memory queue.
    pub fn load_state(&self) {
        let path = self.state_file();
        if !path.exists() {
            return;
        }

        match std::fs::read_to_string(&path)
            .map_err(|e| e.to_string())
            .and_then(|raw| serde_json::from_str::<PersistedState>(&raw).map_err(|e| e.to_string()))
        {
            Ok(state) => {
                let count = state.queue.len();
                *self.queue.lock() = state.queue;
                self.update_depth_gauge();
                tracing::info!(queue_size = count, "loaded retry state");
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "failed to load retry state");
            }
        }
    }

    /// Queue a failed request for another attempt. Bumps the attempt
    /// counter and stamps the backoff deadline, then persists.
    pub fn enqueue(&self, mut request: DispatchRequest) {
        let retry = self.config.load().retry.clone();

        request.attempt += 1;
        let delay = retry.backoff(request.attempt);
        request.next_attempt_at =
            Some(Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default());

        tracing::info!(
            target_url = %request.target_url,
            streamer_key = %request.streamer_key,
            attempt = request.attempt,
            next_attempt_at = ?request.next_attempt_at,
            "added request to retry queue"
        );

        self.queue.lock().push(request);
        self.update_depth_gauge();
        self.persist();
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// One tick: pull out ready items, drop expired ones, dispatch the
    /// ready set concurrently. Failures re-enter through [`Self::enqueue`].
    pub async fn process_ready(self: &Arc<Self>) {
        let max_attempts = self.config.load().retry.max_attempts;
        let now = Utc::now();

        let ready: Vec<DispatchRequest> = {
            let mut queue = self.queue.lock();
            let mut ready = Vec::new();
            let mut pending = Vec::new();

            for request in queue.drain(..) {
                if request.attempt > max_attempts {
                    metrics::counter!("retry_items_dropped_total").increment(1);
                    tracing::warn!(
                        target_url = %request.target_url,
                        streamer_key = %request.streamer_key,
                        attempts = request.attempt,
                        "dropping request after max attempts"
                    );
                } else if request.next_attempt_at.is_none_or(|at| now >= at) {
                    ready.push(request);
                } else {
                    pending.push(request);
                }
            }

            *queue = pending;
            ready
        };

        self.update_depth_gauge();
        if ready.is_empty() {
            return;
        }
        self.persist();

        tracing::info!(ready_count = ready.len(), remaining = self.len(), "processing retries");

        let mut tasks = Vec::with_capacity(ready.len());
        for request in ready {
            let queue = Arc::clone(self);
            tasks.push(tokio::spawn(async move {
                let outcome = queue.dispatcher.dispatch(&request).await;
                if outcome.success {
                    tracing::info!(
                        target_url = %request.target_url,
                        streamer_key = %request.streamer_key,
                        attempt = request.attempt,
                        "retry successful"
                    );
                } else {
                    queue.enqueue(request);
                }
            }));
        }
        for task in tasks {
            let _ = task.await;
        }
    }

    /// Spawn the background tick loop. Exits when `shutdown` flips to
    /// `true`, persisting a final snapshot.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(TICK_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.process_ready().await;
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            self.persist();
                            tracing::debug!("retry queue stopped");
                            return;
                        }
                    }
                }
            }
        })
    }

    /// Write the queue to the state file via temp file + rename, so the
    /// file is always a complete JSON document.
    pub fn persist(&self) {
        let path = self.state_file();
        let snapshot = PersistedState {
            queue: self.queue.lock().clone(),
        };

        if let Err(err) = write_atomic(&path, &snapshot) {
            tracing::error!(path = %path.display(), error = %err, "failed to persist retry state");
        }
    }

    fn state_file(&self) -> PathBuf {
        self.config.load().retry.state_file.clone()
    }

    fn update_depth_gauge(&self) {
        metrics::gauge!("retry_queue_depth").set(self.len() as f64);
    }
}

fn write_atomic(path: &std::path::Path, state: &PersistedState) -> std::io::Result<()> {
    let data = serde_json::to_vec_pretty(state)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use streambridge_core::{Config, HashAlgorithm, OutboundPayload};

    fn test_handle(dir: &std::path::Path) -> Arc<ConfigHandle> {
        let mut config = Config::default();
        config.retry.state_file = dir.join("retry_state.json");
        config.retry.initial_delay_secs = 0;
        config.retry.max_attempts = 3;
        ConfigHandle::new(config)
    }

    fn request_to(url: String) -> DispatchRequest {
        DispatchRequest {
            target_url: url,
            header_name: "X-Hub-Signature-256".into(),
            algorithm: HashAlgorithm::Sha256,
            secret: String::new(),
            streamer_key: "alice".into(),
            payload: OutboundPayload::seed("alice", "Alice", "1", vec![]),
            attempt: 1,
            next_attempt_at: None,
        }
    }

    #[test]
    fn enqueue_bumps_attempt_and_stamps_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.retry.state_file = dir.path().join("retry_state.json");
        config.retry.initial_delay_secs = 60;
        let handle = ConfigHandle::new(config);

        let queue = RetryQueue::new(handle, Dispatcher::new());
        queue.enqueue(request_to("https://example.com/hook".into()));

        let items = queue.queue.lock();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].attempt, 2);
        // backoff(2) = 60 * 2^1 = 120s out.
        let eta = items[0].next_attempt_at.unwrap();
        let delta = (eta - Utc::now()).num_seconds();
        assert!((115..=120).contains(&delta), "unexpected delta {delta}");
    }

    #[test]
    fn state_roundtrips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let handle = test_handle(dir.path());

        let queue = RetryQueue::new(Arc::clone(&handle), Dispatcher::new());
        queue.enqueue(request_to("https://example.com/a".into()));
        queue.enqueue(request_to("https://example.com/b".into()));

        let restored = RetryQueue::new(handle, Dispatcher::new());
        restored.load_state();
        assert_eq!(restored.len(), 2);

        let urls: Vec<String> = restored
            .queue
            .lock()
            .iter()
            .map(|r| r.target_url.clone())
            .collect();
        assert!(urls.contains(&"https://example.com/a".to_string()));
        assert!(urls.contains(&"https://example.com/b".to_string()));
    }

    #[tokio::test]
    async fn ready_item_dispatched_and_removed_on_success() {
        let server = MockServer::start();
        let dir = tempfile::tempdir().unwrap();

        let hook = server.mock(|when, then| {
            when.method(POST).path("/hook");
            then.status(200);
        });

        let queue = Arc::new(RetryQueue::new(test_handle(dir.path()), Dispatcher::new()));
        // initial_delay 0 makes the item immediately ready.
        queue.enqueue(request_to(server.url("/hook")));

        queue.process_ready().await;

        hook.assert();
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn failed_item_reenqueued_until_attempts_exhausted() {
        let server = MockServer::start();
        let dir = tempfile::tempdir().unwrap();

        let hook = server.mock(|when, then| {
            when.method(POST).path("/hook");
            then.status(500);
        });

        let queue = Arc::new(RetryQueue::new(test_handle(dir.path()), Dispatcher::new()));
        queue.enqueue(request_to(server.url("/hook")));
        assert_eq!(queue.queue.lock()[0].attempt, 2);

        // attempt 2 fails, re-enqueued as attempt 3.
        queue.process_ready().await;
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.queue.lock()[0].attempt, 3);

        // attempt 3 fails, re-enqueued as attempt 4 (> max_attempts).
        queue.process_ready().await;
        assert_eq!(queue.queue.lock()[0].attempt, 4);

        // attempt 4 exceeds max_attempts: dropped without dispatching.
        queue.process_ready().await;
        assert!(queue.is_empty());
        hook.assert_hits(2);
    }

    #[tokio::test]
    async fn pending_items_are_not_dispatched_early() {
        let server = MockServer::start();
        let dir = tempfile::tempdir().unwrap();

        let hook = server.mock(|when, then| {
            when.method(POST).path("/hook");
            then.status(200);
        });

        let mut config = Config::default();
        config.retry.state_file = dir.path().join("retry_state.json");
        config.retry.initial_delay_secs = 3600;
        let queue = Arc::new(RetryQueue::new(
            ConfigHandle::new(config),
            Dispatcher::new(),
        ));
        queue.enqueue(request_to(server.url("/hook")));

        queue.process_ready().await;

        hook.assert_hits(0);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn backoff_deadline_monotone_across_reenqueues() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.retry.state_file = dir.path().join("retry_state.json");
        config.retry.initial_delay_secs = 10;
        config.retry.max_attempts = 10;
        let queue = RetryQueue::new(ConfigHandle::new(config), Dispatcher::new());

        let mut request = request_to("https://example.com/hook".into());
        let mut last_eta = None;
        for _ in 0..5 {
            queue.enqueue(request.clone());
            let stamped = queue.queue.lock().pop().unwrap();
            let eta = stamped.next_attempt_at.unwrap();
            if let Some(previous) = last_eta {
                assert!(eta >= previous);
            }
            last_eta = Some(eta);
            request = stamped;
        }
    }
}
