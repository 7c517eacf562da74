//! Configuration file watcher.
//!
//! Polls the config file's modification time, debounces bursts of writes,
//! then reloads and revalidates. A snapshot that fails to load or validate
//! is logged and dropped; the active snapshot is untouched. Reload is
//! all-or-nothing by construction: the only mutation is the atomic swap
//! inside [`ConfigHandle::install`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::handle::ConfigHandle;

/// How often the file's mtime is checked.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Quiet period required after the last observed change before reloading.
pub const DEBOUNCE: Duration = Duration::from_millis(500);

/// Spawn the watcher task. Exits when `shutdown` flips to `true`.
pub fn spawn_config_watcher(
    handle: Arc<ConfigHandle>,
    shutdown: watch::Receiver<bool>,
) -> Option<JoinHandle<()>> {
    let path = handle.load().config_path.clone()?;
    Some(tokio::spawn(watch_loop(
        path,
        handle,
        shutdown,
        POLL_INTERVAL,
        DEBOUNCE,
    )))
}

async fn watch_loop(
    path: PathBuf,
    handle: Arc<ConfigHandle>,
    mut shutdown: watch::Receiver<bool>,
    poll_interval: Duration,
    debounce: Duration,
) {
    tracing::info!(path = %path.display(), "config watcher started");

    let mut last_mtime = read_mtime(&path);
    let mut pending_since: Option<tokio::time::Instant> = None;
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    tracing::debug!("config watcher stopped");
                    return;
                }
                continue;
            }
        }

        let mtime = read_mtime(&path);
        if mtime != last_mtime {
            last_mtime = mtime;
            pending_since = Some(tokio::time::Instant::now());
            continue;
        }

        if let Some(since) = pending_since {
            if since.elapsed() >= debounce {
                pending_since = None;
                reload(&path, &handle);
            }
        }
    }
}

fn read_mtime(path: &std::path::Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

fn reload(path: &std::path::Path, handle: &ConfigHandle) {
    tracing::info!(path = %path.display(), "config file changed, reloading");

    match Config::load(path) {
        Ok(config) => {
            let streamer_count = config.streamers.len();
            handle.install(config);
            metrics::counter!("config_reloads_total", "outcome" => "ok").increment(1);
            tracing::info!(streamers = streamer_count, "configuration reloaded");
        }
        Err(err) => {
            metrics::counter!("config_reloads_total", "outcome" => "error").increment(1);
            tracing::error!(error = %err, "config reload failed, keeping previous snapshot");
        }
    }
}
