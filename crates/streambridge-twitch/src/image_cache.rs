//! On-disk profile image cache.
//!
//! Images are stored as `<image_cache_dir>/<streamer_id>.jpg` and expire
//! by file mtime after seven days. The original image URL is not stored;
//! callers pass the current URL on every lookup, so cache hits still carry
//! an accurate `url` field.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use streambridge_core::{ConfigHandle, ImageData};

use crate::error::{Result, TwitchError};

/// Cached images older than this are refetched.
pub const IMAGE_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Expired entries are removed on this cadence.
const SWEEP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Twitch profile images are 300x300 unless the CDN says otherwise.
const PROFILE_IMAGE_EDGE: u32 = 300;

pub struct ImageCache {
    config: Arc<ConfigHandle>,
    http: reqwest::Client,
}

impl ImageCache {
    pub fn new(config: Arc<ConfigHandle>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self { config, http }
    }

    /// Return the profile image for a streamer, from cache when fresh,
    /// fetching and caching otherwise.
    pub async fn get(&self, streamer_id: &str, image_url: &str) -> Result<ImageData> {
        let path = self.entry_path(streamer_id);

        if let Some(bytes) = load_fresh(&path) {
            return Ok(image_data(image_url, &bytes, None));
        }

        let response = self.http.get(image_url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TwitchError::api(status.as_u16(), "image fetch failed"));
        }

        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await?;

        if let Err(err) = std::fs::write(&path, &bytes) {
            tracing::warn!(streamer_id, error = %err, "failed to cache profile image");
        }

        Ok(image_data(image_url, &bytes, mime_type))
    }

    fn entry_path(&self, streamer_id: &str) -> PathBuf {
        self.config
            .load()
            .cache
            .image_cache_dir
            .join(format!("{streamer_id}.jpg"))
    }
}

fn image_data(url: &str, bytes: &[u8], mime_type: Option<String>) -> ImageData {
    ImageData {
        url: url.to_string(),
        width: PROFILE_IMAGE_EDGE,
        height: PROFILE_IMAGE_EDGE,
        data_base64: base64::engine::general_purpose::STANDARD.encode(bytes),
        mime_type,
    }
}

/// Read a cached entry if it exists and is within TTL; removes it when
/// expired.
fn load_fresh(path: &Path) -> Option<Vec<u8>> {
    let metadata = std::fs::metadata(path).ok()?;
    let age = metadata.modified().ok()?.elapsed().ok()?;

    if age > IMAGE_TTL {
        let _ = std::fs::remove_file(path);
        return None;
    }

    std::fs::read(path).ok()
}

/// Remove expired images. Returns the number removed.
pub fn sweep(dir: &Path) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            continue;
        }

        let expired = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|mtime| mtime.elapsed().ok())
            .is_some_and(|age| age > IMAGE_TTL);

        if expired && std::fs::remove_file(&path).is_ok() {
            removed += 1;
        }
    }

    if removed > 0 {
        tracing::debug!(removed, dir = %dir.display(), "image cache sweep completed");
    }
    removed
}

/// Spawn the daily sweep task. Exits when `shutdown` flips to `true`.
pub fn spawn_image_sweeper(
    config: Arc<ConfigHandle>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        // The immediate first tick would sweep at startup; skip it.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let dir = config.load().cache.image_cache_dir.clone();
                    sweep(&dir);
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    })
}
