//! Payload enrichment.
//!
//! The enricher takes a seeded [`OutboundPayload`] and fills in channel
//! metadata from Helix: view and follower counts, description, profile
//! image, tags and language. Every step runs under its own 5 second
//! deadline and is skipped on failure; a partially enriched payload still
//! ships. The one authoritative step is the tag filter, which can block
//! delivery entirely.

use std::sync::Arc;
use std::time::Duration;

use streambridge_core::{ConfigHandle, OutboundPayload, StreamerConfig};

use crate::client::HelixClient;
use crate::image_cache::ImageCache;

/// Per-step deadline; a slow Helix endpoint must not stall the pipeline.
const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// What enrichment decided about the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrichOutcome {
    /// Payload enriched (possibly partially); deliver it.
    Completed,
    /// The streamer's tag filter matched nothing; do not deliver.
    Blocked,
}

pub struct Enricher {
    client: Arc<HelixClient>,
    images: ImageCache,
}

impl Enricher {
    pub fn new(config: Arc<ConfigHandle>, client: Arc<HelixClient>) -> Self {
        Self {
            client,
            images: ImageCache::new(config),
        }
    }

    /// Enrich `payload` in place. Soft failures are logged and skipped;
    /// only the tag filter short-circuits.
    pub async fn enrich(
        &self,
        payload: &mut OutboundPayload,
        streamer: &StreamerConfig,
    ) -> EnrichOutcome {
        let streamer_id = payload.streamer_id.clone();

        // User record: view count, description, profile image.
        match tokio::time::timeout(STEP_TIMEOUT, self.client.get_user_by_id(&streamer_id)).await {
            Ok(Ok(user)) => {
                payload.view_count = Some(user.view_count);
                if !user.description.is_empty() {
                    payload.description = Some(user.description);
                }

                if !user.profile_image_url.is_empty() {
                    match tokio::time::timeout(
                        STEP_TIMEOUT,
                        self.images.get(&streamer_id, &user.profile_image_url),
                    )
                    .await
                    {
                        Ok(Ok(image)) => payload.image = Some(image),
                        Ok(Err(err)) => {
                            tracing::warn!(streamer_id, error = %err, "failed to get profile image")
                        }
                        Err(_) => {
                            tracing::warn!(streamer_id, "profile image fetch timed out")
                        }
                    }
                }
            }
            Ok(Err(err)) => tracing::warn!(streamer_id, error = %err, "failed to get user info"),
            Err(_) => tracing::warn!(streamer_id, "user info lookup timed out"),
        }

        // Channel record: tags, language, and the authoritative tag filter.
        match tokio::time::timeout(STEP_TIMEOUT, self.client.get_channel_info(&streamer_id)).await {
            Ok(Ok(channel)) => {
                if !tag_filter_accepts(&channel.tags, &streamer.tag_filter) {
                    tracing::info!(
                        streamer_login = %payload.streamer_login,
                        channel_tags = ?channel.tags,
                        tag_filter = ?streamer.tag_filter,
                        "stream blocked by tag filter"
                    );
                    return EnrichOutcome::Blocked;
                }

                payload.language = Some(detect_language(
                    &channel.tags,
                    &channel.broadcaster_language,
                ));

                let mut tags = channel.tags;
                tags.extend(payload.additional_tags.iter().cloned());
                payload.tags = tags;
            }
            // Without channel info the filter cannot run; deliver with
            // basic data, as for any other soft failure.
            Ok(Err(err)) => tracing::warn!(streamer_id, error = %err, "failed to get channel info"),
            Err(_) => tracing::warn!(streamer_id, "channel info lookup timed out"),
        }

        match tokio::time::timeout(STEP_TIMEOUT, self.client.get_follower_count(&streamer_id)).await
        {
            Ok(Ok(count)) => payload.followers_count = Some(count),
            Ok(Err(err)) => {
                tracing::warn!(streamer_id, error = %err, "failed to get follower count")
            }
            Err(_) => tracing::warn!(streamer_id, "follower count lookup timed out"),
        }

        tracing::debug!(
            streamer_id,
            view_count = ?payload.view_count,
            followers_count = ?payload.followers_count,
            tag_count = payload.tags.len(),
            has_image = payload.image.is_some(),
            "payload enrichment completed"
        );

        EnrichOutcome::Completed
    }
}

/// Accept iff the filter is empty or any channel tag equals any filter
/// entry case-insensitively.
fn tag_filter_accepts(channel_tags: &[String], filter: &[String]) -> bool {
    if filter.is_empty() {
        return true;
    }
    channel_tags.iter().any(|tag| {
        let tag = tag.to_lowercase();
        filter.iter().any(|wanted| tag == wanted.to_lowercase())
    })
}

/// Map channel tags to a two-letter language code, falling back to the
/// broadcaster language, then to English.
pub fn detect_language(tags: &[String], broadcaster_language: &str) -> String {
    for tag in tags {
        let code = match tag.to_lowercase().as_str() {
            "english" => "en",
            "german" | "deutsch" => "de",
            "spanish" | "español" => "es",
            "french" | "français" => "fr",
            "italian" | "italiano" => "it",
            "portuguese" | "português" => "pt",
            "russian" | "русский" => "ru",
            "japanese" | "日本語" => "ja",
            "korean" | "한국어" => "ko",
            "chinese" | "中文" => "zh",
            _ => continue,
        };
        return code.to_string();
    }

    if !broadcaster_language.is_empty() {
        return broadcaster_language.to_string();
    }

    "en".to_string()
}
