//! Event processor: classify a notification and drive the pipeline.
//!
//! Classification reflects only the matching and dedup steps; whatever
//! happens downstream (enrichment gaps, dispatch failures) is reported
//! through logs, metrics and the file sink, never through the HTTP status
//! returned upstream.

use std::sync::Arc;
use std::time::Duration;

use streambridge_core::{ConfigHandle, DispatchRequest, OutboundPayload};
use streambridge_dispatch::{Dispatcher, OutputWriter, RetryQueue};
use streambridge_twitch::types::{EventSubEnvelope, EventSubHeaders, StreamOnlineEvent, STREAM_ONLINE};
use streambridge_twitch::{EnrichOutcome, Enricher};

use crate::dedupe::{fingerprint, DedupeCache};

/// Overall deadline for the enrichment phase.
const ENRICH_TIMEOUT: Duration = Duration::from_secs(15);

/// How the processor classified a notification. Drives the HTTP response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Accepted for delivery (including tag-filter blocks, which are an
    /// accepted outcome with dispatch skipped).
    Processed,
    /// Same fingerprint seen within the dedup TTL.
    DuplicateIgnored,
    /// No configured streamer matches; upstream should drop the
    /// subscription.
    UnconfiguredStreamer,
    /// A subscription type this service does not handle.
    UnsupportedEvent,
    /// The event was unusable or the pipeline was misconfigured.
    InternalError,
}

pub struct EventProcessor {
    config: Arc<ConfigHandle>,
    dedupe: Arc<DedupeCache>,
    enricher: Enricher,
    dispatcher: Dispatcher,
    retry: Arc<RetryQueue>,
    sink: Arc<OutputWriter>,
}

impl EventProcessor {
    pub fn new(
        config: Arc<ConfigHandle>,
        dedupe: Arc<DedupeCache>,
        enricher: Enricher,
        dispatcher: Dispatcher,
        retry: Arc<RetryQueue>,
        sink: Arc<OutputWriter>,
    ) -> Self {
        Self {
            config,
            dedupe,
            enricher,
            dispatcher,
            retry,
            sink,
        }
    }

    /// Handle one EventSub notification.
    pub async fn process_notification(
        &self,
        headers: &EventSubHeaders,
        envelope: &EventSubEnvelope,
    ) -> Classification {
        let subscription_type = envelope
            .subscription
            .as_ref()
            .map(|s| s.kind.as_str())
            .filter(|kind| !kind.is_empty())
            .unwrap_or(headers.subscription_type.as_str());

        if subscription_type != STREAM_ONLINE {
            tracing::warn!(subscription_type, "unsupported subscription type");
            return Classification::UnsupportedEvent;
        }

        let event: StreamOnlineEvent = match envelope
            .event
            .clone()
            .map(serde_json::from_value)
            .transpose()
        {
            Ok(Some(event)) => event,
            Ok(None) => {
                tracing::error!(message_id = %headers.message_id, "notification has no event body");
                return Classification::InternalError;
            }
            Err(err) => {
                tracing::error!(
                    message_id = %headers.message_id,
                    error = %err,
                    "failed to decode stream.online event"
                );
                return Classification::InternalError;
            }
        };

        tracing::info!(
            broadcaster_id = %event.broadcaster_user_id,
            broadcaster_login = %event.broadcaster_user_login,
            started_at = %event.started_at,
            message_id = %headers.message_id,
            "stream online event received"
        );

        let config = self.config.load();
        let Some((streamer_key, streamer)) =
            config.find_streamer(&event.broadcaster_user_id, &event.broadcaster_user_login)
        else {
            tracing::info!(
                broadcaster_login = %event.broadcaster_user_login,
                "stream event for unconfigured streamer"
            );
            return Classification::UnconfiguredStreamer;
        };
        let streamer_key = streamer_key.to_string();
        let streamer = streamer.clone();

        let key = fingerprint(&event.broadcaster_user_id, &event.id, event.started_at);
        if self.dedupe.is_duplicate(&key) {
            metrics::counter!("events_duplicate_total").increment(1);
            tracing::info!(
                event_key = %key,
                broadcaster_login = %event.broadcaster_user_login,
                "duplicate event detected, skipping"
            );
            return Classification::DuplicateIgnored;
        }
        let event_bytes = serde_json::to_vec(&event).unwrap_or_default();
        self.dedupe.add(&key, &event_bytes);

        metrics::counter!("events_processed_total").increment(1);

        let mut payload = OutboundPayload::seed(
            &event.broadcaster_user_login,
            &event.broadcaster_user_name,
            &event.broadcaster_user_id,
            streamer.additional_tags.clone(),
        );

        match tokio::time::timeout(ENRICH_TIMEOUT, self.enricher.enrich(&mut payload, &streamer))
            .await
        {
            Ok(EnrichOutcome::Blocked) => {
                // Tag filter verdict: an accepted outcome, recorded in the
                // sink, with no dispatch.
                self.sink.write_payload(payload, true, None);
                return Classification::Processed;
            }
            Ok(EnrichOutcome::Completed) => {}
            Err(_) => {
                tracing::warn!(
                    streamer_key = %streamer_key,
                    "enrichment deadline exceeded, continuing with partial data"
                );
            }
        }

        let Some(request) = resolve_destination(&config, &streamer_key, &streamer, payload.clone())
        else {
            tracing::error!(
                streamer_key = %streamer_key,
                has_global_webhook = config.global_webhook.enabled,
                "no webhook destination configured for streamer"
            );
            self.sink.write_payload(
                payload,
                false,
                Some("no webhook destination configured".to_string()),
            );
            return Classification::InternalError;
        };

        let outcome = self.dispatcher.dispatch(&request).await;
        if outcome.success {
            tracing::info!(
                target_url = %request.target_url,
                streamer_key = %streamer_key,
                elapsed_ms = outcome.elapsed.as_millis() as u64,
                "webhook dispatched successfully"
            );
        } else {
            tracing::warn!(
                target_url = %request.target_url,
                streamer_key = %streamer_key,
                error = outcome.error.as_deref().unwrap_or("unknown"),
                status_code = ?outcome.status_code,
                "initial webhook dispatch failed, added to retry queue"
            );
            self.retry.enqueue(request);
        }

        self.sink.write_payload(payload, outcome.success, outcome.error);

        Classification::Processed
    }
}

/// Choose the delivery target: the streamer's own URL, else the global
/// fallback when enabled.
fn resolve_destination(
    config: &streambridge_core::Config,
    streamer_key: &str,
    streamer: &streambridge_core::StreamerConfig,
    payload: OutboundPayload,
) -> Option<DispatchRequest> {
    if !streamer.target_url.is_empty() {
        return Some(DispatchRequest {
            target_url: streamer.target_url.clone(),
            header_name: streamer.target_header.clone(),
            algorithm: streamer.target_algorithm,
            secret: streamer.target_secret.clone(),
            streamer_key: streamer_key.to_string(),
            payload,
            attempt: 1,
            next_attempt_at: None,
        });
    }

    let global = &config.global_webhook;
    if global.enabled && !global.url.is_empty() {
        tracing::debug!(streamer_key, "using global webhook destination");
        return Some(DispatchRequest {
            target_url: global.url.clone(),
            header_name: global.header.clone(),
            algorithm: global.algorithm,
            secret: global.secret.clone(),
            streamer_key: streamer_key.to_string(),
            payload,
            attempt: 1,
            next_attempt_at: None,
        });
    }

    None
}
