//! EventSub ingress: `POST /twitch`.
//!
//! Order of checks: body size, MAC, JSON shape, then message-type
//! dispatch. A request that fails the MAC check mutates no state at all.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use streambridge_core::signing;
use streambridge_twitch::types::{
    EventSubEnvelope, EventSubHeaders, MESSAGE_TYPE_NOTIFICATION, MESSAGE_TYPE_REVOCATION,
    MESSAGE_TYPE_VERIFICATION,
};

use crate::processor::Classification;
use crate::state::AppState;

// EventSub transport header names.
const HDR_MESSAGE_ID: &str = "Twitch-Eventsub-Message-Id";
const HDR_MESSAGE_RETRY: &str = "Twitch-Eventsub-Message-Retry";
const HDR_MESSAGE_TYPE: &str = "Twitch-Eventsub-Message-Type";
const HDR_MESSAGE_SIGNATURE: &str = "Twitch-Eventsub-Message-Signature";
const HDR_MESSAGE_TIMESTAMP: &str = "Twitch-Eventsub-Message-Timestamp";
const HDR_SUBSCRIPTION_TYPE: &str = "Twitch-Eventsub-Subscription-Type";
const HDR_SUBSCRIPTION_VERSION: &str = "Twitch-Eventsub-Subscription-Version";

pub async fn ingest(
    State(state): State<AppState>,
    header_map: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    // The route carries a 1 MiB body limit; an oversized or unreadable
    // body is a 400 here rather than axum's default 413.
    let body = match body {
        Ok(body) => body,
        Err(err) => {
            metrics::counter!("ingress_requests_total", "outcome" => "oversized_body").increment(1);
            tracing::warn!(error = %err, "failed to read webhook body");
            return (StatusCode::BAD_REQUEST, "Bad request").into_response();
        }
    };

    let headers = extract_headers(&header_map);

    tracing::debug!(
        message_type = %headers.message_type,
        subscription_type = %headers.subscription_type,
        message_id = %headers.message_id,
        "Twitch webhook received"
    );

    let secret = state.config.load().twitch.webhook_secret.clone();
    if !signing::verify_eventsub_signature(
        &secret,
        &headers.message_id,
        &headers.message_timestamp,
        &body,
        &headers.message_signature,
    ) {
        metrics::counter!("ingress_requests_total", "outcome" => "invalid_signature").increment(1);
        tracing::warn!(message_id = %headers.message_id, "invalid webhook signature");
        return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    }

    let envelope: EventSubEnvelope = match serde_json::from_slice(&body) {
        Ok(envelope) => envelope,
        Err(err) => {
            metrics::counter!("ingress_requests_total", "outcome" => "malformed_body").increment(1);
            tracing::warn!(message_id = %headers.message_id, error = %err, "malformed webhook body");
            return (StatusCode::BAD_REQUEST, "Bad request").into_response();
        }
    };

    match headers.message_type.as_str() {
        MESSAGE_TYPE_VERIFICATION => verification_response(&headers, &envelope),

        MESSAGE_TYPE_REVOCATION => {
            let (id, status) = envelope
                .subscription
                .as_ref()
                .map(|s| (s.id.as_str(), s.status.as_str()))
                .unwrap_or(("", ""));
            tracing::warn!(
                subscription_id = id,
                status,
                message_id = %headers.message_id,
                "subscription revoked"
            );
            metrics::counter!("ingress_requests_total", "outcome" => "revocation").increment(1);
            ignored_response()
        }

        MESSAGE_TYPE_NOTIFICATION => {
            // Run the pipeline on its own task: if the response deadline
            // fires and this handler is dropped, retry enqueue and sink
            // writes still complete, and the upstream redelivery lands in
            // the dedup cache.
            let processor = Arc::clone(&state.processor);
            let task_headers = headers.clone();
            let task_envelope = envelope.clone();
            let classification = match tokio::spawn(async move {
                processor
                    .process_notification(&task_headers, &task_envelope)
                    .await
            })
            .await
            {
                Ok(classification) => classification,
                Err(err) => {
                    tracing::error!(error = %err, "notification pipeline task failed");
                    Classification::InternalError
                }
            };
            notification_response(&headers, classification)
        }

        other => {
            metrics::counter!("ingress_requests_total", "outcome" => "unknown_type").increment(1);
            tracing::error!(message_type = other, "unknown EventSub message type");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn verification_response(headers: &EventSubHeaders, envelope: &EventSubEnvelope) -> Response {
    let Some(challenge) = envelope.challenge.clone() else {
        tracing::warn!(message_id = %headers.message_id, "verification message without challenge");
        return (StatusCode::BAD_REQUEST, "Bad request").into_response();
    };

    tracing::info!(message_id = %headers.message_id, "webhook verification challenge answered");
    metrics::counter!("ingress_requests_total", "outcome" => "verification").increment(1);

    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/plain")],
        challenge,
    )
        .into_response()
}

fn notification_response(headers: &EventSubHeaders, classification: Classification) -> Response {
    let outcome = match classification {
        Classification::Processed => "processed",
        Classification::DuplicateIgnored => "duplicate",
        Classification::UnconfiguredStreamer => "unconfigured",
        Classification::UnsupportedEvent => "unsupported",
        Classification::InternalError => "error",
    };
    metrics::counter!("ingress_requests_total", "outcome" => outcome).increment(1);

    match classification {
        Classification::Processed => {
            tracing::info!(message_id = %headers.message_id, "event processed");
            (StatusCode::OK, Json(serde_json::json!({"status": "processed"}))).into_response()
        }
        Classification::DuplicateIgnored | Classification::UnsupportedEvent => ignored_response(),
        Classification::UnconfiguredStreamer => {
            tracing::info!(
                message_id = %headers.message_id,
                "unconfigured streamer, responding with 410 Gone"
            );
            StatusCode::GONE.into_response()
        }
        Classification::InternalError => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

fn ignored_response() -> Response {
    (StatusCode::OK, Json(serde_json::json!({"status": "ignored"}))).into_response()
}

fn extract_headers(map: &HeaderMap) -> EventSubHeaders {
    let get = |name: &str| {
        map.get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    };

    EventSubHeaders {
        message_id: get(HDR_MESSAGE_ID),
        message_retry: get(HDR_MESSAGE_RETRY),
        message_type: get(HDR_MESSAGE_TYPE),
        message_signature: get(HDR_MESSAGE_SIGNATURE),
        message_timestamp: get(HDR_MESSAGE_TIMESTAMP),
        subscription_type: get(HDR_SUBSCRIPTION_TYPE),
        subscription_version: get(HDR_SUBSCRIPTION_VERSION),
    }
}
