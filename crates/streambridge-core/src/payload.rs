//! Outbound payload and dispatch types shared across the pipeline.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::signing::HashAlgorithm;

/// The notification body POSTed to downstream targets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutboundPayload {
    pub streamer_login: String,
    pub streamer_name: String,
    pub streamer_id: String,

    /// Public channel URL, e.g. `https://twitch.tv/<login>`.
    pub url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub view_count: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub followers_count: Option<u64>,

    /// Channel tags reported by Twitch, followed by `additional_tags`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Two-letter language code derived from tags or channel metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageData>,

    /// When this notification was assembled.
    pub timestamp: DateTime<Utc>,

    /// Operator-defined static tags, also merged into `tags`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_tags: Vec<String>,
}

impl OutboundPayload {
    /// Seed a payload from broadcaster identity; enrichment fills the rest.
    pub fn seed(login: &str, name: &str, user_id: &str, additional_tags: Vec<String>) -> Self {
        let display_name = if name.is_empty() { login } else { name };
        Self {
            streamer_login: login.to_string(),
            streamer_name: display_name.to_string(),
            streamer_id: user_id.to_string(),
            url: format!("https://twitch.tv/{login}"),
            view_count: None,
            followers_count: None,
            tags: Vec::new(),
            language: None,
            description: None,
            image: None,
            timestamp: Utc::now(),
            additional_tags,
        }
    }
}

/// Profile image attached to a payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageData {
    pub url: String,
    pub width: u32,
    pub height: u32,

    /// Base64-encoded image bytes.
    pub data_base64: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// A delivery order: everything the dispatcher needs to sign and POST one
/// payload to one destination. Also the unit persisted by the retry queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub target_url: String,
    pub header_name: String,
    pub algorithm: HashAlgorithm,
    pub secret: String,
    pub streamer_key: String,
    pub payload: OutboundPayload,

    /// 1-based attempt counter; bumped by the retry queue on enqueue.
    pub attempt: u32,

    /// Earliest time the next attempt may run. `None` until enqueued.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_attempt_at: Option<DateTime<Utc>>,
}

/// Result of a single dispatch attempt.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub success: bool,
    pub status_code: Option<u16>,
    pub error: Option<String>,
    pub elapsed: Duration,
}

impl DispatchOutcome {
    pub fn failure(error: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            success: false,
            status_code: None,
            error: Some(error.into()),
            elapsed,
        }
    }
}
