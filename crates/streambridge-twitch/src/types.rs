//! EventSub and Helix wire types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `Twitch-Eventsub-Message-Type` values.
pub const MESSAGE_TYPE_VERIFICATION: &str = "webhook_callback_verification";
pub const MESSAGE_TYPE_NOTIFICATION: &str = "notification";
pub const MESSAGE_TYPE_REVOCATION: &str = "revocation";

/// The only subscription type this service handles.
pub const STREAM_ONLINE: &str = "stream.online";

/// Subscription status reported by Helix for an active webhook transport.
pub const SUBSCRIPTION_STATUS_ENABLED: &str = "enabled";

/// EventSub transport headers extracted from an ingress request.
#[derive(Debug, Clone, Default)]
pub struct EventSubHeaders {
    pub message_id: String,
    pub message_retry: String,
    pub message_type: String,
    pub message_signature: String,
    pub message_timestamp: String,
    pub subscription_type: String,
    pub subscription_version: String,
}

/// Body of every EventSub transport message. Which fields are present
/// depends on the message type.
#[derive(Debug, Clone, Deserialize)]
pub struct EventSubEnvelope {
    #[serde(default)]
    pub subscription: Option<EventSubSubscription>,

    /// Set on `webhook_callback_verification` messages; must be echoed back.
    #[serde(default)]
    pub challenge: Option<String>,

    /// Event body, shaped by the subscription type.
    #[serde(default)]
    pub event: Option<serde_json::Value>,
}

/// An EventSub subscription as reported by Helix.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventSubSubscription {
    #[serde(default)]
    pub id: String,

    #[serde(rename = "type", default)]
    pub kind: String,

    #[serde(default)]
    pub status: String,

    #[serde(default)]
    pub condition: serde_json::Value,

    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl EventSubSubscription {
    /// Broadcaster the subscription targets, when the condition carries one.
    pub fn broadcaster_user_id(&self) -> Option<&str> {
        self.condition.get("broadcaster_user_id")?.as_str()
    }
}

/// `stream.online` event body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamOnlineEvent {
    pub id: String,
    pub broadcaster_user_id: String,
    pub broadcaster_user_login: String,
    #[serde(default)]
    pub broadcaster_user_name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    pub started_at: DateTime<Utc>,
}

/// Helix user record (the fields this service consumes).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HelixUser {
    pub id: String,
    pub login: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub profile_image_url: String,
    #[serde(default)]
    pub view_count: u64,
}

/// Helix channel record.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChannelInfo {
    pub broadcaster_id: String,
    #[serde(default)]
    pub broadcaster_login: String,
    #[serde(default)]
    pub broadcaster_name: String,
    #[serde(default)]
    pub broadcaster_language: String,
    #[serde(default)]
    pub game_name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Page of subscriptions returned by `GET /eventsub/subscriptions`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscriptionPage {
    #[serde(default)]
    pub data: Vec<EventSubSubscription>,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub total_cost: u64,
    #[serde(default)]
    pub max_total_cost: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_parses_verification_body() {
        let body = r#"{
            "challenge": "X42",
            "subscription": {"id": "s1", "type": "stream.online", "status": "webhook_callback_verification_pending"}
        }"#;
        let envelope: EventSubEnvelope = serde_json::from_str(body).unwrap();
        assert_eq!(envelope.challenge.as_deref(), Some("X42"));
        assert_eq!(envelope.subscription.unwrap().kind, "stream.online");
        assert!(envelope.event.is_none());
    }

    #[test]
    fn stream_online_event_parses() {
        let body = r#"{
            "id": "evt-1",
            "broadcaster_user_id": "123",
            "broadcaster_user_login": "alice",
            "broadcaster_user_name": "Alice",
            "type": "live",
            "started_at": "2024-06-01T12:00:00Z"
        }"#;
        let event: StreamOnlineEvent = serde_json::from_str(body).unwrap();
        assert_eq!(event.broadcaster_user_id, "123");
        assert_eq!(event.started_at.timestamp(), 1717243200);
    }

    #[test]
    fn subscription_condition_lookup() {
        let sub: EventSubSubscription = serde_json::from_str(
            r#"{"id": "s", "type": "stream.online", "status": "enabled",
                "condition": {"broadcaster_user_id": "42"}}"#,
        )
        .unwrap();
        assert_eq!(sub.broadcaster_user_id(), Some("42"));
    }
}
