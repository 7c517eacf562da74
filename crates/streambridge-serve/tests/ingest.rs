//! End-to-end tests of the ingress pipeline against a mocked Helix API
//! and mocked downstream targets.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use httpmock::prelude::*;
use tower::ServiceExt;

use streambridge_core::{signing, Config, ConfigHandle, StreamerConfig};
use streambridge_dispatch::{Dispatcher, OutputWriter, RetryQueue};
use streambridge_serve::{router, AppState, DedupeCache, EventProcessor};
use streambridge_twitch::{Enricher, HelixClient};

const WEBHOOK_SECRET: &str = "test-webhook-secret";

struct Harness {
    router: Router,
    helix: MockServer,
    dedupe: Arc<DedupeCache>,
    retry: Arc<RetryQueue>,
    sink: Arc<OutputWriter>,
    _dir: tempfile::TempDir,
}

fn harness(customize: impl FnOnce(&mut Config)) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let helix = MockServer::start();

    let mut config = Config::default();
    config.twitch.client_id = "cid".into();
    config.twitch.client_secret = "csecret".into();
    config.twitch.webhook_secret = WEBHOOK_SECRET.into();
    config.twitch.token_file = dir.path().join("tokens.json");
    config.retry.state_file = dir.path().join("retry_state.json");
    config.retry.initial_delay_secs = 0;
    config.cache.file_path = dir.path().join("cache.json");
    config.cache.image_cache_dir = dir.path().join("image_cache");
    config.output.file_path = dir.path().join("output.json");
    customize(&mut config);
    std::fs::create_dir_all(&config.cache.image_cache_dir).unwrap();

    let handle = ConfigHandle::new(config);

    helix.mock(|when, then| {
        when.method(POST).path("/oauth2/token");
        then.status(200).json_body(serde_json::json!({
            "access_token": "app-token", "token_type": "bearer", "expires_in": 3600
        }));
    });

    let client = Arc::new(HelixClient::with_base_urls(
        Arc::clone(&handle),
        helix.url("/helix"),
        helix.url("/oauth2/token"),
    ));

    let dedupe = Arc::new(DedupeCache::new(Arc::clone(&handle)));
    let sink = Arc::new(OutputWriter::new(Arc::clone(&handle)));
    let dispatcher = Dispatcher::new();
    let retry = Arc::new(RetryQueue::new(Arc::clone(&handle), dispatcher.clone()));
    let enricher = Enricher::new(Arc::clone(&handle), client);

    let processor = Arc::new(EventProcessor::new(
        Arc::clone(&handle),
        Arc::clone(&dedupe),
        enricher,
        dispatcher,
        Arc::clone(&retry),
        Arc::clone(&sink),
    ));

    Harness {
        router: router(AppState::new(handle, processor)),
        helix,
        dedupe,
        retry,
        sink,
        _dir: dir,
    }
}

fn streamer(user_id: &str, login: &str, target_url: &str) -> StreamerConfig {
    StreamerConfig {
        user_id: user_id.into(),
        login: login.into(),
        target_url: target_url.into(),
        ..StreamerConfig::default()
    }
}

fn notification_body(event_id: &str, broadcaster_id: &str, login: &str) -> String {
    serde_json::json!({
        "subscription": {
            "id": "sub-1",
            "type": "stream.online",
            "status": "enabled",
            "condition": {"broadcaster_user_id": broadcaster_id}
        },
        "event": {
            "id": event_id,
            "broadcaster_user_id": broadcaster_id,
            "broadcaster_user_login": login,
            "broadcaster_user_name": login,
            "type": "live",
            "started_at": "2024-06-01T12:00:00Z"
        }
    })
    .to_string()
}

fn signed_request(message_type: &str, body: &str) -> Request<Body> {
    signed_request_with(message_type, body, None)
}

/// Build a `/twitch` POST signed over the given bytes; `tamper` swaps the
/// body after signing.
fn signed_request_with(message_type: &str, body: &str, tamper: Option<&str>) -> Request<Body> {
    let message_id = "msg-0001";
    let timestamp = "2024-06-01T12:00:01Z";
    let signature =
        signing::eventsub_signature(WEBHOOK_SECRET, message_id, timestamp, body.as_bytes());

    Request::builder()
        .method("POST")
        .uri("/twitch")
        .header("Twitch-Eventsub-Message-Id", message_id)
        .header("Twitch-Eventsub-Message-Timestamp", timestamp)
        .header("Twitch-Eventsub-Message-Type", message_type)
        .header("Twitch-Eventsub-Message-Signature", signature)
        .header("Twitch-Eventsub-Subscription-Type", "stream.online")
        .header("Twitch-Eventsub-Subscription-Version", "1")
        .header("Content-Type", "application/json")
        .body(Body::from(tamper.unwrap_or(body).to_string()))
        .unwrap()
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn verification_challenge_echoed_as_text() {
    let h = harness(|_| {});

    let body = r#"{"challenge":"X42","subscription":{"id":"s1","type":"stream.online"}}"#;
    let response = h
        .router
        .clone()
        .oneshot(signed_request("webhook_callback_verification", body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "text/plain"
    );
    assert_eq!(body_string(response).await, "X42");
}

#[tokio::test]
async fn unconfigured_streamer_yields_410() {
    let h = harness(|_| {});

    let body = notification_body("evt-1", "999", "nobody");
    let response = h
        .router
        .clone()
        .oneshot(signed_request("notification", &body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::GONE);
    // Nothing was cached for the unknown broadcaster.
    assert!(h.dedupe.is_empty());
}

#[tokio::test]
async fn duplicate_event_dispatches_exactly_once() {
    let target = MockServer::start();
    let hook = target.mock(|when, then| {
        when.method(POST).path("/hook");
        then.status(200);
    });

    let h = harness(|config| {
        config
            .streamers
            .insert("s".into(), streamer("1", "alice", &target.url("/hook")));
    });

    let body = notification_body("evt-1", "1", "alice");

    let first = h
        .router
        .clone()
        .oneshot(signed_request("notification", &body))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert!(body_string(first).await.contains("processed"));

    let second = h
        .router
        .clone()
        .oneshot(signed_request("notification", &body))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    assert!(body_string(second).await.contains("ignored"));

    hook.assert_hits(1);
    assert!(h.retry.is_empty());
}

#[tokio::test]
async fn tag_filter_blocks_dispatch_but_counts_as_processed() {
    let target = MockServer::start();
    let hook = target.mock(|when, then| {
        when.method(POST).path("/hook");
        then.status(200);
    });

    let h = harness(|config| {
        let mut spec = streamer("1", "alice", &target.url("/hook"));
        spec.tag_filter = vec!["Gaming".into()];
        config.streamers.insert("s".into(), spec);
    });

    h.helix.mock(|when, then| {
        when.method(GET).path("/helix/channels");
        then.status(200).json_body(serde_json::json!({
            "data": [{
                "broadcaster_id": "1",
                "broadcaster_login": "alice",
                "broadcaster_name": "Alice",
                "broadcaster_language": "en",
                "tags": ["Music"]
            }]
        }));
    });

    let body = notification_body("evt-2", "1", "alice");
    let response = h
        .router
        .clone()
        .oneshot(signed_request("notification", &body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_string(response).await.contains("processed"));

    // No outbound POST, but the sink recorded the blocked event.
    hook.assert_hits(0);
    let recent = h.sink.recent(10);
    assert_eq!(recent.len(), 1);
    assert!(recent[0].success);
    assert!(recent[0].error.is_none());
}

#[tokio::test]
async fn failed_dispatch_retries_until_success() {
    let target = MockServer::start();
    let mut failing = target.mock(|when, then| {
        when.method(POST).path("/hook");
        then.status(500);
    });

    let h = harness(|config| {
        config
            .streamers
            .insert("s".into(), streamer("1", "alice", &target.url("/hook")));
    });

    let body = notification_body("evt-3", "1", "alice");
    let response = h
        .router
        .clone()
        .oneshot(signed_request("notification", &body))
        .await
        .unwrap();

    // Classification is still "processed"; the failure went to the queue.
    assert_eq!(response.status(), StatusCode::OK);
    failing.assert_hits(1);
    assert_eq!(h.retry.len(), 1);

    let recent = h.sink.recent(10);
    assert!(!recent[0].success);
    assert_eq!(recent[0].error.as_deref(), Some("HTTP 500"));

    // Attempt 2 also fails.
    h.retry.process_ready().await;
    failing.assert_hits(2);
    assert_eq!(h.retry.len(), 1);

    // Target recovers; attempt 3 succeeds and the queue drains.
    failing.delete();
    let ok = target.mock(|when, then| {
        when.method(POST).path("/hook");
        then.status(200);
    });

    h.retry.process_ready().await;
    ok.assert_hits(1);
    assert!(h.retry.is_empty());
}

#[tokio::test]
async fn tampered_body_rejected_before_any_processing() {
    let target = MockServer::start();
    let hook = target.mock(|when, then| {
        when.method(POST).path("/hook");
        then.status(200);
    });

    let h = harness(|config| {
        config
            .streamers
            .insert("s".into(), streamer("1", "alice", &target.url("/hook")));
    });

    let users = h.helix.mock(|when, then| {
        when.method(GET).path("/helix/users");
        then.status(200).json_body(serde_json::json!({"data": []}));
    });

    let body = notification_body("evt-4", "1", "alice");
    let tampered = body.replace("evt-4", "evt-5");
    let response = h
        .router
        .clone()
        .oneshot(signed_request_with("notification", &body, Some(&tampered)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    // No enrichment, no dispatch, no state mutation.
    users.assert_hits(0);
    hook.assert_hits(0);
    assert!(h.dedupe.is_empty());
    assert!(h.sink.recent(10).is_empty());
}

#[tokio::test]
async fn enrichment_populates_payload_fields() {
    let target = MockServer::start();

    let h = harness(|config| {
        let mut spec = streamer("1", "alice", &target.url("/hook"));
        spec.additional_tags = vec!["vip".into()];
        config.streamers.insert("s".into(), spec);
    });

    h.helix.mock(|when, then| {
        when.method(GET).path("/helix/users").query_param("id", "1");
        then.status(200).json_body(serde_json::json!({
            "data": [{
                "id": "1",
                "login": "alice",
                "display_name": "Alice",
                "description": "streams things",
                "profile_image_url": h.helix.url("/images/alice.jpg"),
                "view_count": 42
            }]
        }));
    });
    h.helix.mock(|when, then| {
        when.method(GET).path("/images/alice.jpg");
        then.status(200)
            .header("content-type", "image/jpeg")
            .body(b"fakejpeg");
    });
    h.helix.mock(|when, then| {
        when.method(GET).path("/helix/channels");
        then.status(200).json_body(serde_json::json!({
            "data": [{
                "broadcaster_id": "1",
                "broadcaster_language": "en",
                "tags": ["Deutsch", "Gaming"]
            }]
        }));
    });
    h.helix.mock(|when, then| {
        when.method(GET).path("/helix/channels/followers");
        then.status(200).json_body(serde_json::json!({"total": 1234}));
    });

    let hook = target.mock(|when, then| {
        when.method(POST).path("/hook").json_body_partial(
            r#"{
                "streamer_login": "alice",
                "streamer_id": "1",
                "view_count": 42,
                "followers_count": 1234,
                "language": "de",
                "tags": ["Deutsch", "Gaming", "vip"],
                "additional_tags": ["vip"]
            }"#,
        );
        then.status(200);
    });

    let body = notification_body("evt-6", "1", "alice");
    let response = h
        .router
        .clone()
        .oneshot(signed_request("notification", &body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    hook.assert();

    let recent = h.sink.recent(1);
    let payload = &recent[0].payload;
    assert_eq!(payload.description.as_deref(), Some("streams things"));
    let image = payload.image.as_ref().unwrap();
    assert_eq!(image.width, 300);
    assert!(!image.data_base64.is_empty());
}

#[tokio::test]
async fn streamer_matched_by_login_when_user_id_unknown() {
    let target = MockServer::start();
    let hook = target.mock(|when, then| {
        when.method(POST).path("/hook");
        then.status(200);
    });

    let h = harness(|config| {
        config
            .streamers
            .insert("s".into(), streamer("", "ALICE", &target.url("/hook")));
    });

    let body = notification_body("evt-7", "1", "alice");
    let response = h
        .router
        .clone()
        .oneshot(signed_request("notification", &body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    hook.assert_hits(1);
}

#[tokio::test]
async fn revocation_acknowledged_with_ignored() {
    let h = harness(|_| {});

    let body = r#"{"subscription":{"id":"s1","type":"stream.online","status":"authorization_revoked"}}"#;
    let response = h
        .router
        .clone()
        .oneshot(signed_request("revocation", body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_string(response).await.contains("ignored"));
}

#[tokio::test]
async fn unknown_message_type_is_500() {
    let h = harness(|_| {});

    let response = h
        .router
        .clone()
        .oneshot(signed_request("mystery_type", "{}"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn unsupported_subscription_type_is_ignored() {
    let h = harness(|_| {});

    let body = r#"{
        "subscription": {"id": "s1", "type": "channel.follow", "status": "enabled"},
        "event": {}
    }"#;
    let response = h
        .router
        .clone()
        .oneshot(signed_request("notification", body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_string(response).await.contains("ignored"));
}

#[tokio::test]
async fn oversized_body_is_400() {
    let h = harness(|_| {});

    let body = "x".repeat(1024 * 1024 + 1);
    let response = h
        .router
        .clone()
        .oneshot(signed_request("notification", &body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn malformed_json_after_valid_mac_is_400() {
    let h = harness(|_| {});

    let response = h
        .router
        .clone()
        .oneshot(signed_request("notification", "{not json"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn health_banner_and_routing() {
    let h = harness(|_| {});

    let health = h
        .router
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(health.status(), StatusCode::OK);
    let health_body = body_string(health).await;
    assert!(health_body.contains("\"status\":\"healthy\""));
    assert!(health_body.contains("streambridge"));

    let banner = h
        .router
        .clone()
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(banner.status(), StatusCode::OK);
    assert!(body_string(banner).await.contains("streambridge"));

    let missing = h
        .router
        .clone()
        .oneshot(Request::get("/nope").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    let wrong_method = h
        .router
        .clone()
        .oneshot(Request::get("/twitch").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(wrong_method.status(), StatusCode::METHOD_NOT_ALLOWED);
}
