//! HTTP routes.

mod health;
mod home;
mod ingest;

use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::http::Request;
use axum::routing::{get, post};
use axum::Router;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::Level;

use crate::state::AppState;

/// Maximum accepted ingress body.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Every response must complete within this bound.
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

/// Build the application router. Unknown paths fall through to axum's 404;
/// known paths with the wrong method answer 405.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route(
            "/twitch",
            post(ingest::ingest).layer(DefaultBodyLimit::max(MAX_BODY_BYTES)),
        )
        .route("/", get(home::banner))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
                tracing::span!(
                    Level::INFO,
                    "http_request",
                    method = %request.method(),
                    path = %request.uri().path(),
                )
            }),
        )
        .layer(TimeoutLayer::new(RESPONSE_TIMEOUT))
        .with_state(state)
}
