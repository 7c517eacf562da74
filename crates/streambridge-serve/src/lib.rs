//! streambridge - Twitch EventSub webhook bridge.
//!
//! This crate wires the pieces together: the axum ingress that receives
//! signed EventSub notifications, the event processor that classifies and
//! enriches them, the dedup cache that guarantees at-most-once dispatch
//! per event, and the application lifecycle (startup ordering, background
//! task families, graceful shutdown, config reload plumbing).
//!
//! # Request path
//!
//! ```text
//! POST /twitch -> MAC check -> EventProcessor -> dedupe -> enrich
//!              -> dispatch -> (file sink, retry queue on failure)
//! ```
//!
//! The HTTP response only reflects classification (processed, ignored,
//! unconfigured, error); delivery results surface through logs, metrics
//! and the file sink.

pub mod app;
pub mod dedupe;
pub mod processor;
mod routes;
mod state;

pub use self::dedupe::{fingerprint, DedupeCache};
pub use self::processor::{Classification, EventProcessor};
pub use self::routes::router;
pub use self::state::AppState;
