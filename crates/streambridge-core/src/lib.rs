//! Shared foundation for the streambridge service.
//!
//! This crate holds everything the other streambridge crates agree on:
//!
//! - **Config**: the TOML configuration model, validation, environment
//!   overrides and the file watcher that republishes snapshots.
//! - **Snapshot handle**: a lock-free, atomically swappable pointer to the
//!   active configuration. Readers never block; reloads publish a whole
//!   new snapshot or nothing.
//! - **Signing**: HMAC helpers for inbound EventSub verification and
//!   outbound webhook signatures (SHA-1/256/512).
//! - **Payload types**: the outbound notification payload and the dispatch
//!   request/outcome types shared by the processor, dispatcher and retry
//!   queue.

pub mod config;
mod error;
mod handle;
pub mod metrics;
pub mod payload;
pub mod signing;
pub mod watch;

pub use self::config::{Config, GlobalWebhookConfig, RetryConfig, StreamerConfig};
pub use self::error::ConfigError;
pub use self::handle::ConfigHandle;
pub use self::payload::{DispatchOutcome, DispatchRequest, ImageData, OutboundPayload};
pub use self::signing::HashAlgorithm;
