//! Twitch integration for streambridge.
//!
//! Three concerns live here, all speaking to Twitch over HTTPS:
//!
//! - [`HelixClient`]: app-credential token lifecycle plus typed Helix
//!   calls (users, channels, followers, EventSub subscriptions).
//! - [`SubscriptionController`]: reconciles the EventSub subscription set
//!   against the configured streamers, at startup, hourly and on reload.
//! - [`Enricher`]: augments an outbound payload with channel metadata and
//!   a cached profile image, and applies the per-streamer tag filter.

pub mod client;
mod enricher;
mod error;
mod image_cache;
pub mod subscriptions;
mod token;
pub mod types;

pub use self::client::HelixClient;
pub use self::enricher::{detect_language, EnrichOutcome, Enricher};
pub use self::error::{Result, TwitchError};
pub use self::image_cache::{spawn_image_sweeper, ImageCache, IMAGE_TTL};
pub use self::subscriptions::SubscriptionController;
pub use self::token::AppAccessToken;
