//! EventSub subscription lifecycle.
//!
//! The controller converges the upstream subscription set towards the
//! desired set derived from the active config snapshot: one enabled
//! `stream.online` subscription per configured streamer with a `user_id`.
//! It runs once at startup (after the listener is accepting), on every
//! config reload, and on an hourly cadence with jitter. It only ever
//! *creates* subscriptions for streamers in the desired set; pruning is
//! driven by the ingress answering 410 for unconfigured streamers, so the
//! two mechanisms cannot fight.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use streambridge_core::{Config, ConfigHandle};

use crate::client::HelixClient;
use crate::error::Result;
use crate::types::{STREAM_ONLINE, SUBSCRIPTION_STATUS_ENABLED};

/// Base interval between background reconcile passes.
const RESYNC_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Upper bound of the random jitter added to each interval.
const RESYNC_JITTER: Duration = Duration::from_secs(15 * 60);

/// Outcome of one reconcile pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub existing: usize,
    pub created: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct SubscriptionController {
    config: Arc<ConfigHandle>,
    client: Arc<HelixClient>,
}

impl SubscriptionController {
    pub fn new(config: Arc<ConfigHandle>, client: Arc<HelixClient>) -> Self {
        Self { config, client }
    }

    /// One full reconcile pass: list upstream subscriptions and create any
    /// missing ones. Per-streamer failures are counted, logged and do not
    /// abort the pass.
    pub async fn reconcile(&self) -> Result<ReconcileSummary> {
        let config = self.config.load();
        let callback = resolve_callback_url(&config);

        tracing::info!(callback = %callback, "syncing EventSub subscriptions");

        let page = self.client.list_subscriptions().await?;
        tracing::debug!(
            count = page.data.len(),
            total_cost = page.total_cost,
            max_total_cost = page.max_total_cost,
            "current EventSub subscriptions"
        );

        let active: Vec<&str> = page
            .data
            .iter()
            .filter(|sub| sub.kind == STREAM_ONLINE && sub.status == SUBSCRIPTION_STATUS_ENABLED)
            .filter_map(|sub| sub.broadcaster_user_id())
            .collect();

        let mut summary = ReconcileSummary::default();

        for (key, streamer) in &config.streamers {
            if streamer.user_id.is_empty() {
                tracing::warn!(streamer_key = %key, "skipping streamer with unresolved user_id");
                summary.skipped += 1;
                continue;
            }

            if active.contains(&streamer.user_id.as_str()) {
                summary.existing += 1;
                continue;
            }

            match self
                .client
                .create_subscription(&streamer.user_id, &callback, &config.twitch.webhook_secret)
                .await
            {
                Ok(sub) => {
                    summary.created += 1;
                    tracing::info!(
                        streamer_key = %key,
                        user_id = %streamer.user_id,
                        subscription_id = %sub.id,
                        "created EventSub subscription"
                    );
                }
                Err(err) => {
                    summary.failed += 1;
                    tracing::error!(
                        streamer_key = %key,
                        user_id = %streamer.user_id,
                        error = %err,
                        "failed to create subscription"
                    );
                }
            }
        }

        tracing::info!(
            existing = summary.existing,
            created = summary.created,
            skipped = summary.skipped,
            failed = summary.failed,
            "subscription sync complete"
        );

        Ok(summary)
    }

    /// Spawn the background loop: reconcile hourly with jitter and
    /// immediately on config reload. Exits when `shutdown` flips to `true`.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let mut reloads = self.config.subscribe_reloads();

        tokio::spawn(async move {
            loop {
                let wait = RESYNC_INTERVAL + jitter();

                tokio::select! {
                    _ = tokio::time::sleep(wait) => {
                        tracing::debug!("running background subscription sync");
                    }
                    changed = reloads.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        tracing::info!("config reloaded, refreshing subscriptions");
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            tracing::debug!("subscription controller stopped");
                            return;
                        }
                        continue;
                    }
                }

                if let Err(err) = self.reconcile().await {
                    tracing::error!(error = %err, "background subscription sync failed");
                }
            }
        })
    }
}

fn jitter() -> Duration {
    let millis = rand::rng().random_range(0..RESYNC_JITTER.as_millis() as u64);
    Duration::from_millis(millis)
}

/// Resolve the EventSub callback URL, in priority order: explicit config,
/// external domain, first TLS domain, then the listen address itself with
/// default ports elided.
pub fn resolve_callback_url(config: &Config) -> String {
    if !config.twitch.incoming_webhook_url.is_empty() {
        return config.twitch.incoming_webhook_url.clone();
    }

    if !config.server.external_domain.is_empty() {
        // External domains sit behind a TLS-terminating proxy.
        return format!("https://{}/twitch", config.server.external_domain);
    }

    if config.server.tls.enabled {
        if let Some(domain) = config.server.tls.domains.first() {
            return format!("https://{domain}/twitch");
        }
    }

    let scheme = if config.server.tls.enabled { "https" } else { "http" };
    let host = match config.server.listen_addr.as_str() {
        "" | "0.0.0.0" => "localhost",
        other => other,
    };

    let port = config.server.port;
    if (scheme == "http" && port == 80) || (scheme == "https" && port == 443) {
        format!("{scheme}://{host}/twitch")
    } else {
        format!("{scheme}://{host}:{port}/twitch")
    }
}
