//! Application lifecycle: construction order, background task families,
//! graceful shutdown and reload plumbing.
//!
//! Components are built in dependency order and own their state
//! exclusively; the config snapshot is the only shared value, and it is
//! immutable. Background loops (retry tick, subscription resync, dedup
//! sweep, image sweep, config watcher) all watch the same shutdown channel
//! and exit between iterations; shutdown gives them a bounded grace before
//! the process exits.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use streambridge_core::{metrics as telemetry, watch as config_watch, Config, ConfigHandle};
use streambridge_dispatch::{Dispatcher, OutputWriter, RetryQueue};
use streambridge_twitch::{spawn_image_sweeper, Enricher, HelixClient, SubscriptionController};

use crate::dedupe::DedupeCache;
use crate::processor::EventProcessor;
use crate::routes::router;
use crate::state::AppState;

/// Grace period for draining HTTP connections and background tasks.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Run the service until SIGINT/SIGTERM.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let handle = ConfigHandle::new(config);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Telemetry first so everything after it can record.
    {
        let telemetry_config = handle.load().telemetry.clone();
        if telemetry_config.enabled {
            if let Some(prometheus) = telemetry::init_metrics() {
                telemetry::start_metrics_server(telemetry_config.metrics_port, prometheus)
                    .await
                    .context("failed to start metrics server")?;
            }
        }
    }

    // Twitch client. A failed token grant is logged, not fatal: the token
    // is refreshed lazily on the next upstream call.
    let client = Arc::new(HelixClient::new(Arc::clone(&handle)));
    if let Err(err) = client.start().await {
        tracing::error!(error = %err, "Twitch client startup failed, continuing");
    }

    resolve_streamer_user_ids(&handle, &client).await;

    // Pipeline state.
    let dedupe = Arc::new(DedupeCache::new(Arc::clone(&handle)));
    dedupe.load();

    let sink = Arc::new(OutputWriter::new(Arc::clone(&handle)));
    sink.load_existing();

    let dispatcher = Dispatcher::new();
    let retry = Arc::new(RetryQueue::new(Arc::clone(&handle), dispatcher.clone()));
    retry.load_state();

    let enricher = Enricher::new(Arc::clone(&handle), Arc::clone(&client));
    let processor = Arc::new(EventProcessor::new(
        Arc::clone(&handle),
        Arc::clone(&dedupe),
        enricher,
        dispatcher,
        Arc::clone(&retry),
        Arc::clone(&sink),
    ));

    // Listener. Binding is the one fatal I/O step.
    let bind = {
        let config = handle.load();
        format!("{}:{}", config.server.listen_addr, config.server.port)
    };
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;

    if handle.load().server.tls.enabled {
        tracing::info!(
            cert_dir = %handle.load().server.tls.cert_dir.display(),
            "TLS termination is delegated to the ACME layer; serving plain HTTP behind it"
        );
    }
    tracing::info!(addr = %bind, "starting HTTP server");

    let app = router(AppState::new(Arc::clone(&handle), processor));
    let server = {
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown.wait_for(|stop| *stop).await;
                })
                .await
        })
    };

    // Background task families.
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();
    if let Some(watcher) = config_watch::spawn_config_watcher(Arc::clone(&handle), shutdown_rx.clone())
    {
        tasks.push(watcher);
    }
    tasks.push(Arc::clone(&dedupe).spawn_sweeper(shutdown_rx.clone()));
    tasks.push(spawn_image_sweeper(Arc::clone(&handle), shutdown_rx.clone()));
    tasks.push(Arc::clone(&retry).spawn(shutdown_rx.clone()));

    // The listener is accepting (bind returned), so EventSub verification
    // callbacks can land: reconcile now, then keep reconciling in the
    // background and on reloads.
    let controller = Arc::new(SubscriptionController::new(
        Arc::clone(&handle),
        Arc::clone(&client),
    ));
    if let Err(err) = controller.reconcile().await {
        tracing::error!(error = %err, "initial subscription sync failed");
    }
    tasks.push(Arc::clone(&controller).spawn(shutdown_rx.clone()));

    wait_for_signal().await;
    tracing::info!("shutdown signal received");

    // Stop accepting, wind down loops, persist state.
    let _ = shutdown_tx.send(true);

    match tokio::time::timeout(SHUTDOWN_GRACE, server).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(err))) => tracing::error!(error = %err, "server error during shutdown"),
        Ok(Err(err)) => tracing::error!(error = %err, "server task panicked"),
        Err(_) => tracing::warn!("server did not drain within the shutdown grace"),
    }

    let drain_all = async {
        for task in tasks {
            let _ = task.await;
        }
    };
    if tokio::time::timeout(SHUTDOWN_GRACE, drain_all).await.is_err() {
        tracing::warn!("background tasks did not stop within the shutdown grace");
    }

    dedupe.persist();
    retry.persist();

    tracing::info!("server stopped gracefully");
    Ok(())
}

/// Fill in missing `user_id`s from logins via the Helix resolver and
/// republish the snapshot. Per-streamer failures are logged and skipped;
/// those streamers are excluded from reconciliation until resolved.
pub async fn resolve_streamer_user_ids(handle: &Arc<ConfigHandle>, client: &HelixClient) {
    let config = handle.load();
    let unresolved: Vec<(String, String)> = config
        .streamers
        .iter()
        .filter(|(_, s)| s.user_id.is_empty() && !s.login.is_empty())
        .map(|(key, s)| (key.clone(), s.login.clone()))
        .collect();

    if unresolved.is_empty() {
        return;
    }

    let mut updated = (*config).clone();
    let mut resolved = 0;

    for (key, login) in unresolved {
        match client.resolve_login_to_id(&login).await {
            Ok(user_id) => {
                tracing::info!(streamer_key = %key, login = %login, user_id = %user_id, "resolved streamer user id");
                if let Some(streamer) = updated.streamers.get_mut(&key) {
                    streamer.user_id = user_id;
                    resolved += 1;
                }
            }
            Err(err) => {
                tracing::warn!(streamer_key = %key, login = %login, error = %err, "failed to resolve streamer user id");
            }
        }
    }

    if resolved > 0 {
        handle.install(updated);
    }
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
