//! streambridge binary: CLI entry point.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use streambridge_core::config::resolve_config_path;
use streambridge_core::{Config, ConfigHandle};
use streambridge_serve::app;
use streambridge_twitch::{subscriptions, HelixClient, SubscriptionController};

/// Bridge between Twitch EventSub webhooks and downstream notification
/// targets: receives stream events, enriches them with channel metadata
/// and delivers them with retry and dedup guarantees.
#[derive(Parser, Debug)]
#[command(name = "streambridge")]
#[command(about = "Twitch EventSub webhook bridge", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file path (falls back to STREAMBRIDGE_CONFIG, then ./config.toml).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose (debug-level) logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the bridge service (default).
    Run,

    /// Print version information.
    Version,

    /// Configuration management.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// EventSub subscription management.
    Subscriptions {
        #[command(subcommand)]
        command: SubscriptionsCommand,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Validate the configuration file.
    Validate,
    /// Write an example configuration file.
    Example {
        /// Destination path.
        #[arg(default_value = "config.example.toml")]
        path: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
enum SubscriptionsCommand {
    /// List current EventSub subscriptions.
    List,
    /// Run one reconcile pass and exit.
    Sync,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if std::path::Path::new(".env").exists() {
        let _ = dotenvy::dotenv();
    }

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run_server(cli.config.as_deref()).await,
        Command::Version => {
            println!("streambridge {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Command::Config { command } => match command {
            ConfigCommand::Validate => validate_config(cli.config.as_deref()),
            ConfigCommand::Example { path } => write_example_config(&path),
        },
        Command::Subscriptions { command } => {
            subscriptions_command(cli.config.as_deref(), command).await
        }
    }
}

fn load_config(flag: Option<&std::path::Path>) -> anyhow::Result<Config> {
    let path = resolve_config_path(flag);
    if !path.exists() {
        anyhow::bail!(
            "configuration file not found: {}\n\n\
             Configuration file loading priority:\n\
             1. --config flag\n\
             2. STREAMBRIDGE_CONFIG environment variable\n\
             3. config.toml in the working directory",
            path.display()
        );
    }

    let config = Config::load(&path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))?;
    tracing::info!(path = %path.display(), "loaded configuration");
    Ok(config)
}

async fn run_server(flag: Option<&std::path::Path>) -> anyhow::Result<()> {
    let config = load_config(flag)?;

    tracing::info!(
        listen_addr = %config.server.listen_addr,
        port = config.server.port,
        tls_enabled = config.server.tls.enabled,
        streamers = config.streamers.len(),
        "starting streambridge"
    );

    app::run(config).await
}

fn validate_config(flag: Option<&std::path::Path>) -> anyhow::Result<()> {
    let config = load_config(flag)?;
    println!("Configuration is valid");
    println!("Found {} configured streamers", config.streamers.len());
    Ok(())
}

async fn subscriptions_command(
    flag: Option<&std::path::Path>,
    command: SubscriptionsCommand,
) -> anyhow::Result<()> {
    let config = load_config(flag)?;
    let handle = ConfigHandle::new(config);

    let client = Arc::new(HelixClient::new(Arc::clone(&handle)));
    client.start().await.context("failed to start Twitch client")?;

    match command {
        SubscriptionsCommand::List => {
            let page = client.list_subscriptions().await?;
            println!(
                "{} subscriptions (cost {}/{})",
                page.total, page.total_cost, page.max_total_cost
            );
            for sub in &page.data {
                println!(
                    "  {}  {}  {}  broadcaster={}",
                    sub.id,
                    sub.kind,
                    sub.status,
                    sub.broadcaster_user_id().unwrap_or("-")
                );
            }
        }
        SubscriptionsCommand::Sync => {
            let callback = subscriptions::resolve_callback_url(&handle.load());
            println!("Callback URL: {callback}");

            let controller = SubscriptionController::new(handle, client);
            let summary = controller.reconcile().await?;
            println!(
                "Sync complete: {} existing, {} created, {} skipped, {} failed",
                summary.existing, summary.created, summary.skipped, summary.failed
            );
        }
    }

    Ok(())
}

fn write_example_config(path: &std::path::Path) -> anyhow::Result<()> {
    std::fs::write(path, EXAMPLE_CONFIG).with_context(|| {
        format!("failed to write example config to {}", path.display())
    })?;
    println!("Example configuration written to: {}", path.display());
    Ok(())
}

const EXAMPLE_CONFIG: &str = r#"# streambridge configuration
# All values shown are defaults unless marked otherwise.

[server]
listen_addr = "0.0.0.0"
port = 8080
# Public hostname when running behind a reverse proxy (optional).
#external_domain = "bridge.example.com"

[server.tls]
# TLS options feed callback URL resolution; certificate material is
# managed by the ACME layer in cert_dir.
enabled = false
domains = []
cert_dir = "data/acme_certs"

[twitch]
# Application credentials (required).
client_id = "your_twitch_client_id"
client_secret = "your_twitch_client_secret"
# Shared secret for EventSub transport signatures (required).
webhook_secret = "your_webhook_secret"
token_file = "data/tokens.json"
# Explicit EventSub callback URL, overriding derivation (optional).
#incoming_webhook_url = "https://bridge.example.com/twitch"

[retry]
max_attempts = 3
initial_delay_secs = 1
max_delay_secs = 300
backoff_factor = 2.0
state_file = "data/retry_state.json"

[cache]
file_path = "data/cache.json"
ttl_secs = 7200
image_cache_dir = "data/image_cache"

[output]
enabled = true
file_path = "data/output.json"
max_lines = 1000

[telemetry]
enabled = false
metrics_port = 9091
service_name = "streambridge"

# Fallback destination for streamers without their own target_url.
[global_webhook]
enabled = false
url = ""
secret = ""
header = "X-Hub-Signature-256"
algorithm = "SHA-256"

# One table per streamer. Each needs user_id or login.
[streamers.example_streamer]
user_id = "123456789"
login = "example_streamer"
target_url = "https://your-endpoint.example.com/webhook"
target_secret = "per_target_hmac_secret"
target_header = "X-Hub-Signature-256"
target_algorithm = "SHA-256"
# Only notify when the channel carries one of these tags (optional).
tag_filter = ["English", "Gaming"]
# Static tags appended to every payload for this streamer (optional).
additional_tags = ["vip"]
"#;
