//! Application configuration loaded from a TOML file with environment
//! variable overrides.
//!
//! A [`Config`] is an immutable snapshot: it is built once by [`Config::load`],
//! validated as a whole, and then shared read-only through
//! [`crate::ConfigHandle`]. Reloads construct an entirely new snapshot; a
//! snapshot that fails validation is discarded and the previous one stays
//! active.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::error::ConfigError;
use crate::signing::HashAlgorithm;

/// Prefix for environment variable overrides, e.g. `STREAMBRIDGE_SERVER_PORT`.
pub const ENV_PREFIX: &str = "STREAMBRIDGE";

/// Default signature header for outbound webhooks.
pub const DEFAULT_SIGNATURE_HEADER: &str = "X-Hub-Signature-256";

/// Top-level configuration snapshot.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub twitch: TwitchConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    #[serde(default)]
    pub global_webhook: GlobalWebhookConfig,

    /// Configured streamers, keyed by an operator-chosen name.
    #[serde(default)]
    pub streamers: BTreeMap<String, StreamerConfig>,

    /// Path the snapshot was loaded from; used by the watcher for reloads.
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Public hostname when running behind a reverse proxy. Takes part in
    /// callback URL resolution but not in binding.
    #[serde(default)]
    pub external_domain: String,

    #[serde(default)]
    pub tls: TlsConfig,
}

/// TLS options. Certificate acquisition is owned by the ACME layer; this
/// service only validates the options and derives callback URLs from them.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TlsConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub domains: Vec<String>,

    #[serde(default = "default_cert_dir")]
    pub cert_dir: PathBuf,
}

/// Twitch application credentials and ingest options.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TwitchConfig {
    #[serde(default)]
    pub client_id: String,

    #[serde(default)]
    pub client_secret: String,

    /// Shared secret for EventSub transport; keys both the inbound MAC
    /// check and subscription creation.
    #[serde(default)]
    pub webhook_secret: String,

    #[serde(default = "default_token_file")]
    pub token_file: PathBuf,

    /// Explicit callback URL, overriding all derivation rules.
    #[serde(default)]
    pub incoming_webhook_url: String,
}

/// Retry policy for failed webhook deliveries.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay_secs")]
    pub initial_delay_secs: u64,

    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,

    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    #[serde(default = "default_retry_state_file")]
    pub state_file: PathBuf,
}

impl RetryConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_secs)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_secs(self.max_delay_secs)
    }

    /// Backoff before attempt `n` (1-based): `initial * factor^(n-1)`,
    /// capped at `max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1);
        let scaled = self.initial_delay().as_secs_f64() * self.backoff_factor.powi(exp as i32);
        Duration::from_secs_f64(scaled.min(self.max_delay().as_secs_f64()))
    }
}

/// Event deduplication cache settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    #[serde(default = "default_cache_file")]
    pub file_path: PathBuf,

    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,

    /// Directory for on-disk profile image caching.
    #[serde(default = "default_image_cache_dir")]
    pub image_cache_dir: PathBuf,
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// File sink settings: a JSON history of every dispatched payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_output_file")]
    pub file_path: PathBuf,

    #[serde(default = "default_output_max_lines")]
    pub max_lines: usize,
}

/// Prometheus metrics exporter settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TelemetryConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    #[serde(default = "default_service_name")]
    pub service_name: String,
}

/// Fallback destination used when a streamer has no `target_url`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalWebhookConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub url: String,

    #[serde(default)]
    pub secret: String,

    #[serde(default = "default_signature_header")]
    pub header: String,

    #[serde(default)]
    pub algorithm: HashAlgorithm,
}

/// Per-streamer routing and filtering.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StreamerConfig {
    /// Twitch user id. Resolved from `login` at startup when empty.
    #[serde(default)]
    pub user_id: String,

    #[serde(default)]
    pub login: String,

    #[serde(default)]
    pub target_url: String,

    #[serde(default)]
    pub target_secret: String,

    #[serde(default = "default_signature_header")]
    pub target_header: String,

    #[serde(default)]
    pub target_algorithm: HashAlgorithm,

    /// Accept-list matched case-insensitively against Twitch channel tags.
    /// Empty means no filtering.
    #[serde(default)]
    pub tag_filter: Vec<String>,

    /// Static tags appended to the outbound payload.
    #[serde(default)]
    pub additional_tags: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            twitch: TwitchConfig::default(),
            retry: RetryConfig::default(),
            cache: CacheConfig::default(),
            output: OutputConfig::default(),
            telemetry: TelemetryConfig::default(),
            global_webhook: GlobalWebhookConfig::default(),
            streamers: BTreeMap::new(),
            config_path: None,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            port: default_port(),
            external_domain: String::new(),
            tls: TlsConfig::default(),
        }
    }
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            domains: Vec::new(),
            cert_dir: default_cert_dir(),
        }
    }
}

impl Default for TwitchConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            webhook_secret: String::new(),
            token_file: default_token_file(),
            incoming_webhook_url: String::new(),
        }
    }
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            user_id: String::new(),
            login: String::new(),
            target_url: String::new(),
            target_secret: String::new(),
            target_header: default_signature_header(),
            target_algorithm: HashAlgorithm::default(),
            tag_filter: Vec::new(),
            additional_tags: Vec::new(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_secs: default_initial_delay_secs(),
            max_delay_secs: default_max_delay_secs(),
            backoff_factor: default_backoff_factor(),
            state_file: default_retry_state_file(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            file_path: default_cache_file(),
            ttl_secs: default_cache_ttl_secs(),
            image_cache_dir: default_image_cache_dir(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            file_path: default_output_file(),
            max_lines: default_output_max_lines(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

impl Default for GlobalWebhookConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            secret: String::new(),
            header: default_signature_header(),
            algorithm: HashAlgorithm::default(),
        }
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_cert_dir() -> PathBuf {
    PathBuf::from("data/acme_certs")
}
fn default_token_file() -> PathBuf {
    PathBuf::from("data/tokens.json")
}
fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay_secs() -> u64 {
    1
}
fn default_max_delay_secs() -> u64 {
    300
}
fn default_backoff_factor() -> f64 {
    2.0
}
fn default_retry_state_file() -> PathBuf {
    PathBuf::from("data/retry_state.json")
}
fn default_cache_file() -> PathBuf {
    PathBuf::from("data/cache.json")
}
fn default_cache_ttl_secs() -> u64 {
    7200
}
fn default_image_cache_dir() -> PathBuf {
    PathBuf::from("data/image_cache")
}
fn default_output_file() -> PathBuf {
    PathBuf::from("data/output.json")
}
fn default_output_max_lines() -> usize {
    1000
}
fn default_metrics_port() -> u16 {
    9091
}
fn default_service_name() -> String {
    "streambridge".to_string()
}
fn default_signature_header() -> String {
    DEFAULT_SIGNATURE_HEADER.to_string()
}
fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from `path`, apply environment overrides,
    /// validate and create required data directories.
    ///
    /// A missing file is not an error: defaults plus environment overrides
    /// are used, which still must pass validation.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            toml::from_str::<Config>(&raw)?
        } else {
            Config::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        config.ensure_data_dirs()?;
        config.config_path = Some(path.to_path_buf());

        Ok(config)
    }

    /// Apply `STREAMBRIDGE_*` environment variable overrides to scalar
    /// fields. Unparseable values are ignored, keeping the file value.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var(format!("{ENV_PREFIX}_SERVER_LISTEN_ADDR")) {
            self.server.listen_addr = val;
        }
        if let Ok(val) = std::env::var(format!("{ENV_PREFIX}_SERVER_PORT")) {
            if let Ok(port) = val.parse() {
                self.server.port = port;
            }
        }
        if let Ok(val) = std::env::var(format!("{ENV_PREFIX}_TWITCH_CLIENT_ID")) {
            self.twitch.client_id = val;
        }
        if let Ok(val) = std::env::var(format!("{ENV_PREFIX}_TWITCH_CLIENT_SECRET")) {
            self.twitch.client_secret = val;
        }
        if let Ok(val) = std::env::var(format!("{ENV_PREFIX}_TWITCH_WEBHOOK_SECRET")) {
            self.twitch.webhook_secret = val;
        }
        if let Ok(val) = std::env::var(format!("{ENV_PREFIX}_TLS_ENABLED")) {
            if val == "true" {
                self.server.tls.enabled = true;
            }
        }
    }

    /// Validate semantic invariants. Called by [`Config::load`]; also
    /// exposed for `config validate`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.twitch.client_id.is_empty() {
            return Err(ConfigError::invalid("twitch.client_id is required"));
        }
        if self.twitch.client_secret.is_empty() {
            return Err(ConfigError::invalid("twitch.client_secret is required"));
        }
        if self.twitch.webhook_secret.is_empty() {
            return Err(ConfigError::invalid("twitch.webhook_secret is required"));
        }

        if self.server.port == 0 {
            return Err(ConfigError::invalid("server.port must be between 1 and 65535"));
        }

        if self.server.tls.enabled && self.server.tls.domains.is_empty() {
            return Err(ConfigError::invalid(
                "server.tls.domains is required when TLS is enabled",
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::invalid("retry.max_attempts must be at least 1"));
        }
        if self.retry.backoff_factor <= 1.0 {
            return Err(ConfigError::invalid(
                "retry.backoff_factor must be greater than 1.0",
            ));
        }

        if self.global_webhook.enabled {
            let parsed = Url::parse(&self.global_webhook.url)
                .map_err(|e| ConfigError::invalid(format!("global_webhook.url: {e}")))?;
            if parsed.scheme() != "http" && parsed.scheme() != "https" {
                return Err(ConfigError::invalid(
                    "global_webhook.url must use http or https",
                ));
            }
        }

        for (key, streamer) in &self.streamers {
            if streamer.user_id.is_empty() && streamer.login.is_empty() {
                return Err(ConfigError::invalid(format!(
                    "streamers.{key} must set user_id or login"
                )));
            }
        }

        Ok(())
    }

    /// Create the directories that back on-disk state.
    fn ensure_data_dirs(&self) -> Result<(), ConfigError> {
        let mut dirs: Vec<PathBuf> = vec![
            self.server.tls.cert_dir.clone(),
            self.cache.image_cache_dir.clone(),
        ];
        for file in [
            &self.twitch.token_file,
            &self.retry.state_file,
            &self.cache.file_path,
            &self.output.file_path,
        ] {
            if let Some(parent) = file.parent() {
                if !parent.as_os_str().is_empty() {
                    dirs.push(parent.to_path_buf());
                }
            }
        }

        for dir in dirs {
            std::fs::create_dir_all(&dir)?;
        }
        Ok(())
    }

    /// Find the configured streamer matching a broadcaster, by exact
    /// `user_id` first, then by case-insensitive `login`.
    pub fn find_streamer(&self, user_id: &str, login: &str) -> Option<(&str, &StreamerConfig)> {
        self.streamers
            .iter()
            .find(|(_, s)| !s.user_id.is_empty() && s.user_id == user_id)
            .or_else(|| {
                self.streamers
                    .iter()
                    .find(|(_, s)| !s.login.is_empty() && s.login.eq_ignore_ascii_case(login))
            })
            .map(|(k, s)| (k.as_str(), s))
    }
}

/// Resolve the configuration file path: explicit flag value, then the
/// `STREAMBRIDGE_CONFIG` environment variable, then `config.toml` in the
/// working directory.
pub fn resolve_config_path(flag: Option<&Path>) -> PathBuf {
    if let Some(path) = flag {
        return path.to_path_buf();
    }
    if let Ok(env) = std::env::var(format!("{ENV_PREFIX}_CONFIG")) {
        if !env.is_empty() {
            return PathBuf::from(env);
        }
    }
    PathBuf::from("config.toml")
}
