//! Helix API client with app-credential token lifecycle.
//!
//! Every call goes through [`HelixClient::ensure_valid_token`], which
//! refreshes lazily within five minutes of expiry. The token mutex is held
//! across the refresh request so only one refresh is ever in flight; all
//! other callers wait for it and reuse the result.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use tokio::sync::Mutex;

use streambridge_core::ConfigHandle;

use crate::error::{Result, TwitchError};
use crate::token::{self, AppAccessToken};
use crate::types::{ChannelInfo, EventSubSubscription, HelixUser, SubscriptionPage, STREAM_ONLINE};

const DEFAULT_HELIX_BASE: &str = "https://api.twitch.tv/helix";
const DEFAULT_TOKEN_URL: &str = "https://id.twitch.tv/oauth2/token";

/// Deadline for every outbound request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HelixClient {
    config: Arc<ConfigHandle>,
    http: reqwest::Client,
    token: Mutex<Option<AppAccessToken>>,
    helix_base: String,
    token_url: String,
}

#[derive(Deserialize)]
struct DataPage<T> {
    #[serde(default)]
    data: Vec<T>,
}

#[derive(Deserialize)]
struct FollowersPage {
    #[serde(default)]
    total: u64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: String,
    expires_in: u64,
}

impl HelixClient {
    pub fn new(config: Arc<ConfigHandle>) -> Self {
        Self::with_base_urls(config, DEFAULT_HELIX_BASE, DEFAULT_TOKEN_URL)
    }

    /// Construct against alternative endpoints. Used by tests to point the
    /// client at a local mock server.
    pub fn with_base_urls(
        config: Arc<ConfigHandle>,
        helix_base: impl Into<String>,
        token_url: impl Into<String>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();

        Self {
            config,
            http,
            token: Mutex::new(None),
            helix_base: helix_base.into(),
            token_url: token_url.into(),
        }
    }

    /// Load any persisted token and make sure a valid one is available.
    pub async fn start(&self) -> Result<()> {
        let token_file = self.config.load().twitch.token_file.clone();
        if let Some(persisted) = token::load(&token_file)? {
            tracing::debug!(expires_at = %persisted.expires_at, "loaded persisted app token");
            *self.token.lock().await = Some(persisted);
        }

        self.ensure_valid_token().await?;
        tracing::info!("Twitch API client started");
        Ok(())
    }

    /// Return a valid access token, refreshing and persisting if needed.
    /// The sole token refresh path; the lock makes refreshes single-flight.
    pub async fn ensure_valid_token(&self) -> Result<String> {
        let mut guard = self.token.lock().await;

        if let Some(token) = guard.as_ref() {
            if token.is_fresh() {
                return Ok(token.access_token.clone());
            }
        }

        let config = self.config.load();
        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("client_id", config.twitch.client_id.as_str()),
                ("client_secret", config.twitch.client_secret.as_str()),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TwitchError::api(status.as_u16(), body));
        }

        let grant: TokenResponse = response.json().await?;
        let token = AppAccessToken {
            access_token: grant.access_token,
            token_type: grant.token_type,
            expires_in: grant.expires_in,
            expires_at: Utc::now() + chrono::Duration::seconds(grant.expires_in as i64),
        };

        if let Err(err) = token::save(&config.twitch.token_file, &token) {
            tracing::warn!(error = %err, "failed to persist app token");
        }
        tracing::info!(expires_at = %token.expires_at, "obtained new Twitch access token");

        let access = token.access_token.clone();
        *guard = Some(token);
        Ok(access)
    }

    async fn get_authed(&self, url: &str) -> Result<reqwest::Response> {
        let access = self.ensure_valid_token().await?;
        let client_id = self.config.load().twitch.client_id.clone();

        let response = self
            .http
            .get(url)
            .bearer_auth(access)
            .header("Client-Id", client_id)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TwitchError::api(status.as_u16(), body));
        }
        Ok(response)
    }

    pub async fn get_user_by_id(&self, user_id: &str) -> Result<HelixUser> {
        let url = format!("{}/users?id={user_id}", self.helix_base);
        let page: DataPage<HelixUser> = self.get_authed(&url).await?.json().await?;
        page.data.into_iter().next().ok_or(TwitchError::NotFound("user"))
    }

    pub async fn get_user_by_login(&self, login: &str) -> Result<HelixUser> {
        let url = format!("{}/users?login={login}", self.helix_base);
        let page: DataPage<HelixUser> = self.get_authed(&url).await?.json().await?;
        page.data.into_iter().next().ok_or(TwitchError::NotFound("user"))
    }

    /// Narrow resolver used at startup to fill in missing `user_id`s.
    pub async fn resolve_login_to_id(&self, login: &str) -> Result<String> {
        Ok(self.get_user_by_login(login).await?.id)
    }

    pub async fn get_channel_info(&self, broadcaster_id: &str) -> Result<ChannelInfo> {
        let url = format!("{}/channels?broadcaster_id={broadcaster_id}", self.helix_base);
        let page: DataPage<ChannelInfo> = self.get_authed(&url).await?.json().await?;
        page.data
            .into_iter()
            .next()
            .ok_or(TwitchError::NotFound("channel"))
    }

    pub async fn get_follower_count(&self, broadcaster_id: &str) -> Result<u64> {
        let url = format!(
            "{}/channels/followers?broadcaster_id={broadcaster_id}&first=1",
            self.helix_base
        );
        let page: FollowersPage = self.get_authed(&url).await?.json().await?;
        Ok(page.total)
    }

    pub async fn list_subscriptions(&self) -> Result<SubscriptionPage> {
        let url = format!("{}/eventsub/subscriptions", self.helix_base);
        Ok(self.get_authed(&url).await?.json().await?)
    }

    /// Create a `stream.online` webhook subscription. Helix answers 202 on
    /// acceptance; anything else is an error.
    pub async fn create_subscription(
        &self,
        broadcaster_user_id: &str,
        callback: &str,
        secret: &str,
    ) -> Result<EventSubSubscription> {
        let access = self.ensure_valid_token().await?;
        let client_id = self.config.load().twitch.client_id.clone();

        let body = serde_json::json!({
            "type": STREAM_ONLINE,
            "version": "1",
            "condition": { "broadcaster_user_id": broadcaster_user_id },
            "transport": {
                "method": "webhook",
                "callback": callback,
                "secret": secret,
            },
        });

        let response = self
            .http
            .post(format!("{}/eventsub/subscriptions", self.helix_base))
            .bearer_auth(access)
            .header("Client-Id", client_id)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() != 202 {
            let body = response.text().await.unwrap_or_default();
            return Err(TwitchError::api(status.as_u16(), body));
        }

        let page: DataPage<EventSubSubscription> = response.json().await?;
        page.data
            .into_iter()
            .next()
            .ok_or(TwitchError::NotFound("subscription"))
    }

    pub async fn delete_subscription(&self, id: &str) -> Result<()> {
        let access = self.ensure_valid_token().await?;
        let client_id = self.config.load().twitch.client_id.clone();

        let response = self
            .http
            .delete(format!("{}/eventsub/subscriptions", self.helix_base))
            .query(&[("id", id)])
            .bearer_auth(access)
            .header("Client-Id", client_id)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TwitchError::api(status.as_u16(), body));
        }
        Ok(())
    }
}
