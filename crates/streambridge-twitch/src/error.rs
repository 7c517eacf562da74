//! Error type for Twitch API interactions.

pub type Result<T> = std::result::Result<T, TwitchError>;

#[derive(Debug, thiserror::Error)]
pub enum TwitchError {
    /// Transport-level failure (connect, TLS, timeout).
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Helix answered with a non-success status.
    #[error("API request failed with status {status}: {body}")]
    Api { status: u16, body: String },

    /// A lookup that should return exactly one row returned none.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Token file access failed.
    #[error("token storage error: {0}")]
    Io(#[from] std::io::Error),

    #[error("decode error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TwitchError {
    pub(crate) fn api(status: u16, body: impl Into<String>) -> Self {
        Self::Api {
            status,
            body: body.into(),
        }
    }
}
