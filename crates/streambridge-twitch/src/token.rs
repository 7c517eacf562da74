//! App access token persistence.
//!
//! The token file holds the client-credentials token across restarts so a
//! restart does not burn a token grant. It is written with mode 0600; the
//! access token is a credential.

use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Refresh this long before actual expiry.
pub const REFRESH_MARGIN_SECS: i64 = 300;

/// A Twitch app access token (client credentials grant).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppAccessToken {
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: u64,
    pub expires_at: DateTime<Utc>,
}

impl AppAccessToken {
    /// True while the token has more than the refresh margin left.
    pub fn is_fresh(&self) -> bool {
        Utc::now() + Duration::seconds(REFRESH_MARGIN_SECS) < self.expires_at
    }
}

/// Load a persisted token. A missing file is `Ok(None)`; a corrupt file is
/// treated the same after a warning, since a fresh grant always recovers.
pub fn load(path: &Path) -> Result<Option<AppAccessToken>> {
    if !path.exists() {
        return Ok(None);
    }

    let raw = std::fs::read_to_string(path)?;
    match serde_json::from_str(&raw) {
        Ok(token) => Ok(Some(token)),
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "discarding unreadable token file");
            Ok(None)
        }
    }
}

/// Persist the token with owner-only permissions.
pub fn save(path: &Path, token: &AppAccessToken) -> Result<()> {
    let data = serde_json::to_string_pretty(token)?;
    std::fs::write(path, data)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }

    Ok(())
}
