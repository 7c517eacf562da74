//! Configuration error types.

/// Errors produced while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Filesystem access failed (read, stat or directory creation).
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid TOML or does not match the schema.
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// The file parsed but violates a semantic invariant.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}
