use std::io;

use crate::run::StageName;

/// Custom error type for push_deploy operations
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("TOML parsing error: {0}")]
    TomlParseError(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("{stage} could not start: {source}")]
    StageSpawnFailed {
        stage: StageName,
        #[source]
        source: io::Error,
    },

    #[error("{stage} timed out after {limit_secs} seconds")]
    StageTimedOut { stage: StageName, limit_secs: u64 },

    #[error("Status API request failed: {0}")]
    StatusTransport(#[from] reqwest::Error),

    #[error("Status API rejected update with HTTP {0}")]
    StatusRejected(u16),

    #[error("Webhook validation failed: {0}")]
    WebhookValidationFailed(String),
}

/// Helper type for Results that use DeployError
pub type Result<T> = std::result::Result<T, DeployError>;
