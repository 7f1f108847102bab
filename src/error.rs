use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("No credentials configured")]
    Empty,

    #[error("All credentials are rate limited: retry in {wait:?}")]
    Exhausted { wait: Duration },
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Rate limited: retry after {retry_after_secs:?} seconds")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("History unavailable for {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Credentials(#[from] CredentialError),

    #[error("Invalid architecture pattern {pattern:?}: {source}")]
    ArchPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Invalid setting {name}: {reason}")]
    InvalidSetting { name: &'static str, reason: String },

    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] FetchError),

    #[error("Failed to write report: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize report row: {0}")]
    Serialize(#[from] serde_json::Error),
}
