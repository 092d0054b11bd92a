//! Error types for note generation, provider calls and local persistence.

use thiserror::Error;

/// Normalized failure of a single vendor call.
///
/// Every vendor client maps its transport and status failures onto these five
/// kinds; nothing above the provider layer inspects vendor-specific errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Provider authentication failed: {0}")]
    Auth(String),

    #[error("Provider rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("Provider request timed out: {0}")]
    Timeout(String),

    #[error("Provider returned an invalid response: {0}")]
    InvalidResponse(String),

    #[error("Provider network error: {0}")]
    Network(String),
}

impl ProviderError {
    /// Stable identifier used in event payloads and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::Auth(_) => "auth_error",
            ProviderError::RateLimited(_) => "rate_limited",
            ProviderError::Timeout(_) => "timeout",
            ProviderError::InvalidResponse(_) => "invalid_response",
            ProviderError::Network(_) => "network_error",
        }
    }
}

/// Local persistence errors (images, history records, knowledge files)
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Crate-level error for stages, pipelines and configuration.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Outline parse error: {0}")]
    OutlineParse(String),

    #[error("Failed to parse {stage} output: {message}")]
    StageParse { stage: String, message: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<config::ConfigError> for ApiError {
    fn from(err: config::ConfigError) -> Self {
        ApiError::ConfigError(err.to_string())
    }
}
