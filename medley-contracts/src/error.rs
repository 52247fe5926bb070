use thiserror::Error;

/// Errors surfaced by provider adapters.
///
/// The applier treats every variant as transient for the current chunk and
/// retries; classification only matters for logging and health reporting.
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("rate limited")]
    RateLimited,

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("feature not supported: {0}")]
    Unsupported(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("provider error: {0}")]
    Provider(String),
}

pub type AdapterResult<T> = std::result::Result<T, AdapterError>;
