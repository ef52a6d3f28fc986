//! Provisioner error types.

use thiserror::Error;

/// Result type alias for provisioner operations.
pub type ProvisionerResult<T> = Result<T, ProvisionerError>;

/// Errors that can occur while querying the bare-metal provisioner.
#[derive(Debug, Error)]
pub enum ProvisionerError {
    #[error("invalid API key: expected consumer_key:token_key:token_secret")]
    InvalidApiKey,

    #[error("invalid provisioner URL: {0}")]
    InvalidUrl(String),

    #[error("connection to {address} failed: {reason}")]
    Connect { address: String, reason: String },

    #[error("request to {uri} returned status {status}")]
    Http { uri: String, status: u16 },

    #[error("request to {uri} timed out")]
    Timeout { uri: String },

    #[error("malformed response: {0}")]
    Decode(String),
}
