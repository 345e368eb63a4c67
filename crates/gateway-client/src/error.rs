//! Gateway error types.

use thiserror::Error;

/// Errors that can occur talking to the payment processor.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Transport-level failure, including timeouts. The processor
    /// side-effect may still have happened; callers must re-query
    /// rather than assume failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The processor returned a failure or malformed response.
    /// The processor's message is passed through.
    #[error("Gateway rejected request: {0}")]
    Api(String),

    /// Response body could not be decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
