//! Cache error types.

use thiserror::Error;

/// Errors that can occur in the session cache.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Value serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
