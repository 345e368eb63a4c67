//! Ledger error types.

use thiserror::Error;

/// Errors that can occur in the ledger store.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Entity not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Entity is in the wrong state for the requested mutation.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Credit debit exceeds the available balance.
    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: u64, available: u64 },

    /// A trade with this trade number already exists.
    #[error("Duplicate trade number: {0}")]
    DuplicateTradeNo(String),

    /// Storage I/O error.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<std::io::Error> for LedgerError {
    fn from(e: std::io::Error) -> Self {
        LedgerError::Storage(e.to_string())
    }
}
