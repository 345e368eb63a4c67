//! Error taxonomy for the trade lifecycle core.

use gateway_client::GatewayError;
use ledger_store::LedgerError;
use session_cache::CacheError;
use thiserror::Error;

/// Errors surfaced by the trade lifecycle engine and session reconciler.
///
/// Gateway and storage errors carry enough context for the caller to
/// retry safely. The trade's own `payment_status` is the durable record
/// of outcome: a caller seeing a transport failure mid-call must
/// re-query status rather than assume failure.
#[derive(Error, Debug)]
pub enum TradeError {
    /// Trade, session, user, product or activation code absent.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation attempted on an entity in the wrong status.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Credit debit exceeds balance where floor-at-zero does not apply.
    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: u64, available: u64 },

    /// The processor returned a failure; its message is passed through.
    #[error("Gateway error: {0}")]
    Gateway(String),

    /// Notification rejected; no state was mutated.
    #[error("Invalid notification signature")]
    SignatureInvalid,

    /// Payment session expired or was never opened; restart the flow.
    #[error("Payment session expired")]
    SessionExpired,

    /// Second gateway dispatch for the same trade, or another
    /// operation that must happen at most once.
    #[error("Duplicate operation: {0}")]
    DuplicateOperation(String),

    /// Underlying storage or serialization failure.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl TradeError {
    /// Stable machine-readable code for the outer result envelope.
    pub fn code(&self) -> &'static str {
        match self {
            TradeError::NotFound(_) => "not_found",
            TradeError::InvalidState(_) => "invalid_state",
            TradeError::InsufficientBalance { .. } => "insufficient_balance",
            TradeError::Gateway(_) => "gateway_error",
            TradeError::SignatureInvalid => "signature_invalid",
            TradeError::SessionExpired => "session_expired",
            TradeError::DuplicateOperation(_) => "duplicate_operation",
            TradeError::Storage(_) => "storage_error",
        }
    }
}

impl From<LedgerError> for TradeError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::NotFound(m) => TradeError::NotFound(m),
            LedgerError::InvalidState(m) => TradeError::InvalidState(m),
            LedgerError::InsufficientBalance {
                required,
                available,
            } => TradeError::InsufficientBalance {
                required,
                available,
            },
            LedgerError::DuplicateTradeNo(m) => {
                TradeError::DuplicateOperation(format!("trade number {m} already exists"))
            }
            LedgerError::Storage(m) => TradeError::Storage(m),
            LedgerError::Serialization(e) => TradeError::Storage(e.to_string()),
        }
    }
}

impl From<GatewayError> for TradeError {
    fn from(e: GatewayError) -> Self {
        TradeError::Gateway(e.to_string())
    }
}

impl From<CacheError> for TradeError {
    fn from(e: CacheError) -> Self {
        TradeError::Storage(e.to_string())
    }
}
