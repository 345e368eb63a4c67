//! Persistent entity store for the payment trade lifecycle.
//!
//! Holds trades, credit accounts with their append-only audit records,
//! credit recharge orders, activation codes, commission records and
//! invitation relations. All writes go through [`LedgerStore::commit`],
//! which serializes conflicting mutations and rolls back on error, so a
//! trade settlement and its credit effects are applied as one unit.

pub mod error;
pub mod store;
pub mod types;

pub use error::LedgerError;
pub use store::{LedgerData, LedgerStore, Shortfall};
pub use types::{
    ActivationCode, BatchItem, CardType, CommissionRecord, CommissionStatus, CreditAccount,
    CreditProduct, CreditRecord, CreditRecordType, CreditRechargeOrder, PaymentChannel,
    PaymentStatus, ProductInfo, Trade, TradeMetadata, TradeType, UserId,
};
