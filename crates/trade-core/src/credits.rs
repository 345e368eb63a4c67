//! Credit ledger adjuster and amount/credit conversion.

use crate::error::TradeError;
use ledger_store::{CreditRecordType, LedgerStore, Shortfall, UserId};
use std::sync::Arc;
use tracing::instrument;

/// Credits consumed when paying an amount with credits. Rounded up, so
/// partial cents always cost a full credit.
pub fn credits_for_amount(amount_cents: u64, credits_per_unit: u64) -> u64 {
    (amount_cents * credits_per_unit).div_ceil(100)
}

/// Credits returned when refunding a credit-channel payment. Whole
/// currency units only, matching the grant on the forward path.
pub fn refund_credits_for_amount(amount_cents: u64, credits_per_unit: u64) -> u64 {
    (amount_cents / 100) * credits_per_unit
}

/// Commission owed on a settled trade, in cents. Rounded to the
/// nearest cent.
pub fn commission_for_amount(amount_cents: u64, rate_bps: u32) -> u64 {
    (amount_cents * rate_bps as u64 + 5_000) / 10_000
}

/// Mutates a user's credit balance and appends the matching audit
/// record as one unit. Thin handle over the ledger's transactional
/// commit; exists so callers outside the engine get the same
/// balance-and-audit-together guarantee.
#[derive(Clone)]
pub struct CreditLedger {
    store: Arc<LedgerStore>,
}

impl CreditLedger {
    pub fn new(store: Arc<LedgerStore>) -> Self {
        Self { store }
    }

    /// Apply a signed credit delta. Debits exceeding the balance fail
    /// with `InsufficientBalance`; callers must have validated
    /// sufficiency for consume paths. Returns the new balance.
    #[instrument(skip(self, description))]
    pub async fn apply(
        &self,
        user_id: UserId,
        delta: i64,
        record_type: CreditRecordType,
        description: impl Into<String>,
    ) -> Result<u64, TradeError> {
        let description = description.into();
        let balance = self
            .store
            .commit(move |data| {
                data.apply_credits(user_id, delta, record_type, description, Shortfall::Fail)
            })
            .await?;
        Ok(balance)
    }

    /// Apply a debit that floors at zero instead of failing. Used only
    /// by refund compensation paths.
    #[instrument(skip(self, description))]
    pub async fn apply_floored(
        &self,
        user_id: UserId,
        delta: i64,
        record_type: CreditRecordType,
        description: impl Into<String>,
    ) -> Result<u64, TradeError> {
        let description = description.into();
        let balance = self
            .store
            .commit(move |data| {
                data.apply_credits(
                    user_id,
                    delta,
                    record_type,
                    description,
                    Shortfall::FloorAtZero,
                )
            })
            .await?;
        Ok(balance)
    }
}
