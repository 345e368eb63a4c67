//! Transactional ledger store with JSON snapshot persistence.

use crate::error::LedgerError;
use crate::types::*;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

/// Data version for schema migrations.
const DATA_VERSION: u32 = 1;

/// Policy for credit debits that exceed the available balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shortfall {
    /// Reject with `InsufficientBalance`.
    Fail,
    /// Clamp the balance at zero and record the delta actually applied.
    /// Used by refund compensations.
    FloorAtZero,
}

/// The full ledger data set. Mutated only inside [`LedgerStore::commit`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerData {
    /// Schema version for migrations.
    pub version: u32,
    /// Trades by trade number.
    pub trades: HashMap<String, Trade>,
    /// Credit accounts by user.
    pub accounts: HashMap<UserId, CreditAccount>,
    /// Append-only credit audit log, in application order.
    pub credit_records: Vec<CreditRecord>,
    /// Credit purchase orders, linking trades to granted credits.
    pub recharge_orders: Vec<CreditRechargeOrder>,
    /// Activation codes by code.
    pub activation_codes: HashMap<String, ActivationCode>,
    /// Referral commissions.
    pub commission_records: Vec<CommissionRecord>,
    /// Invitation relations: invitee -> inviter.
    pub invitations: HashMap<UserId, UserId>,
    /// Credit product catalog.
    pub credit_products: HashMap<u64, CreditProduct>,
}

impl Default for LedgerData {
    fn default() -> Self {
        Self {
            version: DATA_VERSION,
            trades: HashMap::new(),
            accounts: HashMap::new(),
            credit_records: Vec::new(),
            recharge_orders: Vec::new(),
            activation_codes: HashMap::new(),
            commission_records: Vec::new(),
            invitations: HashMap::new(),
            credit_products: HashMap::new(),
        }
    }
}

impl LedgerData {
    /// Look up a trade by trade number.
    pub fn trade(&self, trade_no: &str) -> Result<&Trade, LedgerError> {
        self.trades
            .get(trade_no)
            .ok_or_else(|| LedgerError::NotFound(format!("trade {trade_no}")))
    }

    /// Mutable lookup of a trade by trade number.
    pub fn trade_mut(&mut self, trade_no: &str) -> Result<&mut Trade, LedgerError> {
        self.trades
            .get_mut(trade_no)
            .ok_or_else(|| LedgerError::NotFound(format!("trade {trade_no}")))
    }

    /// Insert a new trade. The trade number must be unique.
    pub fn insert_trade(&mut self, trade: Trade) -> Result<(), LedgerError> {
        if self.trades.contains_key(&trade.trade_no) {
            return Err(LedgerError::DuplicateTradeNo(trade.trade_no));
        }
        self.trades.insert(trade.trade_no.clone(), trade);
        Ok(())
    }

    /// Get or create the credit account for a user.
    pub fn account_mut(&mut self, user_id: UserId) -> &mut CreditAccount {
        self.accounts
            .entry(user_id)
            .or_insert_with(|| CreditAccount::new(user_id))
    }

    /// Apply a signed credit delta to a user's balance and append the
    /// matching audit record. The two writes happen together; callers
    /// running inside a `commit` get all-or-nothing semantics with any
    /// surrounding trade mutation.
    ///
    /// Returns the new balance.
    pub fn apply_credits(
        &mut self,
        user_id: UserId,
        delta: i64,
        record_type: CreditRecordType,
        description: impl Into<String>,
        shortfall: Shortfall,
    ) -> Result<u64, LedgerError> {
        let available = self.accounts.get(&user_id).map(|a| a.balance).unwrap_or(0);

        let applied = if delta < 0 {
            let requested = delta.unsigned_abs();
            if requested > available {
                match shortfall {
                    Shortfall::Fail => {
                        return Err(LedgerError::InsufficientBalance {
                            required: requested,
                            available,
                        })
                    }
                    // Clamp: debit whatever is left, down to zero.
                    Shortfall::FloorAtZero => -(available as i64),
                }
            } else {
                delta
            }
        } else {
            delta
        };

        let account = self.account_mut(user_id);
        let new_balance = if applied < 0 {
            account.total_consumed += applied.unsigned_abs();
            account.balance - applied.unsigned_abs()
        } else {
            account.total_recharged += applied as u64;
            account.balance + applied as u64
        };
        account.balance = new_balance;
        account.updated_at = Utc::now();

        self.credit_records.push(CreditRecord {
            id: uuid::Uuid::new_v4().to_string(),
            user_id,
            record_type,
            credits: applied,
            balance: new_balance,
            description: description.into(),
            created_at: Utc::now(),
        });

        Ok(new_balance)
    }

    /// Claim an activation code for a user and trade. Succeeds only if
    /// the code is still unused; the used flag and both back-references
    /// are set in one step.
    pub fn claim_activation_code(
        &mut self,
        code: &str,
        user_id: UserId,
        trade_no: &str,
    ) -> Result<ActivationCode, LedgerError> {
        let entry = self
            .activation_codes
            .get_mut(code)
            .ok_or_else(|| LedgerError::NotFound(format!("activation code {code}")))?;
        if entry.is_used {
            return Err(LedgerError::InvalidState(format!(
                "activation code {code} already used"
            )));
        }
        entry.is_used = true;
        entry.used_by = Some(user_id);
        entry.trade_no = Some(trade_no.to_string());
        Ok(entry.clone())
    }

    /// Revert the activation code linked to a trade back to unused.
    /// Returns the code if one was linked.
    pub fn release_activation_code(&mut self, trade_no: &str) -> Option<String> {
        let entry = self
            .activation_codes
            .values_mut()
            .find(|c| c.trade_no.as_deref() == Some(trade_no))?;
        entry.is_used = false;
        entry.used_by = None;
        entry.trade_no = None;
        Some(entry.code.clone())
    }

    /// The recharge order created when a trade settled, if any.
    pub fn recharge_order_for_trade(&self, trade_no: &str) -> Option<&CreditRechargeOrder> {
        self.recharge_orders.iter().find(|o| o.trade_no == trade_no)
    }

    /// The inviter of a user, if an invitation relation exists.
    pub fn inviter_of(&self, user_id: UserId) -> Option<UserId> {
        self.invitations.get(&user_id).copied()
    }

    /// Whether a commission was already created for a trade.
    pub fn has_commission_for_trade(&self, trade_no: &str) -> bool {
        self.commission_records.iter().any(|c| c.trade_no == trade_no)
    }
}

/// Ledger store: a single write-serialized data set with an optional
/// JSON snapshot on disk. The `commit` closure is the transactional
/// update primitive the lifecycle engine builds on.
pub struct LedgerStore {
    data: RwLock<LedgerData>,
    storage_path: Option<PathBuf>,
}

impl LedgerStore {
    /// Create an in-memory store.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            data: RwLock::new(LedgerData::default()),
            storage_path: None,
        })
    }

    /// Create a store backed by a JSON snapshot file, loading existing
    /// data if present.
    pub async fn with_storage(storage_path: PathBuf) -> Result<Arc<Self>, LedgerError> {
        let store = Arc::new(Self {
            data: RwLock::new(LedgerData::default()),
            storage_path: Some(storage_path),
        });
        store.load().await?;
        Ok(store)
    }

    /// Run a transactional mutation. The closure executes under the
    /// write lock; if it returns an error, every change it made is
    /// rolled back. On success the snapshot is persisted.
    ///
    /// All conflicting writes are serialized here, so a check-then-set
    /// inside one closure is a compare-and-set with respect to every
    /// other commit.
    pub async fn commit<T, F>(&self, f: F) -> Result<T, LedgerError>
    where
        F: FnOnce(&mut LedgerData) -> Result<T, LedgerError>,
    {
        let (out, snapshot) = {
            let mut data = self.data.write().await;
            let before = data.clone();
            match f(&mut data) {
                Ok(out) => {
                    let snapshot = if self.storage_path.is_some() {
                        Some(serde_json::to_vec(&*data)?)
                    } else {
                        None
                    };
                    (out, snapshot)
                }
                Err(e) => {
                    *data = before;
                    return Err(e);
                }
            }
        };

        // Persist outside the lock.
        if let Some(bytes) = snapshot {
            self.write_snapshot(&bytes).await?;
        }

        Ok(out)
    }

    /// Run a read-only closure against the data set.
    pub async fn read<T, F>(&self, f: F) -> T
    where
        F: FnOnce(&LedgerData) -> T,
    {
        let data = self.data.read().await;
        f(&data)
    }

    /// Fetch a trade by trade number.
    #[instrument(skip(self))]
    pub async fn get_trade(&self, trade_no: &str) -> Result<Trade, LedgerError> {
        self.read(|d| d.trade(trade_no).cloned()).await
    }

    /// Current credit balance for a user (zero if no account exists).
    pub async fn balance(&self, user_id: UserId) -> u64 {
        self.read(|d| d.accounts.get(&user_id).map(|a| a.balance).unwrap_or(0))
            .await
    }

    /// Credit audit records for a user, in application order.
    pub async fn credit_records(&self, user_id: UserId) -> Vec<CreditRecord> {
        self.read(|d| {
            d.credit_records
                .iter()
                .filter(|r| r.user_id == user_id)
                .cloned()
                .collect()
        })
        .await
    }

    /// Register an activation code.
    pub async fn insert_activation_code(&self, code: ActivationCode) -> Result<(), LedgerError> {
        self.commit(|d| {
            if d.activation_codes.contains_key(&code.code) {
                return Err(LedgerError::InvalidState(format!(
                    "activation code {} already exists",
                    code.code
                )));
            }
            d.activation_codes.insert(code.code.clone(), code);
            Ok(())
        })
        .await
    }

    /// Fetch an activation code.
    pub async fn get_activation_code(&self, code: &str) -> Result<ActivationCode, LedgerError> {
        self.read(|d| {
            d.activation_codes
                .get(code)
                .cloned()
                .ok_or_else(|| LedgerError::NotFound(format!("activation code {code}")))
        })
        .await
    }

    /// Register a credit product.
    pub async fn insert_credit_product(&self, product: CreditProduct) -> Result<(), LedgerError> {
        self.commit(|d| {
            d.credit_products.insert(product.id, product);
            Ok(())
        })
        .await
    }

    /// Record an invitation relation (invitee -> inviter).
    pub async fn set_invitation(&self, invitee: UserId, inviter: UserId) -> Result<(), LedgerError> {
        self.commit(|d| {
            d.invitations.insert(invitee, inviter);
            Ok(())
        })
        .await
    }

    /// Commissions earned by an inviter.
    pub async fn commissions_for(&self, inviter: UserId) -> Vec<CommissionRecord> {
        self.read(|d| {
            d.commission_records
                .iter()
                .filter(|c| c.inviter == inviter)
                .cloned()
                .collect()
        })
        .await
    }

    async fn write_snapshot(&self, bytes: &[u8]) -> Result<(), LedgerError> {
        let Some(path) = &self.storage_path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Atomic write: temp file then rename.
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, bytes).await?;
        fs::rename(&temp_path, path).await?;

        debug!("Saved ledger snapshot ({} bytes) to {:?}", bytes.len(), path);
        Ok(())
    }

    async fn load(&self) -> Result<(), LedgerError> {
        let Some(path) = &self.storage_path else {
            return Ok(());
        };
        if !path.exists() {
            info!("Ledger snapshot not found at {:?}, starting fresh", path);
            return Ok(());
        }

        let bytes = fs::read(path).await?;
        let data: LedgerData = serde_json::from_slice(&bytes)?;

        info!(
            "Loaded ledger snapshot: {} trades, {} accounts, {} credit records",
            data.trades.len(),
            data.accounts.len(),
            data.credit_records.len()
        );

        *self.data.write().await = data;
        Ok(())
    }
}
