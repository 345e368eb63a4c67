//! Core entity types for the trade ledger.
//!
//! Money is fixed-point with two decimal places, stored as `u64` minor
//! units (cents). Credit deltas are signed; balances are unsigned.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a user.
pub type UserId = u64;

/// Payment channels accepted by the processor, plus the two internal
/// channels (`Credit`, `Activation`) that never reach the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentChannel {
    /// Alipay in-app payment.
    Alipay,
    /// Alipay merchant-presented QR.
    AlipayQr,
    /// Alipay H5 payment.
    AlipayWap,
    /// Alipay mini-program payment.
    AlipayLite,
    /// Alipay lifestyle-account payment.
    AlipayPub,
    /// Alipay customer-presented QR.
    AlipayScan,
    /// WeChat merchant-presented QR.
    WxQr,
    /// WeChat public-account payment.
    WxPub,
    /// WeChat mini-program payment.
    WxLite,
    /// WeChat customer-presented QR.
    WxScan,
    /// UnionPay in-app payment.
    Union,
    /// UnionPay merchant-presented QR.
    UnionQr,
    /// UnionPay H5 payment.
    UnionWap,
    /// UnionPay customer-presented QR.
    UnionScan,
    /// UnionPay online H5 payment.
    UnionOnline,
    /// UnionPay unified checkout.
    UnionCheckout,
    /// Bank quick-pay.
    FastPay,
    /// Personal online banking.
    B2c,
    /// Corporate online banking.
    B2b,
    /// Card-key activation.
    CardKey,
    /// Activation code redemption (internal, no gateway).
    Activation,
    /// Credit balance payment (internal, no gateway).
    Credit,
}

impl PaymentChannel {
    /// Whether payments on this channel are settled through the
    /// external gateway. `Credit` and `Activation` settle internally.
    pub fn uses_gateway(&self) -> bool {
        !matches!(self, PaymentChannel::Credit | PaymentChannel::Activation)
    }
}

impl std::fmt::Display for PaymentChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_default();
        write!(f, "{s}")
    }
}

/// Trade payment status. Transitions form a DAG: `Pending` may move to
/// `Success` or `Failed`; `Success` may move only to `Refunded`.
/// `Failed` and `Refunded` are terminal; a failed payment is retried
/// with a fresh trade, never by resetting this field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Success,
    Failed,
    Refunded,
}

impl PaymentStatus {
    /// Terminal statuses absorb further reconcile attempts.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }
}

/// Business classification of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeType {
    Recharge,
    Consume,
    Refund,
    Activation,
    ActivationRefund,
    Commission,
}

/// One line item in a cart-style batch purchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchItem {
    pub product_id: u64,
    pub product_name: String,
    pub quantity: u32,
    /// Unit price in cents.
    pub price_cents: u64,
}

/// Product payload of a trade, tagged by product type so downstream
/// reconciliation can pattern-match instead of probing a raw map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "product_type", rename_all = "snake_case")]
pub enum ProductInfo {
    /// Credit pack purchase or credit-type activation redemption.
    Credits { product_id: u64, credits: u64 },
    /// Membership plan purchase.
    Membership { product_id: u64 },
    /// Digital goods purchase.
    Template { product_id: u64 },
    /// Cart checkout of multiple items.
    Batch { products: Vec<BatchItem> },
}

/// Trade metadata: a recognized product payload, or an opaque mapping
/// for trades the core does not interpret.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TradeMetadata {
    Product(ProductInfo),
    Extra(serde_json::Map<String, serde_json::Value>),
}

impl TradeMetadata {
    /// The recognized product payload, if any.
    pub fn product(&self) -> Option<&ProductInfo> {
        match self {
            TradeMetadata::Product(p) => Some(p),
            TradeMetadata::Extra(_) => None,
        }
    }

    /// Credits attached to a creditable product, if any.
    pub fn credits(&self) -> Option<u64> {
        match self.product() {
            Some(ProductInfo::Credits { credits, .. }) => Some(*credits),
            _ => None,
        }
    }
}

/// A single payment/consumption transaction record, the unit of
/// settlement. Owned exclusively by the trade lifecycle engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    /// Unique trade number, generated by the engine.
    pub trade_no: String,
    /// Paying user.
    pub user_id: UserId,
    /// Amount in cents.
    pub amount_cents: u64,
    pub trade_type: TradeType,
    pub payment_channel: PaymentChannel,
    pub payment_status: PaymentStatus,
    /// Gateway-assigned payment id. Set exactly once on dispatch.
    pub payment_id: Option<String>,
    pub title: String,
    pub metadata: Option<TradeMetadata>,
    /// Gateway failure reason, set when the status moves to `Failed`.
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Set exactly once, on the first transition to `Success`.
    pub paid_at: Option<DateTime<Utc>>,
}

impl Trade {
    /// Create a new pending trade.
    pub fn new(
        trade_no: impl Into<String>,
        user_id: UserId,
        amount_cents: u64,
        trade_type: TradeType,
        payment_channel: PaymentChannel,
        title: impl Into<String>,
        metadata: Option<TradeMetadata>,
    ) -> Self {
        Self {
            trade_no: trade_no.into(),
            user_id,
            amount_cents,
            trade_type,
            payment_channel,
            payment_status: PaymentStatus::Pending,
            payment_id: None,
            title: title.into(),
            metadata,
            failure_reason: None,
            created_at: Utc::now(),
            paid_at: None,
        }
    }

    /// Format the amount as a fixed two-decimal string ("12.34").
    pub fn amount_display(&self) -> String {
        format!("{}.{:02}", self.amount_cents / 100, self.amount_cents % 100)
    }
}

/// Credit balance for a user, with lifetime counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditAccount {
    pub user_id: UserId,
    /// Current balance. Never negative.
    pub balance: u64,
    /// Total lifetime credits granted.
    pub total_recharged: u64,
    /// Total lifetime credits consumed.
    pub total_consumed: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CreditAccount {
    /// Create a new empty account for a user.
    pub fn new(user_id: UserId) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            balance: 0,
            total_recharged: 0,
            total_consumed: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Classification of a credit audit record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditRecordType {
    Recharge,
    Consume,
    Reward,
    Expired,
    Refund,
}

/// Append-only credit audit entry. Never mutated or deleted; per-user
/// insertion order matches the order balance changes were applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditRecord {
    pub id: String,
    pub user_id: UserId,
    pub record_type: CreditRecordType,
    /// Signed delta actually applied to the balance.
    pub credits: i64,
    /// Balance snapshot after applying the delta.
    pub balance: u64,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// A purchasable credit pack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditProduct {
    pub id: u64,
    pub name: String,
    /// Credits granted on purchase or redemption.
    pub credits: u64,
    /// Price in cents.
    pub price_cents: u64,
}

/// Links a creditable purchase to the trade that paid for it. The
/// granted credit amount is recorded here so a later gateway refund
/// knows how much to claw back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditRechargeOrder {
    pub id: String,
    pub user_id: UserId,
    pub product_id: u64,
    /// Credits granted by this order.
    pub credits: u64,
    pub trade_no: String,
    pub created_at: DateTime<Utc>,
}

/// What an activation code redeems into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardType {
    Membership,
    Credits,
}

/// Single-use redemption token. `is_used`, `used_by` and `trade_no`
/// move together: set atomically on claim, cleared together on refund.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivationCode {
    pub code: String,
    pub card_type: CardType,
    pub product_id: u64,
    pub is_used: bool,
    pub used_by: Option<UserId>,
    pub trade_no: Option<String>,
    pub remark: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ActivationCode {
    /// Create a fresh unused code.
    pub fn new(code: impl Into<String>, card_type: CardType, product_id: u64) -> Self {
        Self {
            code: code.into(),
            card_type,
            product_id,
            is_used: false,
            used_by: None,
            trade_no: None,
            remark: None,
            created_at: Utc::now(),
        }
    }
}

/// Settlement state of a referral commission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommissionStatus {
    Pending,
    Settled,
    Canceled,
}

/// Referral reward created when an invitee's recharge settles.
/// At most one per originating trade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommissionRecord {
    pub id: String,
    pub inviter: UserId,
    pub invitee: UserId,
    /// The trade this commission derives from.
    pub trade_no: String,
    pub status: CommissionStatus,
    /// Commission amount in cents.
    pub amount_cents: u64,
    pub description: String,
    pub issue_time: DateTime<Utc>,
}
