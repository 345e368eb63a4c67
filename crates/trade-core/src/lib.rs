//! Payment trade lifecycle core.
//!
//! Owns the trade state machine (PENDING → SUCCESS/FAILED, SUCCESS →
//! REFUNDED), gateway dispatch and reconciliation, refund compensation
//! for credits and activation codes, and short-lived payment sessions.
//!
//! The [`TradeLifecycle`] engine is the single writer of trade status:
//! notifications, polling reconciles and refunds all funnel through it,
//! and every status transition plus its credit side effects commits as
//! one unit against the [`ledger_store::LedgerStore`].

pub mod channel;
pub mod config;
pub mod credits;
pub mod engine;
pub mod error;
pub mod session;

pub use channel::{default_expend, gateway_service, PayerProfile};
pub use config::{GatewayConfig, TradeConfig};
pub use credits::{
    commission_for_amount, credits_for_amount, refund_credits_for_amount, CreditLedger,
};
pub use engine::{CreateTradeRequest, GatewayHandle, NotificationAck, TradeLifecycle};
pub use error::TradeError;
pub use session::{OrderStatus, PaymentSession, SessionReconciler};
