//! Short-lived payment session tracking.
//!
//! A session mirrors the client-facing progress of one checkout
//! attempt. Sessions are advisory: the trade's `payment_status` is the
//! durable record, and a session can only report a payment as complete
//! after reconciling the bound trade. Sessions expire on a TTL; an
//! expired session means the client restarts the flow, it never loses
//! settled money.

use crate::engine::TradeLifecycle;
use crate::error::TradeError;
use chrono::{DateTime, Utc};
use ledger_store::{PaymentChannel, PaymentStatus, ProductInfo, TradeMetadata, UserId};
use serde::{Deserialize, Serialize};
use session_cache::SessionCache;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

const SESSION_KEY_PREFIX: &str = "payment_session:";

/// Client-facing progress of a checkout attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Session opened, nothing dispatched yet.
    Pending,
    /// Client is assembling the order.
    Processing,
    /// Payment authorized at the processor, awaiting capture.
    Authorized,
    /// Customer scanned the QR code.
    Scanned,
    /// Payment settled.
    Paid,
    /// Client abandoned the checkout.
    Canceled,
    /// Payment failed.
    Failed,
}

/// One in-flight checkout attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentSession {
    pub session_id: String,
    pub user_id: UserId,
    pub order_status: OrderStatus,
    pub payment_channel: Option<PaymentChannel>,
    /// Product tag ("credits", "membership", ...), mirrored from the
    /// bound trade's metadata.
    pub product_type: Option<String>,
    pub product_id: Option<u64>,
    /// Trade bound to this session, set once via
    /// [`SessionReconciler::bind_trade_no`].
    pub trade_no: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Manages payment sessions and reconciles them against trade state.
pub struct SessionReconciler {
    cache: SessionCache,
    engine: Arc<TradeLifecycle>,
    ttl: Duration,
}

impl SessionReconciler {
    pub fn new(cache: SessionCache, engine: Arc<TradeLifecycle>, ttl: Duration) -> Self {
        Self { cache, engine, ttl }
    }

    /// Open a fresh session for a user.
    #[instrument(skip(self))]
    pub async fn open(
        &self,
        user_id: UserId,
        payment_channel: Option<PaymentChannel>,
    ) -> Result<PaymentSession, TradeError> {
        let session = PaymentSession {
            session_id: uuid::Uuid::new_v4().to_string(),
            user_id,
            order_status: OrderStatus::Pending,
            payment_channel,
            product_type: None,
            product_id: None,
            trade_no: None,
            created_at: Utc::now(),
        };
        self.put(&session).await?;
        info!(session_id = %session.session_id, "Opened payment session");
        Ok(session)
    }

    /// Advance a session to a client-reported status. Each write
    /// refreshes the TTL, so an actively polled session stays alive.
    ///
    /// `Paid` and `Failed` are payment outcomes, not client reports:
    /// they are only ever written by [`Self::resolve`] mirroring the
    /// reconciled trade, so a client cannot mark its own session paid.
    ///
    /// A `Canceled` status also cancels the bound trade when it is
    /// still pending; a trade that settled in the meantime is left
    /// alone and the race is logged.
    #[instrument(skip(self))]
    pub async fn advance(
        &self,
        session_id: &str,
        status: OrderStatus,
    ) -> Result<PaymentSession, TradeError> {
        if matches!(status, OrderStatus::Paid | OrderStatus::Failed) {
            return Err(TradeError::InvalidState(format!(
                "status {status:?} is set by trade reconciliation, not by the client"
            )));
        }

        let mut session = self.load(session_id).await?;
        session.order_status = status;
        self.put(&session).await?;

        if status == OrderStatus::Canceled {
            if let Some(trade_no) = &session.trade_no {
                match self.engine.cancel_trade(trade_no).await {
                    Ok(()) => {}
                    Err(TradeError::InvalidState(_)) | Err(TradeError::NotFound(_)) => {
                        warn!(
                            session_id,
                            trade_no, "Session canceled but trade already left pending"
                        );
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        Ok(session)
    }

    /// Bind a trade to a session. The trade must exist, and a session
    /// binds at most one trade for its lifetime. The trade's channel
    /// and product details are mirrored into the session.
    #[instrument(skip(self))]
    pub async fn bind_trade_no(
        &self,
        session_id: &str,
        trade_no: &str,
    ) -> Result<PaymentSession, TradeError> {
        let trade = self.engine.trade(trade_no).await?;

        let mut session = self.load(session_id).await?;
        match &session.trade_no {
            Some(bound) if bound == trade_no => {}
            Some(bound) => {
                return Err(TradeError::DuplicateOperation(format!(
                    "session {session_id} is already bound to trade {bound}"
                )));
            }
            None => session.trade_no = Some(trade_no.to_string()),
        }
        session.payment_channel = Some(trade.payment_channel);
        if let Some(product) = trade.metadata.as_ref().and_then(TradeMetadata::product) {
            let (product_type, product_id) = match product {
                ProductInfo::Credits { product_id, .. } => ("credits", Some(*product_id)),
                ProductInfo::Membership { product_id } => ("membership", Some(*product_id)),
                ProductInfo::Template { product_id } => ("template", Some(*product_id)),
                ProductInfo::Batch { .. } => ("batch", None),
            };
            session.product_type = Some(product_type.to_string());
            session.product_id = product_id;
        }
        self.put(&session).await?;
        Ok(session)
    }

    /// Resolve a session's true status.
    ///
    /// An unbound session is returned as stored: with no trade there is
    /// no payment, so it can never resolve to `Paid`. A bound session
    /// reconciles its trade and mirrors the trade's status back into
    /// the session.
    #[instrument(skip(self))]
    pub async fn resolve(&self, session_id: &str) -> Result<PaymentSession, TradeError> {
        let mut session = self.load(session_id).await?;

        let Some(trade_no) = session.trade_no.clone() else {
            return Ok(session);
        };

        let trade = self.engine.reconcile(&trade_no).await?;
        let mirrored = match trade.payment_status {
            PaymentStatus::Success | PaymentStatus::Refunded => Some(OrderStatus::Paid),
            PaymentStatus::Failed => Some(OrderStatus::Failed),
            PaymentStatus::Pending => None,
        };
        if let Some(status) = mirrored {
            if session.order_status != status {
                session.order_status = status;
                self.put(&session).await?;
            }
        }

        Ok(session)
    }

    /// Drop a session. Missing sessions are fine; expiry may have won.
    pub async fn close(&self, session_id: &str) {
        self.cache.delete(&key(session_id)).await;
    }

    async fn load(&self, session_id: &str) -> Result<PaymentSession, TradeError> {
        self.cache
            .get::<PaymentSession>(&key(session_id))
            .await?
            .ok_or(TradeError::SessionExpired)
    }

    async fn put(&self, session: &PaymentSession) -> Result<(), TradeError> {
        self.cache
            .set(&key(&session.session_id), session, Some(self.ttl))
            .await?;
        Ok(())
    }
}

fn key(session_id: &str) -> String {
    format!("{SESSION_KEY_PREFIX}{session_id}")
}
