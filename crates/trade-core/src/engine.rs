//! Trade lifecycle engine.
//!
//! Orchestrates trade creation, gateway dispatch, reconciliation of
//! notifications and polling, and refund compensation. Every
//! check-then-mutate runs inside one ledger commit, so a racing
//! notification and a polling reconcile cannot both apply settlement
//! effects: the first commit wins and the loser observes a terminal
//! status.

use crate::channel::{self, PayerProfile};
use crate::config::TradeConfig;
use crate::credits::{commission_for_amount, credits_for_amount, refund_credits_for_amount};
use crate::error::TradeError;
use chrono::Utc;
use gateway_client::{
    ChargeRequest, GatewayError, GatewayStatus, HttpGateway, PaymentGateway, RefundRequest,
};
use ledger_store::{
    CardType, CommissionRecord, CommissionStatus, CreditRecordType, CreditRechargeOrder,
    LedgerError, LedgerStore, PaymentChannel, PaymentStatus, ProductInfo, Shortfall, Trade,
    TradeMetadata, TradeType, UserId,
};
use rand::Rng;
use secrecy::ExposeSecret;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, instrument, warn};

/// Attempts at generating a unique trade number before giving up.
const TRADE_NO_ATTEMPTS: usize = 5;

/// Parameters for creating a trade.
#[derive(Debug, Clone)]
pub struct CreateTradeRequest {
    pub user_id: UserId,
    pub amount_cents: u64,
    pub trade_type: TradeType,
    pub payment_channel: PaymentChannel,
    pub title: String,
    pub metadata: Option<TradeMetadata>,
}

/// Redirect/QR payload handed back to the client after dispatch.
#[derive(Debug, Clone)]
pub struct GatewayHandle {
    pub trade_no: String,
    pub payment_id: String,
    pub party_order_id: Option<String>,
    /// Channel redirect payload ("pay_info"), when the channel has one.
    pub pay_info: Option<String>,
    pub expend: Map<String, Value>,
}

/// Outcome of processing an asynchronous gateway notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationAck {
    /// Status transition applied.
    Applied,
    /// Redelivery for an already-settled trade; absorbed as success.
    Duplicate,
    /// Notification carried no actionable status.
    Ignored,
}

/// The trade lifecycle engine.
pub struct TradeLifecycle {
    store: Arc<LedgerStore>,
    gateway: Arc<dyn PaymentGateway>,
    config: TradeConfig,
    /// Trade numbers with a gateway dispatch in flight. Reserved before
    /// the create call is made, so the non-idempotent gateway create is
    /// invoked at most once per trade even under concurrent dispatch.
    dispatching: Mutex<HashSet<String>>,
}

/// Releases a trade's dispatch reservation when the dispatch attempt
/// ends, whichever way it ends.
struct DispatchSlot<'a> {
    engine: &'a TradeLifecycle,
    trade_no: String,
}

impl Drop for DispatchSlot<'_> {
    fn drop(&mut self) {
        let mut inflight = self
            .engine
            .dispatching
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        inflight.remove(&self.trade_no);
    }
}

impl TradeLifecycle {
    /// Create an engine with an injected gateway (used by tests and by
    /// deployments with a custom processor client).
    pub fn new(store: Arc<LedgerStore>, gateway: Arc<dyn PaymentGateway>, config: TradeConfig) -> Self {
        Self {
            store,
            gateway,
            config,
            dispatching: Mutex::new(HashSet::new()),
        }
    }

    /// Reserve the dispatch for a trade. At most one reservation per
    /// trade number exists at a time; the loser of a concurrent
    /// dispatch fails here without reaching the gateway.
    fn reserve_dispatch(&self, trade_no: &str) -> Result<DispatchSlot<'_>, TradeError> {
        let mut inflight = self.dispatching.lock().unwrap_or_else(PoisonError::into_inner);
        if !inflight.insert(trade_no.to_string()) {
            return Err(TradeError::DuplicateOperation(format!(
                "trade {trade_no} dispatch already in flight"
            )));
        }
        Ok(DispatchSlot {
            engine: self,
            trade_no: trade_no.to_string(),
        })
    }

    /// Create an engine with the HTTP gateway built from configuration.
    pub fn from_config(store: Arc<LedgerStore>, config: TradeConfig) -> Result<Self, TradeError> {
        let gateway = HttpGateway::new(
            config.gateway.base_url.clone(),
            config.gateway.api_key.expose_secret().clone(),
            config.gateway.app_id.clone(),
            config.gateway.timeout,
        )?;
        Ok(Self::new(store, Arc::new(gateway), config))
    }

    /// The underlying ledger store.
    pub fn store(&self) -> &Arc<LedgerStore> {
        &self.store
    }

    /// Fetch a trade by trade number.
    pub async fn trade(&self, trade_no: &str) -> Result<Trade, TradeError> {
        Ok(self.store.get_trade(trade_no).await?)
    }

    /// Create a new PENDING trade. The trade number is collision
    /// resistant (timestamp + payer + random suffix); generation is
    /// retried on the rare collision.
    #[instrument(skip(self, request), fields(user_id = request.user_id, channel = %request.payment_channel))]
    pub async fn create_trade(&self, request: CreateTradeRequest) -> Result<Trade, TradeError> {
        for _ in 0..TRADE_NO_ATTEMPTS {
            let trade_no = generate_trade_no("T", request.user_id);
            let trade = Trade::new(
                trade_no,
                request.user_id,
                request.amount_cents,
                request.trade_type,
                request.payment_channel,
                request.title.clone(),
                request.metadata.clone(),
            );

            let inserted = trade.clone();
            match self.store.commit(move |data| data.insert_trade(inserted)).await {
                Ok(()) => {
                    info!(trade_no = %trade.trade_no, "Created trade");
                    return Ok(trade);
                }
                Err(LedgerError::DuplicateTradeNo(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(TradeError::DuplicateOperation(
            "could not generate a unique trade number".into(),
        ))
    }

    /// Dispatch a PENDING trade to the payment gateway.
    ///
    /// Builds channel-specific parameters, creates the payment intent,
    /// and stores the gateway-assigned payment id exactly once. The
    /// gateway create call is not idempotent, so a second dispatch for
    /// the same trade is rejected with `DuplicateOperation`. On a
    /// gateway rejection the trade is marked FAILED with the gateway's
    /// message; on a transport timeout the trade stays PENDING and must
    /// be resolved through [`Self::reconcile`].
    #[instrument(skip(self, payer, expend_override))]
    pub async fn dispatch_to_gateway(
        &self,
        trade_no: &str,
        payer: &PayerProfile,
        expend_override: Option<Map<String, Value>>,
    ) -> Result<GatewayHandle, TradeError> {
        let trade = self.store.get_trade(trade_no).await?;

        if !trade.payment_channel.uses_gateway() {
            return Err(TradeError::InvalidState(format!(
                "channel {} settles internally",
                trade.payment_channel
            )));
        }
        if trade.payment_id.is_some() {
            return Err(TradeError::DuplicateOperation(format!(
                "trade {trade_no} was already dispatched"
            )));
        }
        if trade.payment_status != PaymentStatus::Pending {
            return Err(TradeError::InvalidState(format!(
                "trade {trade_no} is not pending"
            )));
        }

        // Held until this attempt ends; a concurrent dispatch fails
        // before its gateway call instead of duplicating ours.
        let _slot = self.reserve_dispatch(trade_no)?;

        let expend = match expend_override {
            Some(expend) => expend,
            None => channel::default_expend(trade.payment_channel, &self.config, payer)?,
        };

        let request = ChargeRequest {
            order_no: trade.trade_no.clone(),
            pay_channel: trade.payment_channel.to_string(),
            pay_amount: trade.amount_display(),
            goods_title: trade.title.clone(),
            goods_description: goods_description(&trade),
            notify_url: self.config.gateway.notify_url.clone(),
            expend,
            // Stable per trade, so a retried create after a transport
            // failure dedupes on processors that honor it.
            idempotency_key: Some(format!("dispatch-{}", trade.trade_no)),
        };

        let response = match self.gateway.create_payment(&request).await {
            Ok(response) => response,
            Err(e) => {
                if is_timeout(&e) {
                    // The intent may exist gateway-side; leave the trade
                    // PENDING and let reconcile resolve it.
                    warn!(trade_no, "Gateway dispatch timed out, trade stays pending");
                    return Err(e.into());
                }
                let reason = e.to_string();
                self.mark_failed(trade_no, reason.clone()).await?;
                return Err(TradeError::Gateway(reason));
            }
        };

        if response.status != GatewayStatus::Succeeded {
            let reason = response
                .error_msg
                .unwrap_or_else(|| "payment creation failed".into());
            self.mark_failed(trade_no, reason.clone()).await?;
            return Err(TradeError::Gateway(reason));
        }

        let pay_info = response.pay_info().map(String::from);
        let payment_id = response
            .id
            .ok_or_else(|| TradeError::Gateway("gateway response missing payment id".into()))?;

        // Set the payment id exactly once; a concurrent dispatch that
        // lost the race surfaces as DuplicateOperation.
        let stored_id = payment_id.clone();
        let result = self
            .store
            .commit(move |data| {
                let trade = data.trade_mut(trade_no)?;
                if trade.payment_id.is_some() {
                    return Err(LedgerError::InvalidState(format!(
                        "trade {} was already dispatched",
                        trade.trade_no
                    )));
                }
                trade.payment_id = Some(stored_id);
                Ok(())
            })
            .await;
        match result {
            Ok(()) => {}
            Err(LedgerError::InvalidState(m)) => return Err(TradeError::DuplicateOperation(m)),
            Err(e) => return Err(e.into()),
        }

        info!(trade_no, payment_id = %payment_id, "Dispatched trade to gateway");

        Ok(GatewayHandle {
            trade_no: trade.trade_no,
            payment_id,
            party_order_id: response.party_order_id,
            pay_info,
            expend: response.expend,
        })
    }

    /// Reconcile a trade against the gateway.
    ///
    /// Terminal trades are returned unchanged (idempotent no-op), which
    /// makes this safe to call concurrently from a notification handler
    /// and a polling client. A PENDING trade with a payment id is
    /// queried at the gateway; `succeeded` settles it and applies
    /// credit effects, `failed` marks it FAILED.
    #[instrument(skip(self))]
    pub async fn reconcile(&self, trade_no: &str) -> Result<Trade, TradeError> {
        let trade = self.store.get_trade(trade_no).await?;
        if trade.payment_status.is_terminal() {
            return Ok(trade);
        }
        let Some(payment_id) = trade.payment_id.clone() else {
            // Never dispatched; there is nothing to ask the gateway.
            return Ok(trade);
        };

        let result = self.gateway.query_payment(&payment_id).await?;
        match result.status {
            GatewayStatus::Succeeded => self.settle_success(trade_no).await,
            GatewayStatus::Failed => {
                let reason = result
                    .error_msg
                    .unwrap_or_else(|| "gateway reported failure".into());
                self.mark_failed(trade_no, reason).await
            }
            GatewayStatus::Pending => Ok(trade),
        }
    }

    /// Handle an asynchronous gateway notification.
    ///
    /// The signature is verified before anything else; an unverified
    /// payload never mutates state. Redeliveries for already-settled
    /// trades are absorbed as `Duplicate` (gateways retry
    /// notifications), not surfaced as errors.
    #[instrument(skip(self, payload))]
    pub async fn handle_notification(
        &self,
        payload: &Map<String, Value>,
    ) -> Result<NotificationAck, TradeError> {
        let signature = payload
            .get(gateway_client::sign::SIGNATURE_FIELD)
            .and_then(Value::as_str)
            .ok_or(TradeError::SignatureInvalid)?;
        if !self.gateway.verify_signature(payload, signature) {
            return Err(TradeError::SignatureInvalid);
        }

        let order_no = payload
            .get("order_no")
            .and_then(Value::as_str)
            .ok_or_else(|| TradeError::Gateway("notification missing order_no".into()))?;

        let trade = self.store.get_trade(order_no).await?;
        match trade.payment_status {
            PaymentStatus::Success => {
                info!(order_no, "Duplicate notification for settled trade");
                return Ok(NotificationAck::Duplicate);
            }
            PaymentStatus::Failed | PaymentStatus::Refunded => {
                return Ok(NotificationAck::Ignored);
            }
            PaymentStatus::Pending => {}
        }

        match payload.get("status").and_then(Value::as_str) {
            Some("succeeded") => {
                self.settle_success(order_no).await?;
                Ok(NotificationAck::Applied)
            }
            Some("failed") => {
                let reason = payload
                    .get("error_msg")
                    .and_then(Value::as_str)
                    .unwrap_or("gateway reported failure")
                    .to_string();
                self.mark_failed(order_no, reason).await?;
                Ok(NotificationAck::Applied)
            }
            _ => Ok(NotificationAck::Ignored),
        }
    }

    /// Refund a settled trade.
    ///
    /// Branches by channel: credit payments return the consumed
    /// credits; activation redemptions revert the code and claw back
    /// granted credits (floored at zero); everything else refunds at
    /// the gateway and then claws back credits granted by the linked
    /// recharge order. If the gateway refund fails the trade stays
    /// SUCCESS and no compensation is applied.
    #[instrument(skip(self, reason))]
    pub async fn refund(&self, trade_no: &str, reason: &str) -> Result<Trade, TradeError> {
        let trade = self.store.get_trade(trade_no).await?;
        if trade.payment_status != PaymentStatus::Success {
            return Err(TradeError::InvalidState(format!(
                "trade {trade_no} is not refundable (status {:?})",
                trade.payment_status
            )));
        }

        match trade.payment_channel {
            PaymentChannel::Credit => self.refund_credit_channel(trade_no).await,
            PaymentChannel::Activation => self.refund_activation_channel(trade_no).await,
            _ => self.refund_gateway_channel(&trade, reason).await,
        }
    }

    /// Pay a PENDING credit-channel trade from the user's balance.
    ///
    /// Debits `ceil(amount × credits_per_unit)` credits and settles the
    /// trade in the same commit; an insufficient balance leaves the
    /// trade PENDING and the balance untouched.
    #[instrument(skip(self))]
    pub async fn pay_with_credits(
        &self,
        trade_no: &str,
        user_id: UserId,
    ) -> Result<Trade, TradeError> {
        let per_unit = self.config.credits_per_unit;
        let trade = self
            .store
            .commit(move |data| {
                let trade = data.trade_mut(trade_no)?;
                if trade.user_id != user_id {
                    return Err(LedgerError::NotFound(format!(
                        "trade {trade_no} for user {user_id}"
                    )));
                }
                if trade.payment_channel != PaymentChannel::Credit {
                    return Err(LedgerError::InvalidState(format!(
                        "trade {trade_no} is not on the credit channel"
                    )));
                }
                if trade.payment_status != PaymentStatus::Pending {
                    return Err(LedgerError::InvalidState(format!(
                        "trade {trade_no} is not pending"
                    )));
                }
                trade.payment_status = PaymentStatus::Success;
                trade.paid_at = Some(Utc::now());
                let snapshot = trade.clone();

                let required = credits_for_amount(snapshot.amount_cents, per_unit);
                data.apply_credits(
                    user_id,
                    -(required as i64),
                    CreditRecordType::Consume,
                    format!("Credit payment for trade {}: {} credits", trade_no, required),
                    Shortfall::Fail,
                )?;
                Ok(snapshot)
            })
            .await?;
        Ok(trade)
    }

    /// Redeem an activation code for the calling user.
    ///
    /// Claims the code (exactly once), creates an already-settled
    /// ACTIVATION trade and, for credit cards, grants the product's
    /// credits with the matching audit record and recharge order, all
    /// in one commit.
    #[instrument(skip(self))]
    pub async fn redeem_activation_code(
        &self,
        code: &str,
        user_id: UserId,
    ) -> Result<Trade, TradeError> {
        for _ in 0..TRADE_NO_ATTEMPTS {
            let trade_no = generate_trade_no("ACT", user_id);
            let result = self
                .store
                .commit(|data| {
                    let entry = data
                        .activation_codes
                        .get(code)
                        .ok_or_else(|| LedgerError::NotFound(format!("activation code {code}")))?
                        .clone();
                    if entry.is_used {
                        return Err(LedgerError::InvalidState(format!(
                            "activation code {code} already used"
                        )));
                    }

                    let (amount_cents, metadata, credits, title) = match entry.card_type {
                        CardType::Credits => {
                            let product = data
                                .credit_products
                                .get(&entry.product_id)
                                .ok_or_else(|| {
                                    LedgerError::NotFound(format!(
                                        "credit product {}",
                                        entry.product_id
                                    ))
                                })?
                                .clone();
                            (
                                product.price_cents,
                                TradeMetadata::Product(ProductInfo::Credits {
                                    product_id: product.id,
                                    credits: product.credits,
                                }),
                                Some(product.credits),
                                format!("Activation code: {} credits", product.credits),
                            )
                        }
                        CardType::Membership => (
                            0,
                            TradeMetadata::Product(ProductInfo::Membership {
                                product_id: entry.product_id,
                            }),
                            None,
                            "Activation code: membership".to_string(),
                        ),
                    };

                    let mut trade = Trade::new(
                        trade_no.clone(),
                        user_id,
                        amount_cents,
                        TradeType::Activation,
                        PaymentChannel::Activation,
                        title,
                        Some(metadata),
                    );
                    trade.payment_status = PaymentStatus::Success;
                    trade.paid_at = Some(Utc::now());
                    let snapshot = trade.clone();
                    data.insert_trade(trade)?;

                    data.claim_activation_code(code, user_id, &trade_no)?;

                    if let Some(credits) = credits {
                        data.apply_credits(
                            user_id,
                            credits as i64,
                            CreditRecordType::Recharge,
                            format!("Activation code redemption: +{credits} credits"),
                            Shortfall::Fail,
                        )?;
                        let product_id = match snapshot.metadata.as_ref().and_then(TradeMetadata::product) {
                            Some(ProductInfo::Credits { product_id, .. }) => *product_id,
                            _ => 0,
                        };
                        data.recharge_orders.push(CreditRechargeOrder {
                            id: uuid::Uuid::new_v4().to_string(),
                            user_id,
                            product_id,
                            credits,
                            trade_no: trade_no.clone(),
                            created_at: Utc::now(),
                        });
                    }

                    Ok(snapshot)
                })
                .await;

            match result {
                Ok(trade) => {
                    info!(code, trade_no = %trade.trade_no, "Activation code redeemed");
                    return Ok(trade);
                }
                Err(LedgerError::DuplicateTradeNo(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(TradeError::DuplicateOperation(
            "could not generate a unique trade number".into(),
        ))
    }

    /// Delete a PENDING trade. Any other status is rejected.
    #[instrument(skip(self))]
    pub async fn cancel_trade(&self, trade_no: &str) -> Result<(), TradeError> {
        self.store
            .commit(|data| {
                let trade = data.trade(trade_no)?;
                if trade.payment_status != PaymentStatus::Pending {
                    return Err(LedgerError::InvalidState(format!(
                        "only pending trades can be canceled, {trade_no} is {:?}",
                        trade.payment_status
                    )));
                }
                data.trades.remove(trade_no);
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Settle a trade as SUCCESS and apply its credit effects.
    ///
    /// The compare-and-set, the credit grant with its audit record, the
    /// recharge order, and the commission insert are one commit; a
    /// caller that lost the settlement race gets the already-terminal
    /// trade back with no effects applied.
    async fn settle_success(&self, trade_no: &str) -> Result<Trade, TradeError> {
        let rate_bps = self.config.commission_rate_bps;
        let trade = self
            .store
            .commit(move |data| {
                let trade = data.trade_mut(trade_no)?;
                if trade.payment_status.is_terminal() {
                    return Ok(trade.clone());
                }
                trade.payment_status = PaymentStatus::Success;
                trade.paid_at = Some(Utc::now());
                let snapshot = trade.clone();

                if let Some(ProductInfo::Credits { product_id, credits }) = snapshot
                    .metadata
                    .as_ref()
                    .and_then(TradeMetadata::product)
                    .cloned()
                {
                    data.apply_credits(
                        snapshot.user_id,
                        credits as i64,
                        CreditRecordType::Recharge,
                        format!("Recharge: +{credits} credits"),
                        Shortfall::Fail,
                    )?;
                    data.recharge_orders.push(CreditRechargeOrder {
                        id: uuid::Uuid::new_v4().to_string(),
                        user_id: snapshot.user_id,
                        product_id,
                        credits,
                        trade_no: snapshot.trade_no.clone(),
                        created_at: Utc::now(),
                    });
                }

                if let Some(inviter) = data.inviter_of(snapshot.user_id) {
                    if !data.has_commission_for_trade(&snapshot.trade_no) {
                        let amount_cents = commission_for_amount(snapshot.amount_cents, rate_bps);
                        data.commission_records.push(CommissionRecord {
                            id: uuid::Uuid::new_v4().to_string(),
                            inviter,
                            invitee: snapshot.user_id,
                            trade_no: snapshot.trade_no.clone(),
                            status: CommissionStatus::Pending,
                            amount_cents,
                            description: format!(
                                "Referral commission for trade {} ({})",
                                snapshot.trade_no,
                                snapshot.amount_display()
                            ),
                            issue_time: Utc::now(),
                        });
                    }
                }

                Ok(snapshot)
            })
            .await?;

        info!(trade_no, "Trade settled");
        Ok(trade)
    }

    /// Mark a PENDING trade FAILED. Terminal trades are returned
    /// unchanged; a terminal status never regresses.
    async fn mark_failed(&self, trade_no: &str, reason: String) -> Result<Trade, TradeError> {
        let trade = self
            .store
            .commit(move |data| {
                let trade = data.trade_mut(trade_no)?;
                if trade.payment_status.is_terminal() {
                    return Ok(trade.clone());
                }
                trade.payment_status = PaymentStatus::Failed;
                trade.failure_reason = Some(reason);
                Ok(trade.clone())
            })
            .await?;
        Ok(trade)
    }

    async fn refund_credit_channel(&self, trade_no: &str) -> Result<Trade, TradeError> {
        let per_unit = self.config.credits_per_unit;
        let trade = self
            .store
            .commit(move |data| {
                let trade = data.trade_mut(trade_no)?;
                if trade.payment_status != PaymentStatus::Success {
                    return Err(LedgerError::InvalidState(format!(
                        "trade {trade_no} is not refundable"
                    )));
                }
                trade.payment_status = PaymentStatus::Refunded;
                let snapshot = trade.clone();

                let credits = refund_credits_for_amount(snapshot.amount_cents, per_unit);
                data.apply_credits(
                    snapshot.user_id,
                    credits as i64,
                    CreditRecordType::Refund,
                    format!("Refund of trade {trade_no}: +{credits} credits"),
                    Shortfall::Fail,
                )?;
                Ok(snapshot)
            })
            .await?;

        info!(trade_no, "Credit-channel trade refunded");
        Ok(trade)
    }

    async fn refund_activation_channel(&self, trade_no: &str) -> Result<Trade, TradeError> {
        let trade = self
            .store
            .commit(move |data| {
                let trade = data.trade_mut(trade_no)?;
                if trade.payment_status != PaymentStatus::Success {
                    return Err(LedgerError::InvalidState(format!(
                        "trade {trade_no} is not refundable"
                    )));
                }
                trade.payment_status = PaymentStatus::Refunded;
                let snapshot = trade.clone();

                data.release_activation_code(trade_no);

                // Credit-type redemptions claw the granted credits back,
                // floored at zero: the user may have spent them already.
                if let Some(credits) = snapshot.metadata.as_ref().and_then(TradeMetadata::credits) {
                    data.apply_credits(
                        snapshot.user_id,
                        -(credits as i64),
                        CreditRecordType::Refund,
                        format!("Activation refund: -{credits} credits"),
                        Shortfall::FloorAtZero,
                    )?;
                }
                Ok(snapshot)
            })
            .await?;

        info!(trade_no, "Activation redemption refunded");
        Ok(trade)
    }

    async fn refund_gateway_channel(
        &self,
        trade: &Trade,
        reason: &str,
    ) -> Result<Trade, TradeError> {
        let payment_id = trade.payment_id.clone().ok_or_else(|| {
            TradeError::InvalidState(format!("trade {} has no payment id", trade.trade_no))
        })?;

        let response = self
            .gateway
            .refund(&RefundRequest {
                payment_id,
                refund_order_no: format!("R{}", trade.trade_no),
                refund_amount: trade.amount_display(),
                reason: reason.to_string(),
            })
            .await?;

        if response.status != GatewayStatus::Succeeded {
            // No confirmed refund, no compensation: the trade stays
            // SUCCESS and the gateway's message is surfaced.
            return Err(TradeError::Gateway(
                response
                    .error_msg
                    .unwrap_or_else(|| "gateway refund failed".into()),
            ));
        }

        let trade_no = trade.trade_no.clone();
        let updated = self
            .store
            .commit(move |data| {
                let trade = data.trade_mut(&trade_no)?;
                if trade.payment_status != PaymentStatus::Success {
                    return Err(LedgerError::InvalidState(format!(
                        "trade {trade_no} is not refundable"
                    )));
                }
                trade.payment_status = PaymentStatus::Refunded;
                let snapshot = trade.clone();

                if matches!(
                    snapshot.metadata.as_ref().and_then(TradeMetadata::product),
                    Some(ProductInfo::Credits { .. })
                ) {
                    let order = data
                        .recharge_order_for_trade(&trade_no)
                        .cloned()
                        .ok_or_else(|| {
                            LedgerError::NotFound(format!(
                                "credit recharge order for trade {trade_no}"
                            ))
                        })?;
                    data.apply_credits(
                        snapshot.user_id,
                        -(order.credits as i64),
                        CreditRecordType::Refund,
                        format!("Refund of trade {trade_no}: -{} credits", order.credits),
                        Shortfall::FloorAtZero,
                    )?;
                }
                Ok(snapshot)
            })
            .await?;

        info!(trade_no = %updated.trade_no, "Gateway trade refunded");
        Ok(updated)
    }
}

/// Description line for the gateway: cart contents for batch trades,
/// the title otherwise.
fn goods_description(trade: &Trade) -> String {
    match trade.metadata.as_ref().and_then(TradeMetadata::product) {
        Some(ProductInfo::Batch { products }) => products
            .iter()
            .map(|item| format!("{} x {}", item.product_name, item.quantity))
            .collect::<Vec<_>>()
            .join(", "),
        _ => trade.title.clone(),
    }
}

fn generate_trade_no(prefix: &str, user_id: UserId) -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..10_000);
    format!("{prefix}{}{}{:04}", Utc::now().timestamp(), user_id, suffix)
}

fn is_timeout(e: &GatewayError) -> bool {
    matches!(e, GatewayError::Http(inner) if inner.is_timeout())
}
