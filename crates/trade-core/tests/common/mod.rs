#![allow(dead_code)]

use async_trait::async_trait;
use gateway_client::{
    sign, ChargeRequest, ChargeResponse, GatewayError, GatewayStatus, PaymentGateway,
    QueryResponse, RefundRequest, RefundResponse,
};
use ledger_store::{
    LedgerStore, PaymentChannel, ProductInfo, TradeMetadata, TradeType, UserId,
};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use trade_core::{CreateTradeRequest, PayerProfile, TradeConfig, TradeLifecycle};

/// Scripted behavior for the fake gateway's create call.
#[derive(Debug, Clone)]
pub enum CreateBehavior {
    /// Return `succeeded` with a fresh payment id.
    Succeed,
    /// Return a `failed` status with this message.
    FailStatus(String),
    /// Return an API error with this message.
    Error(String),
}

/// In-process gateway double with scripted responses and call counters.
pub struct FakeGateway {
    api_key: String,
    pub create_behavior: Mutex<CreateBehavior>,
    pub create_delay: Mutex<Duration>,
    pub query_status: Mutex<GatewayStatus>,
    pub refund_status: Mutex<GatewayStatus>,
    pub create_calls: AtomicUsize,
    pub query_calls: AtomicUsize,
    pub refund_calls: AtomicUsize,
}

impl FakeGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            api_key: "test-key".into(),
            create_behavior: Mutex::new(CreateBehavior::Succeed),
            create_delay: Mutex::new(Duration::ZERO),
            query_status: Mutex::new(GatewayStatus::Pending),
            refund_status: Mutex::new(GatewayStatus::Succeeded),
            create_calls: AtomicUsize::new(0),
            query_calls: AtomicUsize::new(0),
            refund_calls: AtomicUsize::new(0),
        })
    }

    pub fn set_create(&self, behavior: CreateBehavior) {
        *self.create_behavior.lock().unwrap() = behavior;
    }

    pub fn set_create_delay(&self, delay: Duration) {
        *self.create_delay.lock().unwrap() = delay;
    }

    pub fn set_query(&self, status: GatewayStatus) {
        *self.query_status.lock().unwrap() = status;
    }

    pub fn set_refund(&self, status: GatewayStatus) {
        *self.refund_status.lock().unwrap() = status;
    }

    /// Build a notification payload signed with this gateway's key.
    pub fn signed_notification(&self, order_no: &str, status: &str) -> Map<String, Value> {
        let mut payload = Map::new();
        payload.insert("order_no".into(), Value::String(order_no.into()));
        payload.insert("status".into(), Value::String(status.into()));
        let signature = sign::sign_payload(&payload, &self.api_key);
        payload.insert("sign".into(), Value::String(signature));
        payload
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_payment(&self, _request: &ChargeRequest) -> Result<ChargeResponse, GatewayError> {
        let call = self.create_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = *self.create_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let behavior = self.create_behavior.lock().unwrap().clone();
        match behavior {
            CreateBehavior::Succeed => {
                let mut expend = Map::new();
                expend.insert("pay_info".into(), Value::String("weixin://pay/fake".into()));
                Ok(ChargeResponse {
                    status: GatewayStatus::Succeeded,
                    id: Some(format!("pay_{call}")),
                    party_order_id: Some(format!("P{call}")),
                    expend,
                    error_msg: None,
                })
            }
            CreateBehavior::FailStatus(msg) => Ok(ChargeResponse {
                status: GatewayStatus::Failed,
                id: None,
                party_order_id: None,
                expend: Map::new(),
                error_msg: Some(msg),
            }),
            CreateBehavior::Error(msg) => Err(GatewayError::Api(msg)),
        }
    }

    async fn query_payment(&self, _payment_id: &str) -> Result<QueryResponse, GatewayError> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        let status = *self.query_status.lock().unwrap();
        Ok(QueryResponse {
            status,
            error_msg: match status {
                GatewayStatus::Failed => Some("customer abandoned payment".into()),
                _ => None,
            },
        })
    }

    async fn refund(&self, _request: &RefundRequest) -> Result<RefundResponse, GatewayError> {
        self.refund_calls.fetch_add(1, Ordering::SeqCst);
        let status = *self.refund_status.lock().unwrap();
        Ok(RefundResponse {
            status,
            id: Some("ref_1".into()),
            error_msg: match status {
                GatewayStatus::Failed => Some("refund window closed".into()),
                _ => None,
            },
        })
    }

    fn verify_signature(&self, payload: &Map<String, Value>, signature: &str) -> bool {
        sign::verify_payload(payload, signature, &self.api_key)
    }
}

pub fn test_config() -> TradeConfig {
    let mut config = TradeConfig::default();
    config.gateway.notify_url = "https://example.com/notify".into();
    config.gateway.wx_app_id = Some("wx_test".into());
    config
}

pub fn setup() -> (Arc<LedgerStore>, Arc<FakeGateway>, Arc<TradeLifecycle>) {
    let store = LedgerStore::new();
    let gateway = FakeGateway::new();
    let engine = Arc::new(TradeLifecycle::new(
        store.clone(),
        gateway.clone(),
        test_config(),
    ));
    (store, gateway, engine)
}

pub fn payer(user_id: UserId) -> PayerProfile {
    PayerProfile::new(user_id)
}

/// A 10.00 recharge trade granting 100 credits for product 1.
pub fn credits_request(user_id: UserId, channel: PaymentChannel) -> CreateTradeRequest {
    CreateTradeRequest {
        user_id,
        amount_cents: 1000,
        trade_type: TradeType::Recharge,
        payment_channel: channel,
        title: "100 credit pack".into(),
        metadata: Some(TradeMetadata::Product(ProductInfo::Credits {
            product_id: 1,
            credits: 100,
        })),
    }
}

pub fn plain_request(user_id: UserId, channel: PaymentChannel) -> CreateTradeRequest {
    CreateTradeRequest {
        user_id,
        amount_cents: 1000,
        trade_type: TradeType::Consume,
        payment_channel: channel,
        title: "poster template".into(),
        metadata: None,
    }
}
