//! Wire types for the payment processor API.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Processor-reported status of a payment or refund.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayStatus {
    Succeeded,
    Pending,
    Failed,
}

/// Request to create a payment intent.
#[derive(Debug, Clone, Serialize)]
pub struct ChargeRequest {
    /// Merchant-side order number (the trade number).
    pub order_no: String,
    /// Processor channel identifier ("alipay_qr", "wx_pub", ...).
    pub pay_channel: String,
    /// Amount as a fixed two-decimal string ("12.34").
    pub pay_amount: String,
    pub goods_title: String,
    pub goods_description: String,
    /// Where the processor posts asynchronous notifications.
    pub notify_url: String,
    /// Channel-specific parameters (service identifier, open id, ...).
    pub expend: Map<String, Value>,
    /// Client-generated idempotency token, honored by processors that
    /// support it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

/// Response to a payment creation.
#[derive(Debug, Clone, Deserialize)]
pub struct ChargeResponse {
    pub status: GatewayStatus,
    /// Processor-assigned payment id.
    pub id: Option<String>,
    /// Processor-side order reference.
    pub party_order_id: Option<String>,
    /// Redirect/QR payload for the client.
    #[serde(default)]
    pub expend: Map<String, Value>,
    pub error_msg: Option<String>,
}

impl ChargeResponse {
    /// The channel redirect payload ("pay_info"), if present.
    pub fn pay_info(&self) -> Option<&str> {
        self.expend.get("pay_info").and_then(Value::as_str)
    }
}

/// Response to a payment status query.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryResponse {
    pub status: GatewayStatus,
    pub error_msg: Option<String>,
}

/// Request to refund a settled payment.
#[derive(Debug, Clone, Serialize)]
pub struct RefundRequest {
    /// Processor-assigned payment id of the original charge.
    pub payment_id: String,
    /// Merchant-side refund order number.
    pub refund_order_no: String,
    /// Refund amount as a fixed two-decimal string.
    pub refund_amount: String,
    pub reason: String,
}

/// Response to a refund request.
#[derive(Debug, Clone, Deserialize)]
pub struct RefundResponse {
    pub status: GatewayStatus,
    pub id: Option<String>,
    pub error_msg: Option<String>,
}
