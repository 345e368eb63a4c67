//! Channel-specific gateway request parameters.
//!
//! Each gateway channel maps to a processor "service" identifier and a
//! set of expend parameters. WeChat channels authenticate the payer
//! with an open id instead; the merchant-presented WeChat QR needs the
//! public-account app id.

use crate::config::TradeConfig;
use crate::error::TradeError;
use ledger_store::{PaymentChannel, UserId};
use serde_json::{Map, Value};

/// Payer details needed to build channel parameters.
#[derive(Debug, Clone, Default)]
pub struct PayerProfile {
    pub user_id: UserId,
    /// Mini-program open id.
    pub open_id: Option<String>,
    /// Public-account (official account) open id.
    pub public_open_id: Option<String>,
}

impl PayerProfile {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            ..Default::default()
        }
    }
}

/// Processor service identifier for a channel, if the channel is
/// addressed by service rather than open id.
pub fn gateway_service(channel: PaymentChannel) -> Option<&'static str> {
    use PaymentChannel::*;
    match channel {
        Alipay => Some("alipay.trade.app.pay"),
        AlipayQr | AlipayPub | AlipayScan => Some("alipay.trade.page.pay"),
        AlipayWap => Some("alipay.trade.wap.pay"),
        AlipayLite => Some("alipay.trade.create"),
        WxScan => Some("wxpay.unified.order"),
        Union | UnionQr | UnionWap | UnionScan | UnionOnline | UnionCheckout => {
            Some("unionpay.trade.page.pay")
        }
        FastPay => Some("fastpay.trade.page.pay"),
        B2c => Some("b2c.trade.page.pay"),
        B2b => Some("b2b.trade.page.pay"),
        CardKey => Some("cardkey.trade.page.pay"),
        WxQr | WxPub | WxLite | Activation | Credit => None,
    }
}

/// Build the default expend parameters for a channel.
///
/// Fails for the internal channels, which never reach the gateway, and
/// for WeChat channels when the payer has no suitable open id.
pub fn default_expend(
    channel: PaymentChannel,
    config: &TradeConfig,
    payer: &PayerProfile,
) -> Result<Map<String, Value>, TradeError> {
    let mut expend = Map::new();

    match channel {
        PaymentChannel::Credit | PaymentChannel::Activation => {
            return Err(TradeError::InvalidState(format!(
                "channel {channel} settles internally and cannot be dispatched"
            )));
        }
        PaymentChannel::WxQr => {
            let app_id = config.gateway.wx_app_id.clone().ok_or_else(|| {
                TradeError::InvalidState("wx_qr requires a configured WeChat app id".into())
            })?;
            expend.insert("wx_app_id".into(), Value::String(app_id));
        }
        PaymentChannel::WxPub => {
            let open_id = payer.public_open_id.clone().ok_or_else(|| {
                TradeError::InvalidState(format!(
                    "wx_pub requires a public-account open id for user {}",
                    payer.user_id
                ))
            })?;
            expend.insert("open_id".into(), Value::String(open_id));
        }
        PaymentChannel::WxLite => {
            let open_id = payer.open_id.clone().ok_or_else(|| {
                TradeError::InvalidState(format!(
                    "wx_lite requires a mini-program open id for user {}",
                    payer.user_id
                ))
            })?;
            expend.insert("open_id".into(), Value::String(open_id));
        }
        other => {
            // Service-addressed channels: service identifier + notify URL.
            if let Some(service) = gateway_service(other) {
                expend.insert("service".into(), Value::String(service.into()));
                expend.insert(
                    "notify_url".into(),
                    Value::String(config.gateway.notify_url.clone()),
                );
            }
        }
    }

    Ok(expend)
}
