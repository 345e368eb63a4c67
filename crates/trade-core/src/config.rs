//! Trade core configuration loaded from environment variables.

use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the trade lifecycle core.
#[derive(Debug, Clone, Deserialize)]
pub struct TradeConfig {
    /// Payment gateway configuration.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Referral commission rate in basis points (1500 = 15%).
    #[serde(default = "default_commission_rate_bps")]
    pub commission_rate_bps: u32,

    /// Credits granted per whole currency unit (10 credits per yuan).
    #[serde(default = "default_credits_per_unit")]
    pub credits_per_unit: u64,

    /// TTL for in-flight payment sessions.
    #[serde(default = "default_session_ttl", with = "humantime_serde")]
    pub session_ttl: Duration,

    /// Ledger snapshot path. In-memory only when unset.
    #[serde(default)]
    pub storage_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Processor API base URL.
    #[serde(default = "default_gateway_url")]
    pub base_url: String,

    /// Processor API key, also the notification signing key.
    #[serde(default = "default_api_key")]
    pub api_key: SecretString,

    /// Merchant application id at the processor.
    #[serde(default)]
    pub app_id: String,

    /// Where the processor posts asynchronous notifications.
    #[serde(default)]
    pub notify_url: String,

    /// Public-account app id for WeChat merchant-presented QR.
    #[serde(default)]
    pub wx_app_id: Option<String>,

    /// Request timeout. On timeout a trade stays PENDING and is
    /// resolved through reconcile, never by re-dispatching.
    #[serde(default = "default_gateway_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for TradeConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            commission_rate_bps: default_commission_rate_bps(),
            credits_per_unit: default_credits_per_unit(),
            session_ttl: default_session_ttl(),
            storage_path: None,
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: default_gateway_url(),
            api_key: default_api_key(),
            app_id: String::new(),
            notify_url: String::new(),
            wx_app_id: None,
            timeout: default_gateway_timeout(),
        }
    }
}

fn default_api_key() -> SecretString {
    SecretString::new(String::new())
}

fn default_commission_rate_bps() -> u32 {
    1500
}

fn default_credits_per_unit() -> u64 {
    10
}

fn default_session_ttl() -> Duration {
    Duration::from_secs(60)
}

fn default_gateway_url() -> String {
    "https://api.adapay.tech".into()
}

fn default_gateway_timeout() -> Duration {
    Duration::from_secs(10)
}

impl TradeConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(false),
            )
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }
}
