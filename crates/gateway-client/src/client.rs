//! Payment gateway trait and HTTP implementation.

use crate::error::GatewayError;
use crate::sign;
use crate::types::*;
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Abstract payment processor the trade lifecycle engine depends on.
///
/// `create_payment` is not idempotent at the processor; callers own the
/// one-call-per-order discipline.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create a payment intent for an order.
    async fn create_payment(&self, request: &ChargeRequest) -> Result<ChargeResponse, GatewayError>;

    /// Query the status of a previously created payment.
    async fn query_payment(&self, payment_id: &str) -> Result<QueryResponse, GatewayError>;

    /// Refund a settled payment.
    async fn refund(&self, request: &RefundRequest) -> Result<RefundResponse, GatewayError>;

    /// Verify the signature on an asynchronous notification payload.
    fn verify_signature(&self, payload: &Map<String, Value>, signature: &str) -> bool;
}

/// Error body the processor returns on non-2xx responses.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error_msg: Option<String>,
}

/// HTTP client for the payment processor.
///
/// The API key is stored as a `SecretString` to keep it out of logs
/// and debug output. All requests share one bounded timeout; on
/// timeout the processor side-effect may still have happened, so
/// callers resolve through a later status query.
#[derive(Clone)]
pub struct HttpGateway {
    client: Client,
    base_url: String,
    api_key: SecretString,
    app_id: String,
}

impl HttpGateway {
    /// Create a new gateway client.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        app_id: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key: SecretString::new(api_key.into()),
            app_id: app_id.into(),
        })
    }

    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: Response,
    ) -> Result<T, GatewayError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<T>().await?);
        }

        let message = match response.json::<ApiErrorBody>().await {
            Ok(body) => body
                .error_msg
                .unwrap_or_else(|| format!("HTTP {status}")),
            Err(_) => format!("HTTP {status}"),
        };

        if status == StatusCode::TOO_MANY_REQUESTS {
            warn!("Gateway rate limited: {}", message);
        }

        Err(GatewayError::Api(message))
    }
}

#[async_trait]
impl PaymentGateway for HttpGateway {
    #[instrument(skip(self, request), fields(order_no = %request.order_no, channel = %request.pay_channel))]
    async fn create_payment(&self, request: &ChargeRequest) -> Result<ChargeResponse, GatewayError> {
        debug!("Creating payment intent");

        let response = self
            .client
            .post(format!("{}/v1/payments", self.base_url))
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .header("X-App-Id", &self.app_id)
            .json(request)
            .send()
            .await?;

        self.handle_response(response).await
    }

    #[instrument(skip(self))]
    async fn query_payment(&self, payment_id: &str) -> Result<QueryResponse, GatewayError> {
        let response = self
            .client
            .get(format!("{}/v1/payments/{payment_id}", self.base_url))
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .header("X-App-Id", &self.app_id)
            .send()
            .await?;

        self.handle_response(response).await
    }

    #[instrument(skip(self, request), fields(payment_id = %request.payment_id))]
    async fn refund(&self, request: &RefundRequest) -> Result<RefundResponse, GatewayError> {
        let response = self
            .client
            .post(format!("{}/v1/refunds", self.base_url))
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .header("X-App-Id", &self.app_id)
            .json(request)
            .send()
            .await?;

        self.handle_response(response).await
    }

    fn verify_signature(&self, payload: &Map<String, Value>, signature: &str) -> bool {
        sign::verify_payload(payload, signature, self.api_key.expose_secret())
    }
}
