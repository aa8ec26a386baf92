//! Payment gateway client used by the refund action.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Gateway refund statuses that count as an accepted refund.
pub const ACCEPTED_REFUND_STATUSES: &[&str] = &["processed", "pending"];

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway transport error: {0}")]
    Transport(String),

    #[error("gateway returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("gateway response could not be decoded: {0}")]
    Decode(String),

    #[error("invalid gateway configuration: {0}")]
    Config(String),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RefundRequest {
    /// Deterministic key; the gateway performs at most one refund per
    /// key.
    #[serde(skip)]
    pub idempotency_key: String,
    /// Amount in minor units; `None` refunds the full payment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RefundResponse {
    pub status: String,
    #[serde(alias = "id")]
    pub external_reference_id: String,
}

impl RefundResponse {
    pub fn is_accepted(&self) -> bool {
        ACCEPTED_REFUND_STATUSES.contains(&self.status.as_str())
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn refund(
        &self,
        payment_id: &str,
        request: &RefundRequest,
    ) -> Result<RefundResponse, GatewayError>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpGatewayConfig {
    /// API root, e.g. `https://api.gateway.example/v1`.
    pub base_url: String,
    pub key_id: String,
    pub key_secret: String,
}

/// REST payment gateway client (basic auth, idempotency key header).
#[derive(Debug, Clone)]
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    base_url: reqwest::Url,
    config: HttpGatewayConfig,
}

impl HttpPaymentGateway {
    pub fn new(config: HttpGatewayConfig, timeout: Duration) -> Result<Self, GatewayError> {
        let base_url = reqwest::Url::parse(&config.base_url)
            .map_err(|e| GatewayError::Config(format!("base_url '{}': {e}", config.base_url)))?;
        if base_url.cannot_be_a_base() {
            return Err(GatewayError::Config(format!(
                "base_url '{}' cannot carry a path",
                config.base_url
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url,
            config,
        })
    }

    /// `{base_url}/payments/{payment_id}/refund`, with the payment id
    /// percent-encoded as a single path segment.
    fn refund_url(&self, payment_id: &str) -> Result<reqwest::Url, GatewayError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| {
                GatewayError::Config(format!("base_url '{}' cannot carry a path", self.base_url))
            })?
            .pop_if_empty()
            .extend(["payments", payment_id, "refund"]);
        Ok(url)
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn refund(
        &self,
        payment_id: &str,
        request: &RefundRequest,
    ) -> Result<RefundResponse, GatewayError> {
        let response = self
            .client
            .post(self.refund_url(payment_id)?)
            .basic_auth(&self.config.key_id, Some(&self.config.key_secret))
            .header("Idempotency-Key", &request.idempotency_key)
            .json(request)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let refund: RefundResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))?;
        debug!(
            payment_id,
            refund_id = %refund.external_reference_id,
            status = %refund.status,
            "Gateway refund response"
        );
        Ok(refund)
    }
}
