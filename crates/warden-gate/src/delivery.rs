//! Out-of-band delivery of one-time codes.
//!
//! The provider is selected once at startup from [`DeliveryConfig`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),

    #[error("provider rejected the message: {0}")]
    Rejected(String),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Sends a code to a destination (phone number, address, ...).
#[async_trait]
pub trait DeliveryProvider: Send + Sync {
    /// Short provider name for logs.
    fn name(&self) -> &'static str;

    async fn send(&self, destination: &str, code: &str) -> Result<(), DeliveryError>;
}

/// Development provider: writes the code to the log instead of sending
/// it anywhere.
#[derive(Debug, Default, Clone)]
pub struct ConsoleDeliveryProvider;

#[async_trait]
impl DeliveryProvider for ConsoleDeliveryProvider {
    fn name(&self) -> &'static str {
        "console"
    }

    async fn send(&self, destination: &str, code: &str) -> Result<(), DeliveryError> {
        info!(destination, code, "One-time code (console delivery)");
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpSmsConfig {
    /// Endpoint that accepts `{ "to": ..., "message": ... }`.
    pub url: String,
    /// Bearer token for the SMS gateway.
    pub api_key: String,
    /// Sender identifier shown to the recipient.
    #[serde(default)]
    pub sender: Option<String>,
}

#[derive(Debug, Serialize)]
struct SmsMessage<'a> {
    to: &'a str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    from: Option<&'a str>,
}

fn sms_body(code: &str) -> String {
    format!("Your verification code is {code}. It expires in a few minutes.")
}

/// Sends codes through an HTTP SMS gateway.
#[derive(Debug, Clone)]
pub struct HttpSmsProvider {
    client: reqwest::Client,
    config: HttpSmsConfig,
}

impl HttpSmsProvider {
    pub fn new(config: HttpSmsConfig, timeout: Duration) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl DeliveryProvider for HttpSmsProvider {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn send(&self, destination: &str, code: &str) -> Result<(), DeliveryError> {
        let body = SmsMessage {
            to: destination,
            message: sms_body(code),
            from: self.config.sender.as_deref(),
        };

        let response = self
            .client
            .post(&self.config.url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(DeliveryError::Rejected(format!("{status}: {text}")));
        }

        debug!(destination, "SMS accepted by gateway");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryProviderKind {
    #[default]
    Console,
    Http,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    pub provider: DeliveryProviderKind,
    pub http: Option<HttpSmsConfig>,
}

/// Build the configured provider.
pub fn build_delivery_provider(
    config: &DeliveryConfig,
    timeout: Duration,
) -> Result<Arc<dyn DeliveryProvider>, DeliveryError> {
    match config.provider {
        DeliveryProviderKind::Console => Ok(Arc::new(ConsoleDeliveryProvider)),
        DeliveryProviderKind::Http => {
            let http = config.http.clone().ok_or_else(|| {
                DeliveryError::Transport("delivery.http section is required".into())
            })?;
            Ok(Arc::new(HttpSmsProvider::new(http, timeout)?))
        }
    }
}
