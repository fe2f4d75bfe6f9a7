//! PayPal REST payment adapter
//!
//! Charges use the v2 Orders API with immediate capture against a vaulted
//! payment source; the returned transaction id is the capture id, which is
//! what refunds are issued against. Every mutating call carries the
//! caller's idempotency key as `PayPal-Request-Id`.

use super::error::check_status;
use super::{http_client, AdapterError, PaymentAdapter};
use crate::error::{IntegrationError, Result};
use crate::types::{PaymentCharge, PaymentRefund};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

const LIVE_BASE_URL: &str = "https://api-m.paypal.com";
const SANDBOX_BASE_URL: &str = "https://api-m.sandbox.paypal.com";

/// Tokens are refreshed this long before PayPal says they expire
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Deserialize)]
pub struct PayPalConfig {
    pub client_id: String,
    /// Falls back to `PAYPAL_CLIENT_SECRET`
    #[serde(default)]
    pub client_secret: Option<SecretString>,
    #[serde(default)]
    pub sandbox: bool,
    /// Overrides the live/sandbox endpoint
    #[serde(default)]
    pub base_url: Option<String>,
}

struct CachedToken {
    token: SecretString,
    expires_at: Instant,
}

pub struct PayPalAdapter {
    client: reqwest::Client,
    base_url: String,
    client_id: String,
    client_secret: SecretString,
    token: Mutex<Option<CachedToken>>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    id: String,
    status: String,
    #[serde(default)]
    purchase_units: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct RefundResponse {
    id: String,
}

impl OrderResponse {
    fn capture_id(&self) -> Option<String> {
        self.purchase_units
            .first()?
            .pointer("/payments/captures/0/id")?
            .as_str()
            .map(str::to_string)
    }
}

impl PayPalAdapter {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: SecretString,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client_id: client_id.into(),
            client_secret,
            token: Mutex::new(None),
        })
    }

    pub fn from_config(config: &PayPalConfig, timeout: Duration) -> Result<Self> {
        let secret = config.client_secret.clone().ok_or_else(|| {
            IntegrationError::Config("paypal.client_secret is not set".to_string())
        })?;
        let base_url = config.base_url.clone().unwrap_or_else(|| {
            if config.sandbox {
                SANDBOX_BASE_URL.to_string()
            } else {
                LIVE_BASE_URL.to_string()
            }
        });
        Self::new(config.client_id.clone(), secret, base_url, timeout)
    }

    async fn request_token(&self) -> std::result::Result<CachedToken, AdapterError> {
        let response = self
            .client
            .post(format!("{}/v1/oauth2/token", self.base_url))
            .basic_auth(&self.client_id, Some(self.client_secret.expose_secret()))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;
        let response = check_status(response).await?;
        let token: TokenResponse = response.json().await?;

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);
        debug!(expires_in = token.expires_in, "Obtained PayPal access token");
        Ok(CachedToken {
            token: SecretString::new(token.access_token.into_boxed_str()),
            expires_at: Instant::now() + lifetime,
        })
    }

    /// Cached bearer token, fetching a new one when missing or stale
    async fn access_token(&self) -> std::result::Result<SecretString, AdapterError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.expires_at {
                return Ok(token.token.clone());
            }
        }
        let fresh = self.request_token().await?;
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }

    async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }

    /// POST with bearer auth and request id; drops the cached token on 401
    async fn post_json(
        &self,
        path: &str,
        request_id: &str,
        body: &Value,
    ) -> std::result::Result<reqwest::Response, AdapterError> {
        let token = self.access_token().await?;
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(token.expose_secret())
            .header("PayPal-Request-Id", request_id)
            .header("Prefer", "return=representation")
            .json(body)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            self.invalidate_token().await;
        }
        check_status(response).await
    }
}

#[async_trait]
impl PaymentAdapter for PayPalAdapter {
    fn provider(&self) -> &str {
        "paypal"
    }

    async fn charge(&self, charge: &PaymentCharge) -> std::result::Result<String, AdapterError> {
        let mut unit = json!({
            "amount": {
                "currency_code": charge.amount.currency.code(),
                "value": charge.amount.to_decimal_string(),
            }
        });
        if let Some(description) = &charge.description {
            unit["description"] = json!(description);
        }

        let mut body = json!({
            "intent": "CAPTURE",
            "purchase_units": [unit],
        });
        if let Some(vault_id) = &charge.customer_ref {
            body["payment_source"] = json!({ "paypal": { "vault_id": vault_id } });
        }

        let response = self
            .post_json("/v2/checkout/orders", &charge.idempotency_key, &body)
            .await?;
        let mut order: OrderResponse = response.json().await?;

        if order.status == "APPROVED" {
            let response = self
                .post_json(
                    &format!("/v2/checkout/orders/{}/capture", order.id),
                    &format!("{}-capture", charge.idempotency_key),
                    &json!({}),
                )
                .await?;
            order = response.json().await?;
        }

        if order.status != "COMPLETED" {
            return Err(AdapterError::Protocol(format!(
                "order {} ended in status {} without capture",
                order.id, order.status
            )));
        }

        order.capture_id().ok_or_else(|| {
            AdapterError::Protocol(format!("order {} completed without a capture id", order.id))
        })
    }

    async fn refund(&self, refund: &PaymentRefund) -> std::result::Result<String, AdapterError> {
        let body = match &refund.amount {
            Some(amount) => json!({
                "amount": {
                    "currency_code": amount.currency.code(),
                    "value": amount.to_decimal_string(),
                }
            }),
            None => json!({}),
        };

        let response = self
            .post_json(
                &format!("/v2/payments/captures/{}/refund", refund.transaction_id),
                &refund.idempotency_key,
                &body,
            )
            .await?;
        let refunded: RefundResponse = response.json().await?;
        Ok(refunded.id)
    }

    async fn ping(&self) -> std::result::Result<(), AdapterError> {
        let fresh = self.request_token().await?;
        *self.token.lock().await = Some(fresh);
        Ok(())
    }
}
