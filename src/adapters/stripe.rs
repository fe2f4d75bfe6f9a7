//! Stripe payment adapter (PaymentIntents)

use super::error::check_status;
use super::{http_client, AdapterError, PaymentAdapter};
use crate::error::{IntegrationError, Result};
use crate::types::{PaymentCharge, PaymentRefund};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.stripe.com";

#[derive(Debug, Clone, Deserialize)]
pub struct StripeConfig {
    /// Falls back to `STRIPE_SECRET_KEY`
    #[serde(default)]
    pub secret_key: Option<SecretString>,
    #[serde(default)]
    pub base_url: Option<String>,
}

pub struct StripeAdapter {
    client: reqwest::Client,
    base_url: String,
    secret_key: SecretString,
}

#[derive(Debug, Deserialize)]
struct PaymentIntent {
    id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct Refund {
    id: String,
    status: String,
}

impl StripeAdapter {
    pub fn new(secret_key: SecretString, base_url: Option<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            secret_key,
        })
    }

    pub fn from_config(config: &StripeConfig, timeout: Duration) -> Result<Self> {
        let secret_key = config.secret_key.clone().ok_or_else(|| {
            IntegrationError::Config("stripe.secret_key is not set".to_string())
        })?;
        Self::new(secret_key, config.base_url.clone(), timeout)
    }

    async fn post_form(
        &self,
        path: &str,
        idempotency_key: &str,
        form: &[(&str, String)],
    ) -> std::result::Result<reqwest::Response, AdapterError> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(self.secret_key.expose_secret())
            .header("Idempotency-Key", idempotency_key)
            .form(form)
            .send()
            .await?;
        check_status(response).await
    }
}

#[async_trait]
impl PaymentAdapter for StripeAdapter {
    fn provider(&self) -> &str {
        "stripe"
    }

    async fn charge(&self, charge: &PaymentCharge) -> std::result::Result<String, AdapterError> {
        let mut form = vec![
            ("amount", charge.amount.minor_units.to_string()),
            ("currency", charge.amount.currency.code().to_ascii_lowercase()),
            ("confirm", "true".to_string()),
        ];
        if let Some(customer) = &charge.customer_ref {
            form.push(("customer", customer.clone()));
            form.push(("off_session", "true".to_string()));
        }
        if let Some(description) = &charge.description {
            form.push(("description", description.clone()));
        }

        let response = self
            .post_form("/v1/payment_intents", &charge.idempotency_key, &form)
            .await?;
        let intent: PaymentIntent = response.json().await?;

        match intent.status.as_str() {
            "succeeded" | "processing" => Ok(intent.id),
            other => Err(AdapterError::Protocol(format!(
                "payment intent {} ended in status {}",
                intent.id, other
            ))),
        }
    }

    async fn refund(&self, refund: &PaymentRefund) -> std::result::Result<String, AdapterError> {
        let mut form = vec![("payment_intent", refund.transaction_id.clone())];
        if let Some(amount) = &refund.amount {
            form.push(("amount", amount.minor_units.to_string()));
        }

        let response = self
            .post_form("/v1/refunds", &refund.idempotency_key, &form)
            .await?;
        let created: Refund = response.json().await?;

        if created.status == "failed" || created.status == "canceled" {
            return Err(AdapterError::Protocol(format!(
                "refund {} ended in status {}",
                created.id, created.status
            )));
        }
        Ok(created.id)
    }

    async fn ping(&self) -> std::result::Result<(), AdapterError> {
        let response = self
            .client
            .get(format!("{}/v1/balance", self.base_url))
            .bearer_auth(self.secret_key.expose_secret())
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}
