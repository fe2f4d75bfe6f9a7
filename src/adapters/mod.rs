//! Provider adapters
//!
//! Each capability has a fixed trait with one implementation per provider:
//!
//! | Capability      | Trait                    | Providers                         |
//! |-----------------|--------------------------|-----------------------------------|
//! | Email           | [`EmailAdapter`]         | [`SendGridAdapter`], [`SmtpAdapter`] |
//! | Image analysis  | [`ImageAnalysisAdapter`] | [`GoogleVisionAdapter`], [`LocalAnalysisAdapter`] |
//! | Payment         | [`PaymentAdapter`]       | [`PayPalAdapter`], [`StripeAdapter`] |
//!
//! Adapters know nothing about breakers or fallbacks. They report success or
//! an [`AdapterError`]; the fallback chain decides what happens next.

pub mod error;
pub mod google_vision;
pub mod local_analysis;
pub mod paypal;
pub mod sendgrid;
pub mod smtp;
pub mod stripe;

pub use error::AdapterError;
pub use google_vision::GoogleVisionAdapter;
pub use local_analysis::LocalAnalysisAdapter;
pub use paypal::PayPalAdapter;
pub use sendgrid::SendGridAdapter;
pub use smtp::SmtpAdapter;
pub use stripe::StripeAdapter;

use crate::config::{ProviderKind, ProvidersConfig};
use crate::error::{IntegrationError, Result};
use crate::types::{AnalysisOptions, EmailRequest, ImageAnalysis, PaymentCharge, PaymentRefund};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Sends one email message
#[async_trait]
pub trait EmailAdapter: Send + Sync {
    /// Provider id used for breakers, metrics and receipts
    fn provider(&self) -> &str;

    /// Deliver the message and return the provider's message id
    async fn send(&self, request: &EmailRequest) -> std::result::Result<String, AdapterError>;

    /// Cheap availability check with no side effects
    async fn ping(&self) -> std::result::Result<(), AdapterError>;
}

/// Classifies image content
#[async_trait]
pub trait ImageAnalysisAdapter: Send + Sync {
    fn provider(&self) -> &str;

    async fn analyze(
        &self,
        image: &[u8],
        options: &AnalysisOptions,
    ) -> std::result::Result<ImageAnalysis, AdapterError>;

    async fn ping(&self) -> std::result::Result<(), AdapterError>;
}

/// Moves money
#[async_trait]
pub trait PaymentAdapter: Send + Sync {
    fn provider(&self) -> &str;

    /// Charge and capture; returns the provider's transaction id
    async fn charge(&self, charge: &PaymentCharge) -> std::result::Result<String, AdapterError>;

    /// Refund a previously captured transaction; returns the refund id
    async fn refund(&self, refund: &PaymentRefund) -> std::result::Result<String, AdapterError>;

    async fn ping(&self) -> std::result::Result<(), AdapterError>;
}

/// Shared HTTP client for the HTTPS providers
pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("shield/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| IntegrationError::Config(format!("Failed to build HTTP client: {}", e)))
}

/// Build the email adapter for `kind`, or `None` when its credentials are absent
pub fn build_email_adapter(
    kind: ProviderKind,
    providers: &ProvidersConfig,
    timeout: Duration,
) -> Result<Option<Arc<dyn EmailAdapter>>> {
    let adapter: Option<Arc<dyn EmailAdapter>> = match kind {
        ProviderKind::Sendgrid => match &providers.sendgrid {
            Some(cfg) if cfg.api_key.is_some() => {
                Some(Arc::new(SendGridAdapter::from_config(cfg, timeout)?))
            }
            _ => None,
        },
        ProviderKind::Smtp => providers
            .smtp
            .as_ref()
            .map(|cfg| Arc::new(SmtpAdapter::new(cfg.clone())) as Arc<dyn EmailAdapter>),
        other => return Err(wrong_capability(other, "email")),
    };
    Ok(adapter)
}

/// Build the image analysis adapter for `kind`, or `None` when its credentials are absent
pub fn build_image_adapter(
    kind: ProviderKind,
    providers: &ProvidersConfig,
    timeout: Duration,
) -> Result<Option<Arc<dyn ImageAnalysisAdapter>>> {
    let adapter: Option<Arc<dyn ImageAnalysisAdapter>> = match kind {
        ProviderKind::GoogleVision => match &providers.google_vision {
            Some(cfg) if cfg.api_key.is_some() => {
                Some(Arc::new(GoogleVisionAdapter::from_config(cfg, timeout)?))
            }
            _ => None,
        },
        // Needs no credentials, so it is always available
        ProviderKind::LocalAnalysis => Some(Arc::new(LocalAnalysisAdapter::new(
            providers.local_analysis.clone().unwrap_or_default(),
        ))),
        other => return Err(wrong_capability(other, "image_analysis")),
    };
    Ok(adapter)
}

/// Build the payment adapter for `kind`, or `None` when its credentials are absent
pub fn build_payment_adapter(
    kind: ProviderKind,
    providers: &ProvidersConfig,
    timeout: Duration,
) -> Result<Option<Arc<dyn PaymentAdapter>>> {
    let adapter: Option<Arc<dyn PaymentAdapter>> = match kind {
        ProviderKind::Paypal => match &providers.paypal {
            Some(cfg) if cfg.client_secret.is_some() && !cfg.client_id.is_empty() => {
                Some(Arc::new(PayPalAdapter::from_config(cfg, timeout)?))
            }
            _ => None,
        },
        ProviderKind::Stripe => match &providers.stripe {
            Some(cfg) if cfg.secret_key.is_some() => {
                Some(Arc::new(StripeAdapter::from_config(cfg, timeout)?))
            }
            _ => None,
        },
        other => return Err(wrong_capability(other, "payment")),
    };
    Ok(adapter)
}

fn wrong_capability(kind: ProviderKind, capability: &str) -> IntegrationError {
    IntegrationError::Config(format!(
        "provider '{}' cannot serve '{}'",
        kind, capability
    ))
}
