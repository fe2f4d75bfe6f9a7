//! IntegrationManager: capability-oriented entry points over fallback chains
//!
//! The manager owns one [`FallbackChain`] per capability, the
//! [`HealthMonitor`] probing every registered provider, and the
//! [`IntegrationMetrics`] sink. It is built once (from a [`ShieldConfig`] or
//! the [`IntegrationManagerBuilder`]) and shared by `Arc`; the chains are
//! immutable afterwards, so concurrent calls read them without locking.
//!
//! ```text
//! send_email_reliably(req)
//!   ├─ req.validate()            ← ValidationError, no provider touched
//!   └─ email chain.execute()
//!        ├─ sendgrid  (breaker → timeout → metrics)
//!        └─ smtp      (only if sendgrid failed or was circuit-open)
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use shield::{EmailRequest, IntegrationManager, ShieldConfig};
//! use std::path::Path;
//!
//! # async fn example() -> shield::Result<()> {
//! let config = ShieldConfig::from_file(Path::new("shield.toml"))?;
//! let manager = IntegrationManager::from_config(&config)?;
//! manager.start_monitoring(config.monitor.probe_interval())?;
//!
//! let receipt = manager
//!     .send_email_reliably(EmailRequest::new("a@b.com", "Takedown notice", "..."))
//!     .await?;
//! println!("sent via {} (fallback: {})", receipt.provider_used, receipt.fallback_used);
//! # Ok(())
//! # }
//! ```

use crate::adapters::{
    build_email_adapter, build_image_adapter, build_payment_adapter, AdapterError, EmailAdapter,
    ImageAnalysisAdapter, PaymentAdapter,
};
use crate::config::{Capability, CapabilityConfig, ProviderKind, ShieldConfig};
use crate::error::{IntegrationError, Result, ValidationError};
use crate::metrics::{IntegrationMetrics, ProviderMetrics};
use crate::types::{
    ChargeRequest, EmailReceipt, EmailRequest, ImageReport, ImageRequest, PaymentCharge,
    PaymentReceipt, PaymentRefund, RefundReceipt, RefundRequest,
};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use shield_core_resilience::{
    AdapterHealth, ChainLink, CircuitBreaker, CircuitBreakerConfig, FallbackChain, HealthMonitor,
    ProbeRound, ProbeTarget,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default bound on a single health probe
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Breaker and timeout policy for one capability chain
#[derive(Debug, Clone, PartialEq)]
pub struct ChainPolicy {
    pub breaker: CircuitBreakerConfig,
    pub call_timeout: Duration,
}

impl Default for ChainPolicy {
    fn default() -> Self {
        Self {
            breaker: CircuitBreakerConfig::default(),
            call_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&CapabilityConfig> for ChainPolicy {
    fn from(config: &CapabilityConfig) -> Self {
        Self {
            breaker: config.breaker_config(),
            call_timeout: config.call_timeout(),
        }
    }
}

/// Health of one provider as reported to ops endpoints
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderHealth {
    pub capability: String,
    #[serde(flatten)]
    pub health: AdapterHealth,
}

struct ChainSpec<A: ?Sized> {
    policy: ChainPolicy,
    links: Vec<(String, Arc<A>)>,
}

/// Assembles an [`IntegrationManager`] from adapters
pub struct IntegrationManagerBuilder {
    email: Option<ChainSpec<dyn EmailAdapter>>,
    image: Option<ChainSpec<dyn ImageAnalysisAdapter>>,
    payment: Option<ChainSpec<dyn PaymentAdapter>>,
    probe_timeout: Duration,
}

impl Default for IntegrationManagerBuilder {
    fn default() -> Self {
        Self {
            email: None,
            image: None,
            payment: None,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

impl IntegrationManagerBuilder {
    pub fn email(
        mut self,
        policy: ChainPolicy,
        primary: Arc<dyn EmailAdapter>,
        fallbacks: Vec<Arc<dyn EmailAdapter>>,
    ) -> Self {
        let links = std::iter::once(primary)
            .chain(fallbacks)
            .map(|a| (a.provider().to_string(), a))
            .collect();
        self.email = Some(ChainSpec { policy, links });
        self
    }

    pub fn image_analysis(
        mut self,
        policy: ChainPolicy,
        primary: Arc<dyn ImageAnalysisAdapter>,
        fallbacks: Vec<Arc<dyn ImageAnalysisAdapter>>,
    ) -> Self {
        let links = std::iter::once(primary)
            .chain(fallbacks)
            .map(|a| (a.provider().to_string(), a))
            .collect();
        self.image = Some(ChainSpec { policy, links });
        self
    }

    pub fn payment(
        mut self,
        policy: ChainPolicy,
        primary: Arc<dyn PaymentAdapter>,
        fallbacks: Vec<Arc<dyn PaymentAdapter>>,
    ) -> Self {
        let links = std::iter::once(primary)
            .chain(fallbacks)
            .map(|a| (a.provider().to_string(), a))
            .collect();
        self.payment = Some(ChainSpec { policy, links });
        self
    }

    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Validate policies and wire chains, breakers, metrics and the monitor.
    ///
    /// Every capability must have been given a chain.
    pub fn build(self) -> Result<IntegrationManager> {
        let metrics = Arc::new(IntegrationMetrics::new());

        let email = build_chain(Capability::Email, self.email, &metrics)?;
        let image = build_chain(Capability::ImageAnalysis, self.image, &metrics)?;
        let payment = build_chain(Capability::Payment, self.payment, &metrics)?;

        if self.probe_timeout.is_zero() {
            return Err(IntegrationError::Config(
                "probe timeout must be greater than 0".to_string(),
            ));
        }

        let mut targets = Vec::new();
        targets.extend(probe_targets(&email, |a: Arc<dyn EmailAdapter>| {
            async move { a.ping().await }.boxed()
        }));
        targets.extend(probe_targets(&image, |a: Arc<dyn ImageAnalysisAdapter>| {
            async move { a.ping().await }.boxed()
        }));
        targets.extend(probe_targets(&payment, |a: Arc<dyn PaymentAdapter>| {
            async move { a.ping().await }.boxed()
        }));
        let monitor = HealthMonitor::new(targets, self.probe_timeout);

        Ok(IntegrationManager {
            email,
            image,
            payment,
            monitor,
            metrics,
        })
    }
}

fn build_chain<A: ?Sized + Send + Sync + 'static>(
    capability: Capability,
    spec: Option<ChainSpec<A>>,
    metrics: &Arc<IntegrationMetrics>,
) -> Result<FallbackChain<A>> {
    let spec = spec.ok_or_else(|| {
        IntegrationError::Config(format!(
            "no providers registered for capability '{}'",
            capability
        ))
    })?;
    spec.policy.breaker.validate()?;

    let mut links = spec.links.into_iter().map(|(provider, adapter)| {
        metrics.register(capability.as_str(), &provider);
        ChainLink::new(adapter, CircuitBreaker::new(provider, spec.policy.breaker.clone()))
    });
    let primary = links.next().ok_or_else(|| {
        IntegrationError::Config(format!("capability '{}' has no primary provider", capability))
    })?;
    let fallbacks: Vec<_> = links.collect();

    let chain = FallbackChain::new(capability.as_str(), primary, fallbacks, spec.policy.call_timeout)?
        .with_observer(metrics.clone());

    info!(
        capability = %capability,
        providers = ?chain.providers(),
        call_timeout_secs = spec.policy.call_timeout.as_secs_f64(),
        "Registered capability chain"
    );
    Ok(chain)
}

fn probe_targets<A: ?Sized + Send + Sync + 'static>(
    chain: &FallbackChain<A>,
    ping: fn(Arc<A>) -> BoxFuture<'static, std::result::Result<(), AdapterError>>,
) -> Vec<ProbeTarget> {
    chain
        .links()
        .iter()
        .map(|link| {
            let adapter = link.adapter().clone();
            ProbeTarget::new(
                link.breaker().clone(),
                Arc::new(move || {
                    ping(adapter.clone())
                        .map(|r| r.map_err(|e| e.to_string()))
                        .boxed()
                }),
            )
        })
        .collect()
}

/// Facade over the email, image analysis and payment chains
pub struct IntegrationManager {
    email: FallbackChain<dyn EmailAdapter>,
    image: FallbackChain<dyn ImageAnalysisAdapter>,
    payment: FallbackChain<dyn PaymentAdapter>,
    monitor: HealthMonitor,
    metrics: Arc<IntegrationMetrics>,
}

impl IntegrationManager {
    pub fn builder() -> IntegrationManagerBuilder {
        IntegrationManagerBuilder::default()
    }

    /// Build adapters from configuration.
    ///
    /// A fallback whose credentials are missing is left out with a warning;
    /// a primary whose credentials are missing is a fatal error.
    pub fn from_config(config: &ShieldConfig) -> Result<Self> {
        let providers = &config.providers;

        let email_cfg = config.capability(Capability::Email)?;
        let (primary, fallbacks) = resolve_chain(Capability::Email, email_cfg, |kind| {
            build_email_adapter(kind, providers, email_cfg.call_timeout())
        })?;
        let mut builder = Self::builder().email(email_cfg.into(), primary, fallbacks);

        let image_cfg = config.capability(Capability::ImageAnalysis)?;
        let (primary, fallbacks) = resolve_chain(Capability::ImageAnalysis, image_cfg, |kind| {
            build_image_adapter(kind, providers, image_cfg.call_timeout())
        })?;
        builder = builder.image_analysis(image_cfg.into(), primary, fallbacks);

        let payment_cfg = config.capability(Capability::Payment)?;
        let (primary, fallbacks) = resolve_chain(Capability::Payment, payment_cfg, |kind| {
            build_payment_adapter(kind, providers, payment_cfg.call_timeout())
        })?;
        builder = builder.payment(payment_cfg.into(), primary, fallbacks);

        builder.probe_timeout(config.monitor.probe_timeout()).build()
    }

    // -- Email --------------------------------------------------------------

    pub async fn send_email_reliably(&self, request: EmailRequest) -> Result<EmailReceipt> {
        self.send_email_reliably_with_cancel(request, &CancellationToken::new())
            .await
    }

    pub async fn send_email_reliably_with_cancel(
        &self,
        request: EmailRequest,
        cancel: &CancellationToken,
    ) -> Result<EmailReceipt> {
        request.validate().map_err(|e| rejected(Capability::Email, e))?;

        let request = Arc::new(request);
        let served = self
            .email
            .execute(cancel, |adapter| {
                let request = request.clone();
                async move { adapter.send(&request).await }
            })
            .await?;

        info!(
            capability = "email",
            provider = served.provider(),
            fallback_used = served.used_fallback(),
            "Email delivered"
        );
        Ok(EmailReceipt {
            message_id: served.value.clone(),
            provider_used: served.provider().to_string(),
            fallback_used: served.used_fallback(),
            outcome: served.outcome,
        })
    }

    // -- Image analysis -----------------------------------------------------

    pub async fn analyze_image_reliably(&self, request: ImageRequest) -> Result<ImageReport> {
        self.analyze_image_reliably_with_cancel(request, &CancellationToken::new())
            .await
    }

    pub async fn analyze_image_reliably_with_cancel(
        &self,
        request: ImageRequest,
        cancel: &CancellationToken,
    ) -> Result<ImageReport> {
        request
            .validate()
            .map_err(|e| rejected(Capability::ImageAnalysis, e))?;

        let request = Arc::new(request);
        let served = self
            .image
            .execute(cancel, |adapter| {
                let request = request.clone();
                async move { adapter.analyze(&request.image, &request.options).await }
            })
            .await?;

        debug!(
            capability = "image_analysis",
            provider = served.provider(),
            labels = served.value.labels.len(),
            explicit = served.value.explicit_content,
            "Image analyzed"
        );
        let provider_used = served.provider().to_string();
        let fallback_used = served.used_fallback();
        Ok(ImageReport {
            analysis: served.value,
            provider_used,
            fallback_used,
            outcome: served.outcome,
        })
    }

    // -- Payments -----------------------------------------------------------

    /// Charge through the payment chain.
    ///
    /// One idempotency key (the caller's, or a generated one) is handed to
    /// every provider attempt and returned in the receipt.
    pub async fn process_payment_reliably(&self, request: ChargeRequest) -> Result<PaymentReceipt> {
        self.process_payment_reliably_with_cancel(request, &CancellationToken::new())
            .await
    }

    pub async fn process_payment_reliably_with_cancel(
        &self,
        request: ChargeRequest,
        cancel: &CancellationToken,
    ) -> Result<PaymentReceipt> {
        request
            .validate()
            .map_err(|e| rejected(Capability::Payment, e))?;

        let idempotency_key = request
            .idempotency_key
            .unwrap_or_else(|| format!("shield-{}", uuid::Uuid::new_v4()));
        let charge = Arc::new(PaymentCharge {
            amount: request.amount,
            customer_ref: request.customer_ref,
            description: request.description,
            idempotency_key: idempotency_key.clone(),
        });

        let served = self
            .payment
            .execute(cancel, |adapter| {
                let charge = charge.clone();
                async move { adapter.charge(&charge).await }
            })
            .await?;

        info!(
            capability = "payment",
            provider = served.provider(),
            fallback_used = served.used_fallback(),
            amount = %charge.amount,
            idempotency_key = %idempotency_key,
            "Payment captured"
        );
        Ok(PaymentReceipt {
            transaction_id: served.value.clone(),
            provider_used: served.provider().to_string(),
            fallback_used: served.used_fallback(),
            idempotency_key,
            amount: charge.amount.clone(),
            outcome: served.outcome,
        })
    }

    /// Refund through the provider that captured the charge; never falls back.
    pub async fn refund_payment_reliably(&self, request: RefundRequest) -> Result<RefundReceipt> {
        self.refund_payment_reliably_with_cancel(request, &CancellationToken::new())
            .await
    }

    pub async fn refund_payment_reliably_with_cancel(
        &self,
        request: RefundRequest,
        cancel: &CancellationToken,
    ) -> Result<RefundReceipt> {
        request
            .validate()
            .map_err(|e| rejected(Capability::Payment, e))?;
        if !self.payment.providers().contains(&request.provider.as_str()) {
            return Err(rejected(
                Capability::Payment,
                ValidationError::invalid(
                    "provider",
                    format!("'{}' is not a configured payment provider", request.provider),
                ),
            ));
        }

        let idempotency_key = request
            .idempotency_key
            .unwrap_or_else(|| format!("shield-refund-{}", uuid::Uuid::new_v4()));
        let refund = Arc::new(PaymentRefund {
            transaction_id: request.transaction_id,
            amount: request.amount,
            idempotency_key: idempotency_key.clone(),
        });

        let served = self
            .payment
            .execute_on(&request.provider, cancel, |adapter| {
                let refund = refund.clone();
                async move { adapter.refund(&refund).await }
            })
            .await?;

        info!(
            capability = "payment",
            provider = served.provider(),
            transaction_id = %refund.transaction_id,
            "Refund issued"
        );
        Ok(RefundReceipt {
            refund_id: served.value.clone(),
            provider_used: served.provider().to_string(),
            idempotency_key,
            outcome: served.outcome,
        })
    }

    // -- Health & metrics ---------------------------------------------------

    /// Point-in-time health of every registered provider
    pub async fn health(&self) -> BTreeMap<String, ProviderHealth> {
        let mut out = BTreeMap::new();
        for (capability, breakers) in self.breakers() {
            for breaker in breakers {
                out.insert(
                    breaker.provider().to_string(),
                    ProviderHealth {
                        capability: capability.to_string(),
                        health: breaker.snapshot().await,
                    },
                );
            }
        }
        out
    }

    /// Aggregated per-provider counters and latency percentiles
    pub fn metrics(&self) -> BTreeMap<String, ProviderMetrics> {
        self.metrics.snapshot()
    }

    /// Prometheus text exposition
    pub fn metrics_text(&self) -> String {
        self.metrics.metrics_text()
    }

    /// Start background probing; `Ok(false)` if it was already running
    pub fn start_monitoring(&self, interval: Duration) -> Result<bool> {
        Ok(self.monitor.start(interval)?)
    }

    pub async fn stop_monitoring(&self) {
        self.monitor.stop().await;
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitor.is_running()
    }

    /// Probe every provider once, immediately
    pub async fn probe_now(&self) -> ProbeRound {
        self.monitor.probe_once().await
    }

    /// Providers for a capability, primary first
    pub fn providers(&self, capability: Capability) -> Vec<String> {
        let providers = match capability {
            Capability::Email => self.email.providers(),
            Capability::ImageAnalysis => self.image.providers(),
            Capability::Payment => self.payment.providers(),
        };
        providers.into_iter().map(str::to_string).collect()
    }

    /// Breaker for a provider, e.g. for administrative inspection
    pub fn breaker(&self, provider: &str) -> Option<&CircuitBreaker> {
        self.breakers()
            .into_iter()
            .flat_map(|(_, breakers)| breakers)
            .find(|b| b.provider() == provider)
    }

    /// Administrative reset of one provider's breaker
    pub async fn reset_provider(&self, provider: &str) -> bool {
        match self.breaker(provider) {
            Some(breaker) => {
                breaker.reset().await;
                true
            }
            None => false,
        }
    }

    fn breakers(&self) -> Vec<(Capability, Vec<&CircuitBreaker>)> {
        vec![
            (
                Capability::Email,
                self.email.links().iter().map(ChainLink::breaker).collect(),
            ),
            (
                Capability::ImageAnalysis,
                self.image.links().iter().map(ChainLink::breaker).collect(),
            ),
            (
                Capability::Payment,
                self.payment.links().iter().map(ChainLink::breaker).collect(),
            ),
        ]
    }
}

fn rejected(capability: Capability, error: ValidationError) -> IntegrationError {
    debug!(capability = %capability, field = error.field(), "Request rejected: {}", error);
    IntegrationError::Validation(error)
}

/// Instantiate the configured chain, dropping fallbacks that lack credentials
fn resolve_chain<A: ?Sized>(
    capability: Capability,
    config: &CapabilityConfig,
    build: impl Fn(ProviderKind) -> Result<Option<Arc<A>>>,
) -> Result<(Arc<A>, Vec<Arc<A>>)> {
    let primary = build(config.primary)?.ok_or_else(|| {
        IntegrationError::Config(format!(
            "primary provider '{}' for '{}' has no credentials configured",
            config.primary, capability
        ))
    })?;

    let mut fallbacks = Vec::new();
    for kind in &config.fallbacks {
        match build(*kind)? {
            Some(adapter) => fallbacks.push(adapter),
            None => warn!(
                capability = %capability,
                provider = %kind,
                "Fallback provider disabled: credentials not configured"
            ),
        }
    }

    if fallbacks.is_empty() {
        warn!(capability = %capability, "No fallback providers available; primary only");
    }
    Ok((primary, fallbacks))
}
