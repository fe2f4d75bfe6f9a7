/*!
 * Shield - reliability layer for third-party integrations
 *
 * Wraps outbound calls to external providers with:
 * - Ordered fallback chains per capability (email, image analysis, payments)
 * - Per-provider circuit breakers with cooldown and half-open trials
 * - Per-call timeouts and cancellation
 * - Background health probing that feeds the same breakers
 * - Per-provider metrics (JSON snapshot and Prometheus exposition)
 *
 * Author: Shane Wall <shaneawall@gmail.com>
 */

pub mod adapters;
pub mod config;
pub mod error;
pub mod logging;
pub mod manager;
pub mod metrics;
pub mod types;

// Re-export commonly used types
pub use config::{Capability, CapabilityConfig, ProviderKind, ShieldConfig};
pub use error::{IntegrationError, Result, ValidationError};
pub use manager::{ChainPolicy, IntegrationManager, IntegrationManagerBuilder, ProviderHealth};
pub use metrics::ProviderMetrics;
pub use types::{
    AnalysisOptions, Attachment, ChargeRequest, Currency, EmailReceipt, EmailRequest,
    ImageAnalysis, ImageReport, ImageRequest, Label, Money, PaymentReceipt, RefundReceipt,
    RefundRequest,
};

pub use shield_core_resilience::{AdapterHealth, CallOutcome, CircuitState};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
