//! Shield Core Resilience: provider-agnostic failover primitives
//!
//! # Overview
//!
//! This crate provides the building blocks for calling interchangeable
//! external providers reliably. It includes:
//!
//! - **Circuit Breaker**: Per-provider health record that fails fast once a provider misbehaves
//! - **Fallback Chain**: Ordered primary + fallback providers, tried one at a time
//! - **Health Monitor**: Periodic background probing that feeds the breakers
//!
//! # Key Principles
//!
//! This crate is **pure logic** with zero knowledge of:
//! - Concrete providers (SendGrid, Stripe, ...)
//! - Network protocols (HTTP, SMTP)
//! - Request or response payloads
//!
//! Chains are generic over the adapter type, so any capability trait object
//! can be orchestrated the same way.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         Integration Manager             │
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Fallback Chain                    │  ← Ordered failover
//! │  (primary, fallback #1, fallback #2...) │
//! └─────────────┬───────────────────────────┘
//!               │ per provider
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Circuit Breaker                   │  ← Fail-fast protection
//! │  (windowed failures, cooldown, trials)  │
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//!         External Provider
//!               ▲
//!               │ probes (bypass allow, feed outcomes)
//! ┌─────────────┴───────────────────────────┐
//! │       Health Monitor                    │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Usage Example
//!
//! ```no_run
//! use shield_core_resilience::{ChainError, ChainLink, CircuitBreaker, FallbackChain};
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! struct Mailer(&'static str);
//!
//! impl Mailer {
//!     async fn send(&self) -> Result<String, String> {
//!         Ok(format!("sent via {}", self.0))
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let chain = FallbackChain::new(
//!     "email",
//!     ChainLink::new(Arc::new(Mailer("sendgrid")), CircuitBreaker::new_default("sendgrid")),
//!     vec![ChainLink::new(Arc::new(Mailer("smtp")), CircuitBreaker::new_default("smtp"))],
//!     Duration::from_secs(10),
//! )?;
//!
//! let served = chain
//!     .execute(&CancellationToken::new(), |mailer| async move { mailer.send().await })
//!     .await?;
//! println!("{} (fallback: {})", served.value, served.used_fallback());
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
pub mod error;
pub mod fallback;
pub mod health_monitor;

// Re-export main types for convenience
pub use circuit_breaker::{
    AdapterHealth, CircuitBreaker, CircuitBreakerConfig, CircuitState, Origin,
};
pub use error::{ChainError, FailureKind, ProviderFailure, ResilienceError};
pub use fallback::{
    Attempt, AttemptObserver, AttemptResult, CallOutcome, ChainLink, FallbackChain,
    NoopObserver, Served,
};
pub use health_monitor::{HealthMonitor, ProbeFn, ProbeRound, ProbeTarget};

/// Prelude module for convenient imports
///
/// # Example
/// ```
/// use shield_core_resilience::prelude::*;
/// ```
pub mod prelude {
    pub use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
    pub use super::error::{ChainError, ResilienceError};
    pub use super::fallback::{ChainLink, FallbackChain, Served};
    pub use super::health_monitor::{HealthMonitor, ProbeTarget};
}
