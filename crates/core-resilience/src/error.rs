//! Error types for the resilience primitives

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while building or validating resilience components
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResilienceError {
    /// A breaker policy value is out of range
    #[error("Invalid circuit breaker policy: {0}")]
    InvalidPolicy(String),

    /// A provider appears more than once in the same chain
    #[error("Provider '{provider}' appears more than once in the '{capability}' chain")]
    DuplicateProvider {
        capability: String,
        provider: String,
    },

    /// A chain was requested for a provider it does not contain
    #[error("Provider '{provider}' is not part of the '{capability}' chain")]
    UnknownProvider {
        capability: String,
        provider: String,
    },

    /// The breaker for this provider is rejecting calls
    #[error("Circuit breaker for '{0}' is open")]
    CircuitOpen(String),

    /// A call did not complete within the configured timeout
    #[error("Call to '{provider}' timed out after {after:?}")]
    Timeout { provider: String, after: Duration },
}

/// Why one provider in a chain did not serve a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Skipped without invocation because its breaker was open
    CircuitOpen,
    /// The adapter returned an error
    Error,
    /// The adapter did not answer within the call timeout
    Timeout,
    /// The adapter task panicked or was aborted
    Aborted,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FailureKind::CircuitOpen => "circuit open",
            FailureKind::Error => "error",
            FailureKind::Timeout => "timeout",
            FailureKind::Aborted => "aborted",
        };
        f.write_str(label)
    }
}

/// Per-provider diagnostic entry carried by [`ChainError::AllProvidersUnavailable`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderFailure {
    pub provider: String,
    pub kind: FailureKind,
    pub message: String,
}

impl fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.provider, self.kind, self.message)
    }
}

/// Errors returned by [`crate::FallbackChain`] execution
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// Every provider in the chain either failed or was circuit-open
    #[error("All providers unavailable for '{capability}': {}", join_failures(.failures))]
    AllProvidersUnavailable {
        capability: String,
        failures: Vec<ProviderFailure>,
    },

    /// The caller cancelled while the chain was running
    #[error("Call to '{capability}' cancelled by caller")]
    Cancelled {
        capability: String,
        /// Provider whose call was in flight when cancellation arrived
        in_flight: Option<String>,
    },

    /// A pinned call named a provider that is not in the chain
    #[error(transparent)]
    Resilience(#[from] ResilienceError),
}

impl ChainError {
    /// Whether the caller may reasonably retry later
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChainError::AllProvidersUnavailable { .. })
    }
}

fn join_failures(failures: &[ProviderFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
