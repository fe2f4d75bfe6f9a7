/*!
 * Error types for Shield
 */

use shield_core_resilience::{ChainError, ProviderFailure, ResilienceError};
use thiserror::Error;

pub use crate::adapters::AdapterError;

pub type Result<T> = std::result::Result<T, IntegrationError>;

/// Exit code constants for structured process exit
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_DEGRADED: i32 = 1;
pub const EXIT_FATAL: i32 = 2;

/// Malformed or missing input to a capability call.
///
/// Raised before any adapter or breaker is touched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("invalid value for '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },
}

impl ValidationError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ValidationError::InvalidField {
            field,
            reason: reason.into(),
        }
    }

    /// Name of the offending field
    pub fn field(&self) -> &'static str {
        match self {
            ValidationError::MissingField(field) => field,
            ValidationError::InvalidField { field, .. } => field,
        }
    }
}

/// Errors surfaced by the integration manager
#[derive(Debug, Error)]
pub enum IntegrationError {
    /// Bad caller input; no provider was contacted
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Every provider in the chain failed or was circuit-open
    #[error("All providers unavailable for '{capability}'")]
    AllProvidersUnavailable {
        capability: String,
        failures: Vec<ProviderFailure>,
    },

    /// The caller cancelled the request mid-flight
    #[error("Request to '{capability}' was cancelled")]
    Cancelled {
        capability: String,
        in_flight: Option<String>,
    },

    /// Startup configuration is unusable
    #[error("Configuration error: {0}")]
    Config(String),

    /// Breaker or chain wiring error
    #[error(transparent)]
    Resilience(#[from] ResilienceError),

    /// Config file could not be read
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl IntegrationError {
    /// Whether a later retry may succeed once circuits recover
    pub fn is_retryable(&self) -> bool {
        matches!(self, IntegrationError::AllProvidersUnavailable { .. })
    }

    /// Status an HTTP layer should translate this error into
    pub fn http_status(&self) -> u16 {
        match self {
            IntegrationError::Validation(_) => 400,
            IntegrationError::AllProvidersUnavailable { .. } => 503,
            IntegrationError::Cancelled { .. } => 499,
            IntegrationError::Config(_)
            | IntegrationError::Resilience(_)
            | IntegrationError::Io(_) => 500,
        }
    }

    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            IntegrationError::AllProvidersUnavailable { .. } | IntegrationError::Cancelled { .. } => {
                EXIT_DEGRADED
            }
            IntegrationError::Validation(_)
            | IntegrationError::Config(_)
            | IntegrationError::Resilience(_)
            | IntegrationError::Io(_) => EXIT_FATAL,
        }
    }

    /// Per-provider diagnostics, empty unless every provider failed
    pub fn failures(&self) -> &[ProviderFailure] {
        match self {
            IntegrationError::AllProvidersUnavailable { failures, .. } => failures,
            _ => &[],
        }
    }
}

impl From<ChainError> for IntegrationError {
    fn from(err: ChainError) -> Self {
        match err {
            ChainError::AllProvidersUnavailable {
                capability,
                failures,
            } => IntegrationError::AllProvidersUnavailable {
                capability,
                failures,
            },
            ChainError::Cancelled {
                capability,
                in_flight,
            } => IntegrationError::Cancelled {
                capability,
                in_flight,
            },
            ChainError::Resilience(e) => IntegrationError::Resilience(e),
        }
    }
}
