//! Circuit Breaker implementation for fault tolerance
//!
//! The circuit breaker prevents cascading failures by failing fast when a provider
//! is experiencing issues. It has three states:
//! - Closed: Normal operation, calls pass through
//! - Open: Provider is unhealthy, calls are rejected without being attempted
//! - HalfOpen: A limited number of trial calls test whether the provider recovered
//!
//! Each breaker also owns the provider's health record (rolling counters,
//! last latency, last failure). Every mutation goes through the breaker's own
//! lock, so unrelated providers never contend with each other.

use super::error::ResilienceError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Upper bound on retained failure timestamps outside the Closed state
const MAX_FAILURE_SAMPLES: usize = 4096;

/// Number of buckets the success window is divided into
const SUCCESS_BUCKETS: u32 = 60;

/// State of the circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Circuit is closed, calls pass through normally
    Closed,
    /// Circuit is open, calls are rejected until the cooldown elapses
    Open,
    /// Circuit is half-open, trial calls are testing recovery
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        };
        f.write_str(label)
    }
}

/// Where an outcome came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// A production call routed through the orchestrator
    Call,
    /// A health monitor probe
    Probe,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Call => f.write_str("call"),
            Origin::Probe => f.write_str("probe"),
        }
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Failures within `window` that open the circuit
    pub failure_threshold: u32,
    /// Sliding window over which failures are counted
    pub window: Duration,
    /// Duration to wait before transitioning from open to half-open
    pub cooldown: Duration,
    /// Consecutive trial successes in half-open needed to close the circuit
    pub half_open_trials: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window: Duration::from_secs(60),
            cooldown: Duration::from_secs(30),
            half_open_trials: 1,
        }
    }
}

impl CircuitBreakerConfig {
    /// Validate the policy values
    pub fn validate(&self) -> Result<(), ResilienceError> {
        if self.failure_threshold == 0 {
            return Err(ResilienceError::InvalidPolicy(
                "failure_threshold must be at least 1".to_string(),
            ));
        }
        // Failures past the sample cap are dropped, so a larger threshold could never trip
        if self.failure_threshold as usize > MAX_FAILURE_SAMPLES {
            return Err(ResilienceError::InvalidPolicy(format!(
                "failure_threshold must be at most {}",
                MAX_FAILURE_SAMPLES
            )));
        }
        if self.window.is_zero() {
            return Err(ResilienceError::InvalidPolicy(
                "window must be greater than 0".to_string(),
            ));
        }
        if self.cooldown.is_zero() {
            return Err(ResilienceError::InvalidPolicy(
                "cooldown must be greater than 0".to_string(),
            ));
        }
        if self.half_open_trials == 0 {
            return Err(ResilienceError::InvalidPolicy(
                "half_open_trials must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Point-in-time view of one provider's health
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterHealth {
    pub provider: String,
    pub circuit_state: CircuitState,
    /// Circuit not open and the latest probe (if any) succeeded
    pub available: bool,
    pub consecutive_failures: u32,
    pub window_failures: u64,
    pub window_successes: u64,
    pub last_latency_ms: Option<u64>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Success counter bucketed over the sliding window.
///
/// A bucket is dropped once its start leaves the window, so the count can
/// under-report by at most one bucket but never includes stale events.
#[derive(Debug)]
struct RollingCounter {
    window: Duration,
    bucket_width: Duration,
    buckets: VecDeque<(Instant, u64)>,
}

impl RollingCounter {
    fn new(window: Duration) -> Self {
        let bucket_width = (window / SUCCESS_BUCKETS).max(Duration::from_millis(1));
        Self {
            window,
            bucket_width,
            buckets: VecDeque::new(),
        }
    }

    fn add(&mut self, now: Instant) {
        self.prune(now);
        match self.buckets.back_mut() {
            Some((start, count)) if now.saturating_duration_since(*start) < self.bucket_width => {
                *count += 1;
            }
            _ => self.buckets.push_back((now, 1)),
        }
    }

    fn count(&mut self, now: Instant) -> u64 {
        self.prune(now);
        self.buckets.iter().map(|(_, c)| c).sum()
    }

    fn prune(&mut self, now: Instant) {
        while let Some((start, _)) = self.buckets.front() {
            if now.saturating_duration_since(*start) >= self.window {
                self.buckets.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Internal state of the circuit breaker and the provider's health record
#[derive(Debug)]
struct HealthRecord {
    state: CircuitState,
    opened_at: Option<Instant>,
    /// Trial calls admitted since entering half-open
    trials_admitted: u32,
    /// Consecutive trial successes since entering half-open
    trial_successes: u32,
    consecutive_failures: u32,
    window_failures: VecDeque<Instant>,
    window_successes: RollingCounter,
    last_latency: Option<Duration>,
    last_failure_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    last_probe_ok: Option<bool>,
}

impl HealthRecord {
    fn new(window: Duration) -> Self {
        Self {
            state: CircuitState::Closed,
            opened_at: None,
            trials_admitted: 0,
            trial_successes: 0,
            consecutive_failures: 0,
            window_failures: VecDeque::new(),
            window_successes: RollingCounter::new(window),
            last_latency: None,
            last_failure_at: None,
            last_error: None,
            last_probe_ok: None,
        }
    }

    fn prune_failures(&mut self, now: Instant, window: Duration) {
        while let Some(at) = self.window_failures.front() {
            if now.saturating_duration_since(*at) >= window {
                self.window_failures.pop_front();
            } else {
                break;
            }
        }
    }

    fn open(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.trials_admitted = 0;
        self.trial_successes = 0;
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.opened_at = None;
        self.trials_admitted = 0;
        self.trial_successes = 0;
        self.consecutive_failures = 0;
        self.window_failures.clear();
    }
}

/// Per-provider circuit breaker
///
/// Cloning is cheap and every clone shares the same state.
///
/// # Example
/// ```
/// use shield_core_resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState, Origin};
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let breaker = CircuitBreaker::new("sendgrid", CircuitBreakerConfig::default());
///
/// if breaker.allow().await {
///     // ... call the provider ...
///     breaker.record_success(Duration::from_millis(42), Origin::Call).await;
/// }
///
/// assert_eq!(breaker.state().await, CircuitState::Closed);
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    provider: Arc<str>,
    config: Arc<CircuitBreakerConfig>,
    record: Arc<Mutex<HealthRecord>>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker for `provider`
    pub fn new(provider: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let record = HealthRecord::new(config.window);
        Self {
            provider: Arc::from(provider.into()),
            config: Arc::new(config),
            record: Arc::new(Mutex::new(record)),
        }
    }

    /// Create a new circuit breaker with default configuration
    pub fn new_default(provider: impl Into<String>) -> Self {
        Self::new(provider, CircuitBreakerConfig::default())
    }

    /// Provider this breaker guards
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Policy the breaker was built with
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Get the current state of the circuit breaker
    pub async fn state(&self) -> CircuitState {
        self.record.lock().await.state
    }

    /// Get the current consecutive failure count
    pub async fn consecutive_failures(&self) -> u32 {
        self.record.lock().await.consecutive_failures
    }

    /// Decide whether a call may proceed.
    ///
    /// An open circuit whose cooldown has elapsed moves to half-open here and
    /// the caller receives the first trial slot.
    pub async fn allow(&self) -> bool {
        let mut record = self.record.lock().await;
        let now = Instant::now();

        match record.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let cooled = record
                    .opened_at
                    .map(|at| now.saturating_duration_since(at) >= self.config.cooldown)
                    .unwrap_or(true);
                if cooled {
                    record.state = CircuitState::HalfOpen;
                    record.trials_admitted = 1;
                    record.trial_successes = 0;
                    info!(provider = %self.provider, "Circuit half-open, admitting trial call");
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if record.trials_admitted < self.config.half_open_trials {
                    record.trials_admitted += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful call or probe
    pub async fn record_success(&self, latency: Duration, origin: Origin) {
        let mut record = self.record.lock().await;
        let now = Instant::now();

        record.last_latency = Some(latency);
        record.window_successes.add(now);
        if origin == Origin::Probe {
            record.last_probe_ok = Some(true);
        }

        match record.state {
            CircuitState::Closed => {
                record.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                record.consecutive_failures = 0;
                record.trial_successes += 1;
                if record.trial_successes >= self.config.half_open_trials {
                    record.close();
                    info!(provider = %self.provider, %origin, "Circuit closed after successful trials");
                }
            }
            CircuitState::Open => {
                // The cooldown still governs; a late success does not shorten it.
                debug!(provider = %self.provider, %origin, "Success recorded while circuit open");
            }
        }
    }

    /// Record a failed call or probe
    pub async fn record_failure(&self, error: &str, latency: Option<Duration>, origin: Origin) {
        let mut record = self.record.lock().await;
        let now = Instant::now();

        if latency.is_some() {
            record.last_latency = latency;
        }
        record.last_failure_at = Some(Utc::now());
        record.last_error = Some(error.to_string());
        record.consecutive_failures = record.consecutive_failures.saturating_add(1);
        if origin == Origin::Probe {
            record.last_probe_ok = Some(false);
        }

        record.window_failures.push_back(now);
        record.prune_failures(now, self.config.window);
        while record.window_failures.len() > MAX_FAILURE_SAMPLES {
            record.window_failures.pop_front();
        }

        match record.state {
            CircuitState::Closed => {
                let in_window = record.window_failures.len() as u64;
                if in_window >= u64::from(self.config.failure_threshold) {
                    record.open(now);
                    warn!(
                        provider = %self.provider,
                        %origin,
                        failures = in_window,
                        window_secs = self.config.window.as_secs(),
                        "Circuit opened"
                    );
                } else {
                    debug!(provider = %self.provider, %origin, error, "Failure recorded");
                }
            }
            CircuitState::HalfOpen => {
                record.open(now);
                warn!(provider = %self.provider, %origin, error, "Trial failed, circuit reopened");
            }
            CircuitState::Open => {
                debug!(provider = %self.provider, %origin, error, "Failure recorded while circuit open");
            }
        }
    }

    /// Point-in-time health view
    pub async fn snapshot(&self) -> AdapterHealth {
        let mut record = self.record.lock().await;
        let now = Instant::now();
        record.prune_failures(now, self.config.window);
        let window_successes = record.window_successes.count(now);

        AdapterHealth {
            provider: self.provider.to_string(),
            circuit_state: record.state,
            available: record.state != CircuitState::Open && record.last_probe_ok != Some(false),
            consecutive_failures: record.consecutive_failures,
            window_failures: record.window_failures.len() as u64,
            window_successes,
            last_latency_ms: record.last_latency.map(|d| d.as_millis() as u64),
            last_failure_at: record.last_failure_at,
            last_error: record.last_error.clone(),
        }
    }

    /// Reset the circuit breaker to closed state and clear its counters
    pub async fn reset(&self) {
        let mut record = self.record.lock().await;
        *record = HealthRecord::new(self.config.window);
        info!(provider = %self.provider, "Circuit reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(threshold: u32, window_secs: u64, cooldown_secs: u64, trials: u32) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: threshold,
            window: Duration::from_secs(window_secs),
            cooldown: Duration::from_secs(cooldown_secs),
            half_open_trials: trials,
        }
    }

    async fn fail(breaker: &CircuitBreaker, times: u32) {
        for _ in 0..times {
            breaker.record_failure("boom", None, Origin::Call).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_at_threshold_within_window() {
        let breaker = CircuitBreaker::new("sendgrid", config(5, 60, 30, 1));

        fail(&breaker, 4).await;
        assert_eq!(breaker.state().await, CircuitState::Closed);
        assert!(breaker.allow().await);

        fail(&breaker, 1).await;
        assert_eq!(breaker.state().await, CircuitState::Open);
        assert!(!breaker.allow().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stays_open_until_cooldown_regardless_of_volume() {
        let breaker = CircuitBreaker::new("paypal", config(3, 60, 30, 1));
        fail(&breaker, 3).await;

        for _ in 0..1000 {
            assert!(!breaker.allow().await);
        }

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(!breaker.allow().await);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(breaker.allow().await);
        assert_eq!(breaker.state().await, CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_failures_age_out_of_window() {
        let breaker = CircuitBreaker::new("smtp", config(3, 10, 30, 1));

        fail(&breaker, 2).await;
        tokio::time::advance(Duration::from_secs(11)).await;
        fail(&breaker, 2).await;

        // Only the two fresh failures are inside the window
        assert_eq!(breaker.state().await, CircuitState::Closed);
        assert_eq!(breaker.snapshot().await.window_failures, 2);

        fail(&breaker, 1).await;
        assert_eq!(breaker.state().await, CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens_and_restarts_cooldown() {
        let breaker = CircuitBreaker::new("stripe", config(2, 60, 10, 2));
        fail(&breaker, 2).await;

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(breaker.allow().await);
        breaker.record_failure("still down", None, Origin::Call).await;
        assert_eq!(breaker.state().await, CircuitState::Open);

        // Cooldown restarts from the reopen, not the original open
        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(!breaker.allow().await);
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(breaker.allow().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_limits_trials_and_closes_after_successes() {
        let breaker = CircuitBreaker::new("google_vision", config(1, 60, 5, 2));
        fail(&breaker, 1).await;
        tokio::time::advance(Duration::from_secs(5)).await;

        assert!(breaker.allow().await);
        assert!(breaker.allow().await);
        // Both trial slots are taken
        assert!(!breaker.allow().await);

        breaker.record_success(Duration::from_millis(20), Origin::Call).await;
        assert_eq!(breaker.state().await, CircuitState::HalfOpen);
        breaker.record_success(Duration::from_millis(20), Origin::Call).await;
        assert_eq!(breaker.state().await, CircuitState::Closed);
        assert_eq!(breaker.consecutive_failures().await, 0);
        assert!(breaker.allow().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_while_open_does_not_close() {
        let breaker = CircuitBreaker::new("paypal", config(1, 60, 30, 1));
        fail(&breaker, 1).await;

        breaker.record_success(Duration::from_millis(5), Origin::Probe).await;
        assert_eq!(breaker.state().await, CircuitState::Open);
        assert!(!breaker.allow().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_reports_probe_availability() {
        let breaker = CircuitBreaker::new("smtp", config(5, 60, 30, 1));
        assert!(breaker.snapshot().await.available);

        breaker
            .record_failure("connection refused", Some(Duration::from_millis(3)), Origin::Probe)
            .await;
        let health = breaker.snapshot().await;
        assert!(!health.available);
        assert_eq!(health.circuit_state, CircuitState::Closed);
        assert_eq!(health.consecutive_failures, 1);
        assert_eq!(health.last_error.as_deref(), Some("connection refused"));
        assert!(health.last_failure_at.is_some());

        breaker.record_success(Duration::from_millis(7), Origin::Probe).await;
        let health = breaker.snapshot().await;
        assert!(health.available);
        assert_eq!(health.last_latency_ms, Some(7));
        assert_eq!(health.window_successes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_counter_ages_out() {
        let breaker = CircuitBreaker::new("stripe", config(5, 60, 30, 1));
        for _ in 0..3 {
            breaker.record_success(Duration::from_millis(1), Origin::Call).await;
        }
        assert_eq!(breaker.snapshot().await.window_successes, 3);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(breaker.snapshot().await.window_successes, 0);
    }

    #[tokio::test]
    async fn test_reset() {
        let breaker = CircuitBreaker::new("sendgrid", config(1, 60, 30, 1));
        fail(&breaker, 1).await;

        breaker.reset().await;

        assert_eq!(breaker.state().await, CircuitState::Closed);
        assert_eq!(breaker.consecutive_failures().await, 0);
        assert!(breaker.snapshot().await.last_error.is_none());
    }

    #[test]
    fn test_config_validation() {
        assert!(CircuitBreakerConfig::default().validate().is_ok());
        assert!(config(0, 60, 30, 1).validate().is_err());
        assert!(config(5, 0, 30, 1).validate().is_err());
        assert!(config(5, 60, 0, 1).validate().is_err());
        assert!(config(5, 60, 30, 0).validate().is_err());
    }

    #[test]
    fn test_threshold_above_sample_cap_is_rejected() {
        let at_cap = config(MAX_FAILURE_SAMPLES as u32, 60, 30, 1);
        assert!(at_cap.validate().is_ok());

        let err = config(MAX_FAILURE_SAMPLES as u32 + 1, 60, 30, 1)
            .validate()
            .unwrap_err();
        assert!(matches!(err, ResilienceError::InvalidPolicy(ref msg) if msg.contains("at most 4096")));
    }
}
