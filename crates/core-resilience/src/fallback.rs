//! Fallback Orchestrator: ordered provider chains
//!
//! A [`FallbackChain`] holds one primary provider and an ordered list of
//! fallbacks for the same capability. [`FallbackChain::execute`] walks the
//! chain strictly in declared order and stops at the first success:
//!
//! ```text
//!  primary ──allow?──no──────────────┐
//!     │ yes                           │  (circuit-open skip)
//!     ▼                               ▼
//!  invoke (bounded by call_timeout) ─fail─> fallback #1 ─> ... ─> AllProvidersUnavailable
//!     │ ok
//!     ▼
//!  Served { value, outcome }
//! ```
//!
//! Attempts never run in parallel. Each adapter call runs in its own task so
//! that a cancelled caller does not abort a provider call that is already on
//! the wire: the task finishes in the background and still reports its
//! outcome to the breaker, but no further fallbacks are tried.

use crate::circuit_breaker::{CircuitBreaker, Origin};
use crate::error::{ChainError, FailureKind, ProviderFailure, ResilienceError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// One provider in a chain: the adapter and the breaker guarding it
pub struct ChainLink<A: ?Sized> {
    adapter: Arc<A>,
    breaker: CircuitBreaker,
}

impl<A: ?Sized> ChainLink<A> {
    /// The provider id is taken from the breaker
    pub fn new(adapter: Arc<A>, breaker: CircuitBreaker) -> Self {
        Self { adapter, breaker }
    }

    pub fn provider(&self) -> &str {
        self.breaker.provider()
    }

    pub fn adapter(&self) -> &Arc<A> {
        &self.adapter
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }
}

impl<A: ?Sized> Clone for ChainLink<A> {
    fn clone(&self) -> Self {
        Self {
            adapter: self.adapter.clone(),
            breaker: self.breaker.clone(),
        }
    }
}

/// How a single attempt ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum AttemptResult {
    Succeeded,
    Failed { message: String },
    TimedOut,
    /// Skipped because the breaker rejected the call; the adapter was not invoked
    CircuitOpen,
    Aborted { message: String },
}

/// Record of one provider attempt within a chain execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    pub provider: String,
    pub is_fallback: bool,
    #[serde(flatten)]
    pub result: AttemptResult,
    #[serde(with = "duration_ms_opt")]
    pub latency: Option<Duration>,
}

impl Attempt {
    /// Whether the adapter was actually invoked
    pub fn invoked(&self) -> bool {
        !matches!(self.result, AttemptResult::CircuitOpen)
    }

    pub fn succeeded(&self) -> bool {
        matches!(self.result, AttemptResult::Succeeded)
    }
}

/// Provenance of one orchestrated call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallOutcome {
    pub capability: String,
    /// Provider that served the request, if any did
    pub provider: Option<String>,
    pub success: bool,
    pub used_fallback: bool,
    #[serde(with = "duration_ms")]
    pub latency: Duration,
    pub error: Option<String>,
    pub attempts: Vec<Attempt>,
}

/// A successful chain result together with its provenance
#[derive(Debug, Clone)]
pub struct Served<T> {
    pub value: T,
    pub outcome: CallOutcome,
}

impl<T> Served<T> {
    /// Provider that produced `value`
    pub fn provider(&self) -> &str {
        self.outcome.provider.as_deref().unwrap_or_default()
    }

    pub fn used_fallback(&self) -> bool {
        self.outcome.used_fallback
    }
}

/// Receives every attempt as it completes, e.g. for metrics
pub trait AttemptObserver: Send + Sync {
    fn on_attempt(&self, capability: &str, attempt: &Attempt);
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl AttemptObserver for NoopObserver {
    fn on_attempt(&self, _capability: &str, _attempt: &Attempt) {}
}

enum Step<T> {
    Served(T, Attempt),
    Failed(Attempt, ProviderFailure),
    /// Carries the provider whose call was left running, if any
    Cancelled(Option<String>),
}

/// Ordered primary + fallback providers for one capability
pub struct FallbackChain<A: ?Sized> {
    capability: String,
    links: Vec<ChainLink<A>>,
    call_timeout: Duration,
    observer: Arc<dyn AttemptObserver>,
}

impl<A: ?Sized> fmt::Debug for FallbackChain<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let providers: Vec<&str> = self.links.iter().map(ChainLink::provider).collect();
        f.debug_struct("FallbackChain")
            .field("capability", &self.capability)
            .field("providers", &providers)
            .field("call_timeout", &self.call_timeout)
            .finish()
    }
}

impl<A: ?Sized + Send + Sync + 'static> FallbackChain<A> {
    /// Build a chain. Providers must be unique and the timeout non-zero.
    pub fn new(
        capability: impl Into<String>,
        primary: ChainLink<A>,
        fallbacks: Vec<ChainLink<A>>,
        call_timeout: Duration,
    ) -> Result<Self, ResilienceError> {
        let capability = capability.into();
        if call_timeout.is_zero() {
            return Err(ResilienceError::InvalidPolicy(format!(
                "call_timeout for '{}' must be greater than 0",
                capability
            )));
        }

        let mut links = Vec::with_capacity(fallbacks.len() + 1);
        links.push(primary);
        links.extend(fallbacks);

        let mut seen = HashSet::new();
        for link in &links {
            if !seen.insert(link.provider().to_string()) {
                return Err(ResilienceError::DuplicateProvider {
                    capability,
                    provider: link.provider().to_string(),
                });
            }
        }

        Ok(Self {
            capability,
            links,
            call_timeout,
            observer: Arc::new(NoopObserver),
        })
    }

    /// Attach an observer notified after every attempt
    pub fn with_observer(mut self, observer: Arc<dyn AttemptObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn capability(&self) -> &str {
        &self.capability
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    pub fn primary(&self) -> &ChainLink<A> {
        &self.links[0]
    }

    /// Primary first, then fallbacks in declared order
    pub fn links(&self) -> &[ChainLink<A>] {
        &self.links
    }

    pub fn providers(&self) -> Vec<&str> {
        self.links.iter().map(ChainLink::provider).collect()
    }

    /// Run `op` against the primary, then each fallback in order, until one succeeds.
    pub async fn execute<T, E, F, Fut>(
        &self,
        cancel: &CancellationToken,
        op: F,
    ) -> Result<Served<T>, ChainError>
    where
        F: Fn(Arc<A>) -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let started = Instant::now();
        let mut attempts = Vec::with_capacity(self.links.len());
        let mut failures = Vec::with_capacity(self.links.len());

        for (index, link) in self.links.iter().enumerate() {
            let is_fallback = index > 0;
            match self.attempt(link, is_fallback, cancel, &op).await {
                Step::Served(value, attempt) => {
                    attempts.push(attempt);
                    if is_fallback {
                        info!(
                            capability = %self.capability,
                            provider = link.provider(),
                            primary = self.primary().provider(),
                            "Served by fallback provider"
                        );
                    }
                    return Ok(Served {
                        value,
                        outcome: CallOutcome {
                            capability: self.capability.clone(),
                            provider: Some(link.provider().to_string()),
                            success: true,
                            used_fallback: is_fallback,
                            latency: started.elapsed(),
                            error: None,
                            attempts,
                        },
                    });
                }
                Step::Failed(attempt, failure) => {
                    attempts.push(attempt);
                    failures.push(failure);
                }
                Step::Cancelled(in_flight) => {
                    return Err(ChainError::Cancelled {
                        capability: self.capability.clone(),
                        in_flight,
                    });
                }
            }
        }

        error!(
            capability = %self.capability,
            attempted = failures.len(),
            "All providers unavailable"
        );
        Err(ChainError::AllProvidersUnavailable {
            capability: self.capability.clone(),
            failures,
        })
    }

    /// Run `op` against one named provider only, with the same breaker,
    /// timeout and observer treatment as [`execute`](Self::execute).
    pub async fn execute_on<T, E, F, Fut>(
        &self,
        provider: &str,
        cancel: &CancellationToken,
        op: F,
    ) -> Result<Served<T>, ChainError>
    where
        F: Fn(Arc<A>) -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let link = self
            .links
            .iter()
            .find(|link| link.provider() == provider)
            .ok_or_else(|| ResilienceError::UnknownProvider {
                capability: self.capability.clone(),
                provider: provider.to_string(),
            })?;

        let started = Instant::now();
        match self.attempt(link, false, cancel, &op).await {
            Step::Served(value, attempt) => Ok(Served {
                value,
                outcome: CallOutcome {
                    capability: self.capability.clone(),
                    provider: Some(link.provider().to_string()),
                    success: true,
                    used_fallback: false,
                    latency: started.elapsed(),
                    error: None,
                    attempts: vec![attempt],
                },
            }),
            Step::Failed(_, failure) => Err(ChainError::AllProvidersUnavailable {
                capability: self.capability.clone(),
                failures: vec![failure],
            }),
            Step::Cancelled(in_flight) => Err(ChainError::Cancelled {
                capability: self.capability.clone(),
                in_flight,
            }),
        }
    }

    async fn attempt<T, E, F, Fut>(
        &self,
        link: &ChainLink<A>,
        is_fallback: bool,
        cancel: &CancellationToken,
        op: &F,
    ) -> Step<T>
    where
        F: Fn(Arc<A>) -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        if cancel.is_cancelled() {
            return Step::Cancelled(None);
        }

        let provider = link.provider().to_string();

        if !link.breaker().allow().await {
            debug!(capability = %self.capability, provider = %provider, "Circuit open, skipping provider");
            let attempt = Attempt {
                provider: provider.clone(),
                is_fallback,
                result: AttemptResult::CircuitOpen,
                latency: None,
            };
            self.observer.on_attempt(&self.capability, &attempt);
            let failure = ProviderFailure {
                provider,
                kind: FailureKind::CircuitOpen,
                message: "circuit breaker open; provider not invoked".to_string(),
            };
            return Step::Failed(attempt, failure);
        }

        let breaker = link.breaker().clone();
        let call_timeout = self.call_timeout;
        let observer = self.observer.clone();
        let capability = self.capability.clone();
        let call = op(link.adapter().clone());
        let started = Instant::now();
        let task_provider = provider.clone();

        // Breaker and observer are updated inside the task so a detached call
        // still lands in both after the caller cancels.
        let mut task = tokio::spawn(async move {
            let result = tokio::time::timeout(call_timeout, call).await;
            let elapsed = started.elapsed();
            let (value, result) = match result {
                Ok(Ok(value)) => {
                    breaker.record_success(elapsed, Origin::Call).await;
                    (Ok(value), AttemptResult::Succeeded)
                }
                Ok(Err(e)) => {
                    let message = e.to_string();
                    breaker
                        .record_failure(&message, Some(elapsed), Origin::Call)
                        .await;
                    (
                        Err((FailureKind::Error, message.clone())),
                        AttemptResult::Failed { message },
                    )
                }
                Err(_) => {
                    let message = format!("timed out after {:?}", call_timeout);
                    breaker
                        .record_failure(&message, Some(elapsed), Origin::Call)
                        .await;
                    (Err((FailureKind::Timeout, message)), AttemptResult::TimedOut)
                }
            };
            let attempt = Attempt {
                provider: task_provider,
                is_fallback,
                result,
                latency: Some(elapsed),
            };
            observer.on_attempt(&capability, &attempt);
            (value, attempt)
        });

        let joined = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                // Dropping the handle detaches the task; the provider call completes on its own.
                info!(
                    capability = %self.capability,
                    provider = %provider,
                    "Caller cancelled; in-flight call left to finish in background"
                );
                return Step::Cancelled(Some(provider));
            }
            joined = &mut task => joined,
        };

        let (attempt, failure) = match joined {
            Ok((Ok(value), attempt)) => {
                debug!(capability = %self.capability, provider = %attempt.provider, latency = ?attempt.latency, "Provider call succeeded");
                return Step::Served(value, attempt);
            }
            Ok((Err(failure), attempt)) => (attempt, failure),
            Err(join_error) => {
                let latency = started.elapsed();
                let message = format!("adapter task aborted: {}", join_error);
                link.breaker()
                    .record_failure(&message, Some(latency), Origin::Call)
                    .await;
                let attempt = Attempt {
                    provider: provider.clone(),
                    is_fallback,
                    result: AttemptResult::Aborted {
                        message: message.clone(),
                    },
                    latency: Some(latency),
                };
                self.observer.on_attempt(&self.capability, &attempt);
                (attempt, (FailureKind::Aborted, message))
            }
        };

        warn!(
            capability = %self.capability,
            provider = %provider,
            kind = %failure.0,
            error = %failure.1,
            "Provider call failed"
        );

        Step::Failed(
            attempt,
            ProviderFailure {
                provider,
                kind: failure.0,
                message: failure.1,
            },
        )
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod duration_ms_opt {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::{CircuitBreakerConfig, CircuitState};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Clone, Copy)]
    enum Behavior {
        Succeed,
        Fail,
        Hang,
    }

    struct FakeProvider {
        name: &'static str,
        behavior: Behavior,
        calls: AtomicUsize,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl FakeProvider {
        async fn call(self: Arc<Self>) -> Result<String, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.log.lock().unwrap().push(self.name);
            match self.behavior {
                Behavior::Succeed => Ok(format!("served-by-{}", self.name)),
                Behavior::Fail => Err(format!("{} exploded", self.name)),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok("too late".to_string())
                }
            }
        }
    }

    fn link(
        name: &'static str,
        behavior: Behavior,
        log: &Arc<Mutex<Vec<&'static str>>>,
    ) -> ChainLink<FakeProvider> {
        let breaker = CircuitBreaker::new(
            name,
            CircuitBreakerConfig {
                failure_threshold: 3,
                ..Default::default()
            },
        );
        ChainLink::new(
            Arc::new(FakeProvider {
                name,
                behavior,
                calls: AtomicUsize::new(0),
                log: log.clone(),
            }),
            breaker,
        )
    }

    fn chain(links: Vec<ChainLink<FakeProvider>>) -> FallbackChain<FakeProvider> {
        let mut links = links.into_iter();
        let primary = links.next().unwrap();
        FallbackChain::new("test", primary, links.collect(), Duration::from_secs(5)).unwrap()
    }

    #[derive(Default)]
    struct RecordingObserver {
        seen: Mutex<Vec<(String, bool, bool)>>,
    }

    impl AttemptObserver for RecordingObserver {
        fn on_attempt(&self, _capability: &str, attempt: &Attempt) {
            self.seen.lock().unwrap().push((
                attempt.provider.clone(),
                attempt.is_fallback,
                attempt.succeeded(),
            ));
        }
    }

    #[test]
    fn test_debug_lists_providers_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = chain(vec![
            link("p", Behavior::Succeed, &log),
            link("f1", Behavior::Succeed, &log),
        ]);

        let text = format!("{:?}", chain);
        assert!(text.starts_with("FallbackChain"));
        assert!(text.contains(r#"providers: ["p", "f1"]"#));
    }

    #[tokio::test]
    async fn test_primary_success_is_not_fallback() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = chain(vec![
            link("p", Behavior::Succeed, &log),
            link("f1", Behavior::Succeed, &log),
        ]);

        let served = chain
            .execute(&CancellationToken::new(), |p| p.call())
            .await
            .unwrap();

        assert_eq!(served.value, "served-by-p");
        assert_eq!(served.provider(), "p");
        assert!(!served.used_fallback());
        assert_eq!(*log.lock().unwrap(), vec!["p"]);
    }

    #[tokio::test]
    async fn test_fallbacks_tried_in_declared_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let observer = Arc::new(RecordingObserver::default());
        let chain = chain(vec![
            link("p", Behavior::Fail, &log),
            link("f1", Behavior::Fail, &log),
            link("f2", Behavior::Succeed, &log),
        ])
        .with_observer(observer.clone());

        let served = chain
            .execute(&CancellationToken::new(), |p| p.call())
            .await
            .unwrap();

        assert_eq!(served.provider(), "f2");
        assert!(served.used_fallback());
        assert_eq!(*log.lock().unwrap(), vec!["p", "f1", "f2"]);
        assert_eq!(served.outcome.attempts.len(), 3);
        assert_eq!(
            *observer.seen.lock().unwrap(),
            vec![
                ("p".to_string(), false, false),
                ("f1".to_string(), true, false),
                ("f2".to_string(), true, true),
            ]
        );
    }

    #[tokio::test]
    async fn test_all_fail_reports_every_provider() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = chain(vec![
            link("p", Behavior::Fail, &log),
            link("f1", Behavior::Fail, &log),
            link("f2", Behavior::Fail, &log),
        ]);

        let err = chain
            .execute(&CancellationToken::new(), |p| p.call())
            .await
            .unwrap_err();

        match err {
            ChainError::AllProvidersUnavailable { failures, .. } => {
                let providers: Vec<_> = failures.iter().map(|f| f.provider.as_str()).collect();
                assert_eq!(providers, vec!["p", "f1", "f2"]);
                assert!(failures.iter().all(|f| f.kind == FailureKind::Error));
                assert_eq!(failures[1].message, "f1 exploded");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_open_circuit_skips_without_invoking() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let primary = link("p", Behavior::Succeed, &log);
        for _ in 0..3 {
            primary
                .breaker()
                .record_failure("seeded", None, Origin::Call)
                .await;
        }
        assert_eq!(primary.breaker().state().await, CircuitState::Open);
        let adapter = primary.adapter().clone();

        let chain = chain(vec![primary, link("f1", Behavior::Succeed, &log)]);
        let served = chain
            .execute(&CancellationToken::new(), |p| p.call())
            .await
            .unwrap();

        assert_eq!(served.provider(), "f1");
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 0);
        assert_eq!(served.outcome.attempts[0].result, AttemptResult::CircuitOpen);
        // A skip is not counted as another failure against the provider
        assert_eq!(chain.primary().breaker().consecutive_failures().await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_failure() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = chain(vec![
            link("p", Behavior::Hang, &log),
            link("f1", Behavior::Succeed, &log),
        ]);

        let served = chain
            .execute(&CancellationToken::new(), |p| p.call())
            .await
            .unwrap();

        assert_eq!(served.provider(), "f1");
        assert_eq!(served.outcome.attempts[0].result, AttemptResult::TimedOut);
        assert_eq!(chain.primary().breaker().consecutive_failures().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_fallback_progression() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = chain(vec![
            link("p", Behavior::Hang, &log),
            link("f1", Behavior::Succeed, &log),
        ]);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let err = chain.execute(&cancel, |p| p.call()).await.unwrap_err();
        assert_eq!(
            err,
            ChainError::Cancelled {
                capability: "test".to_string(),
                in_flight: Some("p".to_string()),
            }
        );
        assert_eq!(*log.lock().unwrap(), vec!["p"]);

        // The detached call still reaches its timeout and is recorded
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(chain.primary().breaker().consecutive_failures().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_detached_call_still_reaches_observer() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let observer = Arc::new(RecordingObserver::default());
        let chain = chain(vec![
            link("p", Behavior::Hang, &log),
            link("f1", Behavior::Succeed, &log),
        ])
        .with_observer(observer.clone());
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let err = chain.execute(&cancel, |p| p.call()).await.unwrap_err();
        assert!(matches!(err, ChainError::Cancelled { in_flight: Some(_), .. }));
        assert!(observer.seen.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(
            *observer.seen.lock().unwrap(),
            vec![("p".to_string(), false, false)]
        );
        // The fallback was never attempted
        assert_eq!(*log.lock().unwrap(), vec!["p"]);
    }

    #[tokio::test]
    async fn test_pre_cancelled_call_invokes_nothing() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = chain(vec![link("p", Behavior::Succeed, &log)]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = chain.execute(&cancel, |p| p.call()).await.unwrap_err();
        assert!(matches!(err, ChainError::Cancelled { in_flight: None, .. }));
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_execute_on_targets_single_provider() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = chain(vec![
            link("p", Behavior::Succeed, &log),
            link("f1", Behavior::Fail, &log),
        ]);

        let err = chain
            .execute_on("f1", &CancellationToken::new(), |p| p.call())
            .await
            .unwrap_err();
        match err {
            ChainError::AllProvidersUnavailable { failures, .. } => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].provider, "f1");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        // The primary was never touched
        assert_eq!(*log.lock().unwrap(), vec!["f1"]);

        let unknown = chain
            .execute_on("nope", &CancellationToken::new(), |p| p.call())
            .await
            .unwrap_err();
        assert!(matches!(
            unknown,
            ChainError::Resilience(ResilienceError::UnknownProvider { .. })
        ));
    }

    #[test]
    fn test_duplicate_providers_rejected() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let result = FallbackChain::new(
            "test",
            link("p", Behavior::Succeed, &log),
            vec![link("p", Behavior::Succeed, &log)],
            Duration::from_secs(1),
        );
        assert!(matches!(
            result,
            Err(ResilienceError::DuplicateProvider { .. })
        ));
    }

    #[test]
    fn test_outcome_serializes_latency_in_ms() {
        let outcome = CallOutcome {
            capability: "email".to_string(),
            provider: Some("smtp".to_string()),
            success: true,
            used_fallback: true,
            latency: Duration::from_millis(250),
            error: None,
            attempts: vec![Attempt {
                provider: "sendgrid".to_string(),
                is_fallback: false,
                result: AttemptResult::CircuitOpen,
                latency: None,
            }],
        };

        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["latency"], 250);
        assert_eq!(json["attempts"][0]["result"], "circuit_open");
    }
}
