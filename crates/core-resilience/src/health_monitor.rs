//! Health Monitor: periodic provider probing
//!
//! Unlike production traffic, probes are issued on a fixed interval whether or
//! not anyone is calling the provider. They bypass [`CircuitBreaker::allow`]
//! but their outcome is fed back into the breaker so its state tracks real
//! availability.
//!
//! # Example
//!
//! ```
//! use futures::FutureExt;
//! use shield_core_resilience::{CircuitBreaker, HealthMonitor, ProbeTarget};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let breaker = CircuitBreaker::new_default("smtp");
//! let target = ProbeTarget::new(breaker, Arc::new(|| async { Ok::<(), String>(()) }.boxed()));
//!
//! let monitor = HealthMonitor::new(vec![target], Duration::from_secs(5));
//! monitor.probe_once().await;
//!
//! let snapshot = monitor.snapshot().await;
//! assert!(snapshot["smtp"].available);
//! # }
//! ```

use crate::circuit_breaker::{AdapterHealth, CircuitBreaker, Origin};
use crate::error::ResilienceError;
use futures::future::{join_all, BoxFuture};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Lightweight no-op call used to sample a provider's availability
pub type ProbeFn = Arc<dyn Fn() -> BoxFuture<'static, Result<(), String>> + Send + Sync>;

/// One provider registered with the monitor
#[derive(Clone)]
pub struct ProbeTarget {
    breaker: CircuitBreaker,
    probe: ProbeFn,
}

impl ProbeTarget {
    pub fn new(breaker: CircuitBreaker, probe: ProbeFn) -> Self {
        Self { breaker, probe }
    }

    pub fn provider(&self) -> &str {
        self.breaker.provider()
    }
}

/// Result of a single probe round
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbeRound {
    pub succeeded: usize,
    pub failed: usize,
}

struct RunningLoop {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Periodic prober over a fixed set of providers
pub struct HealthMonitor {
    targets: Arc<Vec<ProbeTarget>>,
    probe_timeout: Duration,
    rounds: Arc<AtomicU64>,
    running: Mutex<Option<RunningLoop>>,
}

impl HealthMonitor {
    /// Create a monitor; nothing is probed until [`start`](Self::start) or
    /// [`probe_once`](Self::probe_once) is called.
    pub fn new(targets: Vec<ProbeTarget>, probe_timeout: Duration) -> Self {
        Self {
            targets: Arc::new(targets),
            probe_timeout,
            rounds: Arc::new(AtomicU64::new(0)),
            running: Mutex::new(None),
        }
    }

    /// Begin periodic probing.
    ///
    /// Returns `Ok(false)` if a probe loop is already running; no second loop
    /// is created.
    pub fn start(&self, interval: Duration) -> Result<bool, ResilienceError> {
        if interval.is_zero() {
            return Err(ResilienceError::InvalidPolicy(
                "probe interval must be greater than 0".to_string(),
            ));
        }

        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = running.as_ref() {
            if !existing.handle.is_finished() {
                debug!("Health monitor already running");
                return Ok(false);
            }
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(probe_loop(
            self.targets.clone(),
            self.probe_timeout,
            self.rounds.clone(),
            interval,
            cancel.clone(),
        ));

        info!(
            targets = self.targets.len(),
            interval_secs = interval.as_secs_f64(),
            "Health monitor started"
        );
        *running = Some(RunningLoop { cancel, handle });
        Ok(true)
    }

    /// Halt probing and wait for the loop to exit
    pub async fn stop(&self) {
        let running = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(RunningLoop { cancel, handle }) = running {
            cancel.cancel();
            if let Err(e) = handle.await {
                warn!("Health monitor loop ended abnormally: {}", e);
            }
            info!("Health monitor stopped");
        }
    }

    /// Whether a probe loop is currently active
    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|r| !r.handle.is_finished())
            .unwrap_or(false)
    }

    /// Run one probe round immediately
    pub async fn probe_once(&self) -> ProbeRound {
        run_round(&self.targets, self.probe_timeout, &self.rounds).await
    }

    /// Completed probe rounds since construction
    pub fn rounds(&self) -> u64 {
        self.rounds.load(Ordering::Relaxed)
    }

    /// Point-in-time health of every registered provider
    pub async fn snapshot(&self) -> BTreeMap<String, AdapterHealth> {
        let mut out = BTreeMap::new();
        for target in self.targets.iter() {
            out.insert(target.provider().to_string(), target.breaker.snapshot().await);
        }
        out
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        let running = self
            .running
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(running) = running {
            running.cancel.cancel();
        }
    }
}

async fn probe_loop(
    targets: Arc<Vec<ProbeTarget>>,
    probe_timeout: Duration,
    rounds: Arc<AtomicU64>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            round = run_round(&targets, probe_timeout, &rounds) => {
                if round.failed > 0 {
                    warn!(failed = round.failed, succeeded = round.succeeded, "Probe round completed with failures");
                } else {
                    debug!(succeeded = round.succeeded, "Probe round completed");
                }
            }
        }
    }
}

async fn run_round(
    targets: &[ProbeTarget],
    probe_timeout: Duration,
    rounds: &AtomicU64,
) -> ProbeRound {
    let results = join_all(targets.iter().map(|target| probe_target(target, probe_timeout))).await;
    rounds.fetch_add(1, Ordering::Relaxed);

    let succeeded = results.iter().filter(|ok| **ok).count();
    ProbeRound {
        succeeded,
        failed: results.len() - succeeded,
    }
}

async fn probe_target(target: &ProbeTarget, probe_timeout: Duration) -> bool {
    let started = Instant::now();
    let outcome = tokio::time::timeout(probe_timeout, (target.probe)()).await;
    let elapsed = started.elapsed();

    match outcome {
        Ok(Ok(())) => {
            target.breaker.record_success(elapsed, Origin::Probe).await;
            true
        }
        Ok(Err(e)) => {
            warn!(provider = target.provider(), origin = "probe", error = %e, "Probe failed");
            target
                .breaker
                .record_failure(&e, Some(elapsed), Origin::Probe)
                .await;
            false
        }
        Err(_) => {
            let message = format!("probe timed out after {:?}", probe_timeout);
            warn!(provider = target.provider(), origin = "probe", "{}", message);
            target
                .breaker
                .record_failure(&message, Some(elapsed), Origin::Probe)
                .await;
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::{CircuitBreakerConfig, CircuitState};
    use futures::FutureExt;
    use std::sync::atomic::AtomicUsize;

    fn counting_target(provider: &str, calls: Arc<AtomicUsize>, healthy: bool) -> ProbeTarget {
        let breaker = CircuitBreaker::new(
            provider,
            CircuitBreakerConfig {
                failure_threshold: 2,
                ..Default::default()
            },
        );
        ProbeTarget::new(
            breaker,
            Arc::new(move || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    if healthy {
                        Ok(())
                    } else {
                        Err("connection refused".to_string())
                    }
                }
                .boxed()
            }),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_idempotent() {
        let calls = Arc::new(AtomicUsize::new(0));
        let monitor = HealthMonitor::new(
            vec![counting_target("smtp", calls.clone(), true)],
            Duration::from_secs(1),
        );

        assert!(monitor.start(Duration::from_secs(10)).unwrap());
        assert!(!monitor.start(Duration::from_secs(10)).unwrap());
        assert!(monitor.is_running());

        // Ticks at 0s, 10s, 20s and 30s
        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(monitor.rounds(), 4);

        monitor.stop().await;
        assert!(!monitor.is_running());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_stop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let monitor = HealthMonitor::new(
            vec![counting_target("stripe", calls.clone(), true)],
            Duration::from_secs(1),
        );

        assert!(monitor.start(Duration::from_secs(10)).unwrap());
        monitor.stop().await;
        assert!(monitor.start(Duration::from_secs(10)).unwrap());
        monitor.stop().await;
    }

    #[tokio::test]
    async fn test_zero_interval_rejected() {
        let monitor = HealthMonitor::new(Vec::new(), Duration::from_secs(1));
        assert!(monitor.start(Duration::ZERO).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_failures_feed_breaker() {
        let calls = Arc::new(AtomicUsize::new(0));
        let monitor = HealthMonitor::new(
            vec![counting_target("sendgrid", calls.clone(), false)],
            Duration::from_secs(1),
        );

        let round = monitor.probe_once().await;
        assert_eq!(round, ProbeRound { succeeded: 0, failed: 1 });

        let snapshot = monitor.snapshot().await;
        assert!(!snapshot["sendgrid"].available);
        assert_eq!(snapshot["sendgrid"].circuit_state, CircuitState::Closed);

        monitor.probe_once().await;
        let snapshot = monitor.snapshot().await;
        assert_eq!(snapshot["sendgrid"].circuit_state, CircuitState::Open);
        assert_eq!(snapshot["sendgrid"].consecutive_failures, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_probe_times_out() {
        let breaker = CircuitBreaker::new_default("google_vision");
        let target = ProbeTarget::new(
            breaker,
            Arc::new(|| {
                async {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok::<(), String>(())
                }
                .boxed()
            }),
        );
        let monitor = HealthMonitor::new(vec![target], Duration::from_secs(2));

        let round = monitor.probe_once().await;
        assert_eq!(round.failed, 1);

        let snapshot = monitor.snapshot().await;
        let health = &snapshot["google_vision"];
        assert!(!health.available);
        assert!(health
            .last_error
            .as_deref()
            .unwrap_or_default()
            .contains("timed out"));
    }
}
