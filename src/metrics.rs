//! Per-provider call metrics
//!
//! Every chain attempt is recorded twice: into in-memory counters with a
//! bounded latency reservoir (for the JSON metrics surface and percentiles),
//! and into a Prometheus registry owned by this instance (for scraping).
//! Counters only grow; they reset when the process restarts.

use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};
use serde::Serialize;
use shield_core_resilience::{Attempt, AttemptObserver, AttemptResult};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use tracing::warn;

/// Latency samples kept per provider for percentile estimates
pub const LATENCY_RESERVOIR: usize = 1024;

/// Aggregated view of one provider
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProviderMetrics {
    pub capability: String,
    /// Invocations that reached the provider (circuit-open skips excluded)
    pub calls: u64,
    /// Invocations that failed, timeouts included
    pub failures: u64,
    pub timeouts: u64,
    pub circuit_open_skips: u64,
    /// Invocations made while acting as a fallback
    pub fallback_invocations: u64,
    pub avg_latency_ms: f64,
    pub p50_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub p99_latency_ms: f64,
}

#[derive(Default)]
struct ProviderStats {
    capability: String,
    calls: u64,
    failures: u64,
    timeouts: u64,
    circuit_open_skips: u64,
    fallback_invocations: u64,
    latency_total_ms: f64,
    latency_count: u64,
    recent_ms: VecDeque<f64>,
}

impl ProviderStats {
    fn record_latency(&mut self, ms: f64) {
        self.latency_total_ms += ms;
        self.latency_count += 1;
        if self.recent_ms.len() == LATENCY_RESERVOIR {
            self.recent_ms.pop_front();
        }
        self.recent_ms.push_back(ms);
    }

    fn view(&self) -> ProviderMetrics {
        let mut sorted: Vec<f64> = self.recent_ms.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);

        ProviderMetrics {
            capability: self.capability.clone(),
            calls: self.calls,
            failures: self.failures,
            timeouts: self.timeouts,
            circuit_open_skips: self.circuit_open_skips,
            fallback_invocations: self.fallback_invocations,
            avg_latency_ms: if self.latency_count == 0 {
                0.0
            } else {
                self.latency_total_ms / self.latency_count as f64
            },
            p50_latency_ms: percentile(&sorted, 50.0),
            p95_latency_ms: percentile(&sorted, 95.0),
            p99_latency_ms: percentile(&sorted, 99.0),
        }
    }
}

/// Nearest-rank percentile over sorted samples
fn percentile(sorted: &[f64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((pct / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

struct PromMetrics {
    registry: Registry,
    calls: CounterVec,
    fallbacks: CounterVec,
    latency: HistogramVec,
}

impl PromMetrics {
    fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let calls = CounterVec::new(
            Opts::new(
                "shield_adapter_calls_total",
                "Provider attempts by outcome (success, failure, timeout, circuit_open, aborted)",
            ),
            &["capability", "provider", "result"],
        )?;
        registry.register(Box::new(calls.clone()))?;

        let fallbacks = CounterVec::new(
            Opts::new(
                "shield_fallback_invocations_total",
                "Provider invocations made as a fallback",
            ),
            &["capability", "provider"],
        )?;
        registry.register(Box::new(fallbacks.clone()))?;

        let latency = HistogramVec::new(
            HistogramOpts::new("shield_adapter_latency_seconds", "Provider call latency")
                .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
            &["capability", "provider"],
        )?;
        registry.register(Box::new(latency.clone()))?;

        Ok(Self {
            registry,
            calls,
            fallbacks,
            latency,
        })
    }
}

/// Metrics sink shared by all chains of one manager
pub struct IntegrationMetrics {
    stats: Mutex<BTreeMap<String, ProviderStats>>,
    prom: Option<PromMetrics>,
}

impl Default for IntegrationMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl IntegrationMetrics {
    pub fn new() -> Self {
        let prom = match PromMetrics::new() {
            Ok(prom) => Some(prom),
            Err(e) => {
                warn!("Prometheus metrics disabled: {}", e);
                None
            }
        };
        Self {
            stats: Mutex::new(BTreeMap::new()),
            prom,
        }
    }

    /// Make a provider appear in snapshots before its first call
    pub fn register(&self, capability: &str, provider: &str) {
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        stats
            .entry(provider.to_string())
            .or_insert_with(|| ProviderStats {
                capability: capability.to_string(),
                ..Default::default()
            });
    }

    pub fn record(&self, capability: &str, attempt: &Attempt) {
        let result_label = match attempt.result {
            AttemptResult::Succeeded => "success",
            AttemptResult::Failed { .. } => "failure",
            AttemptResult::TimedOut => "timeout",
            AttemptResult::CircuitOpen => "circuit_open",
            AttemptResult::Aborted { .. } => "aborted",
        };

        {
            let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
            let entry = stats
                .entry(attempt.provider.clone())
                .or_insert_with(|| ProviderStats {
                    capability: capability.to_string(),
                    ..Default::default()
                });

            if !attempt.invoked() {
                entry.circuit_open_skips += 1;
            } else {
                entry.calls += 1;
                if !attempt.succeeded() {
                    entry.failures += 1;
                }
                if matches!(attempt.result, AttemptResult::TimedOut) {
                    entry.timeouts += 1;
                }
                if attempt.is_fallback {
                    entry.fallback_invocations += 1;
                }
                if let Some(latency) = attempt.latency {
                    entry.record_latency(latency.as_micros() as f64 / 1000.0);
                }
            }
        }

        if let Some(prom) = &self.prom {
            prom.calls
                .with_label_values(&[capability, attempt.provider.as_str(), result_label])
                .inc();
            if attempt.invoked() {
                if attempt.is_fallback {
                    prom.fallbacks
                        .with_label_values(&[capability, attempt.provider.as_str()])
                        .inc();
                }
                if let Some(latency) = attempt.latency {
                    prom.latency
                        .with_label_values(&[capability, attempt.provider.as_str()])
                        .observe(latency.as_secs_f64());
                }
            }
        }
    }

    pub fn snapshot(&self) -> BTreeMap<String, ProviderMetrics> {
        let stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        stats
            .iter()
            .map(|(provider, s)| (provider.clone(), s.view()))
            .collect()
    }

    pub fn provider(&self, provider: &str) -> Option<ProviderMetrics> {
        let stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        stats.get(provider).map(ProviderStats::view)
    }

    /// Prometheus text exposition of this instance's registry
    pub fn metrics_text(&self) -> String {
        let Some(prom) = &self.prom else {
            return String::new();
        };
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&prom.registry.gather(), &mut buffer) {
            warn!("Failed to encode metrics: {}", e);
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl AttemptObserver for IntegrationMetrics {
    fn on_attempt(&self, capability: &str, attempt: &Attempt) {
        self.record(capability, attempt);
    }
}
