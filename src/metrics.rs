//! Observability: per-cycle ids, stage latencies (p50/p95/p99) and outcome counters.
//! Rejection and confirmation reasons are counted so thresholds can be tuned from the field.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Latency samples kept per stage.
const LATENCY_WINDOW: usize = 1024;

/// Identifiers attached to every detection cycle.
#[derive(Debug, Clone)]
pub struct CycleIds {
    pub cycle_id: String,
    pub sequence: u64,
}

impl CycleIds {
    pub fn new(sequence: u64) -> Self {
        Self {
            cycle_id: uuid::Uuid::new_v4().to_string(),
            sequence,
        }
    }
}

/// Measures one stage. Dropping without `finish` records nothing.
pub struct TimingSpan {
    stage: &'static str,
    started: Instant,
    registry: Arc<MetricsRegistry>,
}

impl TimingSpan {
    /// Record the elapsed time under the stage name and return it.
    pub fn finish(self) -> Duration {
        let elapsed = self.started.elapsed();
        self.registry.record(self.stage, elapsed);
        elapsed
    }
}

/// Most recent latencies for one stage, in microseconds.
#[derive(Default)]
struct LatencyWindow {
    samples: VecDeque<f64>,
}

impl LatencyWindow {
    fn push(&mut self, value_us: f64) {
        if self.samples.len() == LATENCY_WINDOW {
            self.samples.pop_front();
        }
        self.samples.push_back(value_us);
    }

    /// Nearest-rank percentile, `p` in 0..=100. Zero when empty.
    fn percentile(&self, p: f64) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let mut sorted: Vec<f64> = self.samples.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);
        let rank = ((p.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64).round() as usize;
        sorted[rank.min(sorted.len() - 1)]
    }

    fn summary(&self) -> LatencySummary {
        LatencySummary {
            p50_us: self.percentile(50.0),
            p95_us: self.percentile(95.0),
            p99_us: self.percentile(99.0),
            count: self.samples.len(),
        }
    }
}

#[derive(Default)]
struct Inner {
    latencies: HashMap<&'static str, LatencyWindow>,
    counters: HashMap<String, u64>,
}

/// Stage latencies and outcome counters, shared between the listener and observers.
#[derive(Default)]
pub struct MetricsRegistry {
    inner: Mutex<Inner>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start timing a stage; call `finish` on success.
    pub fn span(self: &Arc<Self>, stage: &'static str) -> TimingSpan {
        TimingSpan {
            stage,
            started: Instant::now(),
            registry: Arc::clone(self),
        }
    }

    pub fn record(&self, stage: &'static str, elapsed: Duration) {
        let value_us = elapsed.as_secs_f64() * 1_000_000.0;
        self.inner
            .lock()
            .latencies
            .entry(stage)
            .or_default()
            .push(value_us);
        tracing::trace!(stage, value_us, "latency_recorded");
    }

    /// Bump a counter, e.g. `metric_names::rejected("too_short")`.
    pub fn increment(&self, name: impl Into<String>) {
        *self.inner.lock().counters.entry(name.into()).or_insert(0) += 1;
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.inner.lock().counters.get(name).copied().unwrap_or(0)
    }

    /// Percentile (0-100) for a stage in microseconds; zero for unknown stages.
    pub fn percentile(&self, stage: &str, p: f64) -> f64 {
        self.inner
            .lock()
            .latencies
            .get(stage)
            .map_or(0.0, |window| window.percentile(p))
    }

    pub fn counters(&self) -> HashMap<String, u64> {
        self.inner.lock().counters.clone()
    }

    /// Consistent, sorted copy of everything recorded so far.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.inner.lock();
        MetricsSnapshot {
            latencies: inner
                .latencies
                .iter()
                .map(|(&stage, window)| (stage.to_string(), window.summary()))
                .collect(),
            counters: inner
                .counters
                .iter()
                .map(|(name, &count)| (name.clone(), count))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencySummary {
    pub p50_us: f64,
    pub p95_us: f64,
    pub p99_us: f64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub latencies: BTreeMap<String, LatencySummary>,
    pub counters: BTreeMap<String, u64>,
}

/// Stage and counter names.
pub mod metric_names {
    pub const CAPTURE: &str = "t_capture";
    pub const SCORING: &str = "t_scoring";
    pub const TRANSCRIPTION: &str = "t_transcription";
    pub const CYCLE: &str = "t_cycle";

    pub const CYCLES: &str = "cycles";
    pub const ACCEPTED: &str = "accepted";
    pub const FORCED_SCORING: &str = "forced_scoring";
    pub const CAPTURE_FAILURES: &str = "capture_failures";
    pub const SCORING_FAILURES: &str = "scoring_failures";
    pub const TRANSCRIPTION_FAILURES: &str = "transcription_failures";

    pub fn rejected(reason: &str) -> String {
        format!("rejected.{reason}")
    }

    pub fn confirmation(reason: &str) -> String {
        format!("confirmation.{reason}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentiles_over_recorded_samples() {
        let registry = MetricsRegistry::new();
        for v in 1..=100u64 {
            registry.record(metric_names::SCORING, Duration::from_micros(v));
        }
        assert!((registry.percentile(metric_names::SCORING, 50.0) - 51.0).abs() < 1e-6);
        assert!((registry.percentile(metric_names::SCORING, 99.0) - 99.0).abs() < 1e-6);
        assert_eq!(registry.percentile("missing", 50.0), 0.0);
        assert_eq!(registry.snapshot().latencies[metric_names::SCORING].count, 100);
    }

    #[test]
    fn window_keeps_most_recent_samples() {
        let registry = MetricsRegistry::new();
        for v in 0..(LATENCY_WINDOW as u64 + 10) {
            registry.record(metric_names::CAPTURE, Duration::from_micros(v));
        }
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.latencies[metric_names::CAPTURE].count, LATENCY_WINDOW);
        assert!(registry.percentile(metric_names::CAPTURE, 0.0) >= 10.0);
    }

    #[test]
    fn counters_accumulate() {
        let registry = MetricsRegistry::new();
        registry.increment(metric_names::rejected("too_short"));
        registry.increment(metric_names::rejected("too_short"));
        registry.increment(metric_names::ACCEPTED);
        assert_eq!(registry.counter("rejected.too_short"), 2);
        assert_eq!(registry.counter(metric_names::ACCEPTED), 1);
        assert_eq!(registry.counter("rejected.low_confidence"), 0);
        assert_eq!(registry.snapshot().counters["rejected.too_short"], 2);
    }

    #[test]
    fn spans_record_only_on_finish() {
        let registry = Arc::new(MetricsRegistry::new());
        drop(registry.span(metric_names::SCORING));
        registry.span(metric_names::CYCLE).finish();
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.latencies[metric_names::CYCLE].count, 1);
        assert!(!snapshot.latencies.contains_key(metric_names::SCORING));
    }
}
