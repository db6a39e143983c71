//! Metrics collection and reporting

use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

/// Observations kept per histogram for percentile estimates
const HISTOGRAM_WINDOW: usize = 10_000;

/// Metric names recorded by the pipeline
pub mod names {
    pub const TRANSACTIONS_PROCESSED: &str = "transactions_processed";
    pub const TRANSACTIONS_FLAGGED: &str = "transactions_flagged";
    pub const IDEMPOTENT_REPLAYS: &str = "idempotent_replays";
    pub const SCORER_FALLBACKS: &str = "scorer_fallbacks";
    pub const NOTIFICATION_FAILURES: &str = "notification_failures";
    pub const FEEDBACK_PROCESSED: &str = "feedback_processed";
    pub const FEEDBACK_RETRIES: &str = "feedback_retries";
    pub const FEEDBACK_DEAD_LETTERED: &str = "feedback_dead_lettered";
    pub const ALERTS_CREATED: &str = "alerts_created";
    pub const INTAKE: &str = "intake";
}

/// Counter metric
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.add(1);
    }

    pub fn add(&self, value: u64) {
        self.value.fetch_add(value, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.value.store(0, Ordering::Relaxed);
    }
}

#[derive(Debug, Default)]
struct HistogramState {
    window: VecDeque<f64>,
    count: u64,
    sum: f64,
}

/// Histogram metric for tracking distributions.
///
/// Count and sum cover every observation; percentiles are computed over the
/// most recent observations only.
#[derive(Debug, Default)]
pub struct Histogram {
    state: Mutex<HistogramState>,
}

/// Point-in-time view of a histogram
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramSummary {
    pub count: u64,
    pub sum: f64,
    pub avg: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

impl Histogram {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HistogramState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn observe(&self, value: f64) {
        let mut state = self.lock();
        state.count += 1;
        state.sum += value;
        state.window.push_back(value);
        if state.window.len() > HISTOGRAM_WINDOW {
            state.window.pop_front();
        }
    }

    /// Observe a duration in milliseconds
    pub fn observe_duration(&self, duration: Duration) {
        self.observe(duration.as_secs_f64() * 1000.0);
    }

    pub fn count(&self) -> u64 {
        self.lock().count
    }

    pub fn sum(&self) -> f64 {
        self.lock().sum
    }

    pub fn avg(&self) -> f64 {
        let state = self.lock();
        if state.count == 0 {
            0.0
        } else {
            state.sum / state.count as f64
        }
    }

    /// Get percentile (0-100)
    pub fn percentile(&self, p: f64) -> f64 {
        let mut values: Vec<f64> = self.lock().window.iter().copied().collect();
        percentile_of(&mut values, p)
    }

    pub fn summary(&self) -> HistogramSummary {
        let (count, sum, mut values) = {
            let state = self.lock();
            (state.count, state.sum, state.window.iter().copied().collect::<Vec<_>>())
        };
        HistogramSummary {
            count,
            sum,
            avg: if count == 0 { 0.0 } else { sum / count as f64 },
            p50: percentile_of(&mut values, 50.0),
            p95: percentile_of(&mut values, 95.0),
            p99: percentile_of(&mut values, 99.0),
        }
    }

    pub fn reset(&self) {
        *self.lock() = HistogramState::default();
    }
}

fn percentile_of(values: &mut [f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let index = ((p / 100.0) * (values.len() - 1) as f64).round() as usize;
    values[index.min(values.len() - 1)]
}

/// Metrics trait
pub trait Metrics: Send + Sync {
    fn counter(&self, name: &str) -> Arc<Counter>;

    fn histogram(&self, name: &str) -> Arc<Histogram>;

    /// Record an operation latency under `<operation>_duration`
    fn record_duration(&self, operation: &str, duration: Duration) {
        self.histogram(&format!("{}_duration", operation))
            .observe_duration(duration);
    }
}

/// Serializable view of every registered metric
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub counters: BTreeMap<String, u64>,
    pub histograms: BTreeMap<String, HistogramSummary>,
}

/// Metrics collector
#[derive(Default)]
pub struct MetricsCollector {
    counters: RwLock<HashMap<String, Arc<Counter>>>,
    histograms: RwLock<HashMap<String, Arc<Histogram>>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collector with the pipeline's metrics pre-registered so a snapshot
    /// lists them even before the first event
    pub fn with_defaults() -> Self {
        let collector = Self::new();
        for name in [
            names::TRANSACTIONS_PROCESSED,
            names::TRANSACTIONS_FLAGGED,
            names::IDEMPOTENT_REPLAYS,
            names::SCORER_FALLBACKS,
            names::NOTIFICATION_FAILURES,
            names::FEEDBACK_PROCESSED,
            names::FEEDBACK_RETRIES,
            names::FEEDBACK_DEAD_LETTERED,
            names::ALERTS_CREATED,
        ] {
            collector.counter(name);
        }
        collector.histogram(&format!("{}_duration", names::INTAKE));
        collector
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let counters = self
            .counters
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(name, counter)| (name.clone(), counter.get()))
            .collect();
        let histograms = self
            .histograms
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(name, histogram)| (name.clone(), histogram.summary()))
            .collect();

        MetricsSnapshot {
            counters,
            histograms,
        }
    }

    pub fn reset_all(&self) {
        for counter in self.counters.read().unwrap_or_else(|e| e.into_inner()).values() {
            counter.reset();
        }
        for histogram in self.histograms.read().unwrap_or_else(|e| e.into_inner()).values() {
            histogram.reset();
        }
    }
}

impl Metrics for MetricsCollector {
    fn counter(&self, name: &str) -> Arc<Counter> {
        if let Some(counter) = self
            .counters
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
        {
            return counter.clone();
        }
        self.counters
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    fn histogram(&self, name: &str) -> Arc<Histogram> {
        if let Some(histogram) = self
            .histograms
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
        {
            return histogram.clone();
        }
        self.histograms
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(name.to_string())
            .or_default()
            .clone()
    }
}
