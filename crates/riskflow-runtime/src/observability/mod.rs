//! Observability module
//!
//! Process-local counters and histograms for the intake and feedback paths,
//! exported as a JSON snapshot. Logging goes through `tracing`.

pub mod metrics;

pub use metrics::{
    names, Counter, Histogram, HistogramSummary, Metrics, MetricsCollector, MetricsSnapshot,
};
