//! Prometheus metrics for the relationship core.
//!
//! All metrics follow the naming convention: `bb_<area>_<metric>_<unit>`
//!
//! ## Metric Types
//!
//! - **Counter**: Monotonically increasing value (e.g., transitions_total)
//! - **Histogram**: Distribution of values (e.g., store_call_duration_seconds)

use lazy_static::lazy_static;
use prometheus::{
    exponential_buckets, Counter, CounterVec, Encoder, Histogram, HistogramOpts, HistogramVec,
    Opts, Registry, TextEncoder,
};

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // TRANSITION METRICS
    // =========================================================================

    /// Transitions by kind and outcome
    pub static ref TRANSITIONS: CounterVec = CounterVec::new(
        Opts::new("bb_relationship_transitions_total", "Relationship transitions by outcome"),
        &["kind", "outcome"]  // outcome: applied/rejected/partially_applied/error
    ).expect("metric creation failed");

    /// Document writes retried after a transient failure
    pub static ref WRITE_RETRIES: CounterVec = CounterVec::new(
        Opts::new("bb_relationship_write_retries_total", "Retried document writes"),
        &["phase"]  // phase: initiator/counterpart/repair/sweep
    ).expect("metric creation failed");

    /// Counterpart writes handed to the intent journal
    pub static ref DEFERRED_WRITES: Counter = Counter::new(
        "bb_relationship_deferred_writes_total",
        "Counterpart writes deferred to reconciliation"
    ).expect("metric creation failed");

    // =========================================================================
    // RECONCILIATION METRICS
    // =========================================================================

    /// Edges repaired by the reconciler
    pub static ref REPAIRS: CounterVec = CounterVec::new(
        Opts::new("bb_relationship_repairs_total", "Edges repaired by reconciliation"),
        &["repair"]
    ).expect("metric creation failed");

    /// Documents rewritten by account sweeps
    pub static ref SWEPT_RECORDS: Counter = Counter::new(
        "bb_relationship_swept_records_total",
        "Documents rewritten to drop a deleted account"
    ).expect("metric creation failed");

    // =========================================================================
    // STORE METRICS
    // =========================================================================

    /// Document store call latency
    pub static ref STORE_CALL_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "bb_store_call_duration_seconds",
            "Time spent in document store calls"
        ).buckets(exponential_buckets(0.0001, 2.0, 16).expect("bucket layout is valid")),
        &["operation"]  // operation: fetch/create/update/list
    ).expect("metric creation failed");
}

/// Handle proving the metrics are registered.
#[derive(Debug, Clone, Copy)]
pub struct MetricsHandle {
    _registered: (),
}

/// Register all metrics with the global registry.
///
/// Calling this more than once is harmless.
pub fn register_metrics() -> Result<MetricsHandle, TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        // Transitions
        Box::new(TRANSITIONS.clone()),
        Box::new(WRITE_RETRIES.clone()),
        Box::new(DEFERRED_WRITES.clone()),
        // Reconciliation
        Box::new(REPAIRS.clone()),
        Box::new(SWEPT_RECORDS.clone()),
        // Store
        Box::new(STORE_CALL_DURATION.clone()),
    ];

    for metric in metrics {
        match REGISTRY.register(metric) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(TelemetryError::MetricsInit(e.to_string())),
        }
    }

    Ok(MetricsHandle { _registered: () })
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

/// Timer guard for automatic histogram observation.
pub struct HistogramTimer {
    histogram: Histogram,
    start: std::time::Instant,
}

impl HistogramTimer {
    /// Start a new timer for the given histogram.
    pub fn new(histogram: &Histogram) -> Self {
        Self {
            histogram: histogram.clone(),
            start: std::time::Instant::now(),
        }
    }
}

impl Drop for HistogramTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        self.histogram.observe(duration);
    }
}

/// Start timing for a histogram. Observation happens on drop.
#[macro_export]
macro_rules! time_histogram {
    ($histogram:expr) => {
        $crate::metrics::HistogramTimer::new(&$histogram)
    };
    ($histogram:expr, $labels:expr) => {
        $crate::metrics::HistogramTimer::new(&$histogram.with_label_values($labels))
    };
}
