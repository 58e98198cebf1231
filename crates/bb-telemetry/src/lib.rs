//! # BetaBuddy Telemetry
//!
//! Logging and metrics for the relationship core.
//!
//! ## Components
//!
//! - **Logs**: `tracing` subscriber with pretty or JSON output
//! - **Metrics**: Prometheus counters and histograms, exposed as text
//!
//! ## Usage
//!
//! ```rust,ignore
//! use bb_telemetry::{init_telemetry, TelemetryConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let _guard = init_telemetry(TelemetryConfig::for_component("bb-admin"))?;
//!     // Logs and metrics are now being collected
//!     Ok(())
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `OTEL_SERVICE_NAME` | `betabuddy-relationships` | Service name in logs |
//! | `BB_LOG_LEVEL` / `RUST_LOG` | `info` | Log filter |
//! | `BB_CONSOLE_OUTPUT` | `true` | Write logs to stderr |
//! | `BB_JSON_LOGS` | `false` (`true` in containers) | JSON log lines |
//! | `BB_ENVIRONMENT` | `development` | Deployment environment |

mod config;
pub mod logging;
pub mod metrics;
mod tracing_setup;

pub use config::{TelemetryConfig, DEFAULT_SERVICE_NAME};
pub use metrics::{
    encode_metrics, register_metrics, HistogramTimer, MetricsHandle, DEFERRED_WRITES, REPAIRS,
    STORE_CALL_DURATION, SWEPT_RECORDS, TRANSITIONS, WRITE_RETRIES,
};
pub use tracing_setup::{env_filter, init_tracing};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize tracing subscriber: {0}")]
    TracerInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),
}

/// Register metrics and install the tracing subscriber.
///
/// Hold the returned guard for the lifetime of the process.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    // Metrics first so early log lines can already be counted
    let metrics = register_metrics()?;
    init_tracing(&config)?;

    tracing::info!(
        service = %config.service_name,
        environment = %config.environment,
        "telemetry initialized"
    );

    Ok(TelemetryGuard {
        service_name: config.service_name,
        _metrics: metrics,
    })
}

/// Guard that keeps telemetry active.
pub struct TelemetryGuard {
    service_name: String,
    _metrics: MetricsHandle,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::debug!(service = %self.service_name, "telemetry shutting down");
    }
}

/// Convenience macro for recording a metric increment.
#[macro_export]
macro_rules! metric_inc {
    ($metric:expr) => {
        $metric.inc()
    };
    ($metric:expr, $labels:expr) => {
        $metric.with_label_values($labels).inc()
    };
}

/// Convenience macro for adding to a counter.
#[macro_export]
macro_rules! metric_add {
    ($metric:expr, $value:expr) => {
        $metric.inc_by($value)
    };
    ($metric:expr, $labels:expr, $value:expr) => {
        $metric.with_label_values($labels).inc_by($value)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_macros() {
        metric_inc!(WRITE_RETRIES, &["counterpart"]);
        metric_add!(SWEPT_RECORDS, 2.0);
        assert!(WRITE_RETRIES.with_label_values(&["counterpart"]).get() >= 1.0);
        assert!(SWEPT_RECORDS.get() >= 2.0);
    }
}
