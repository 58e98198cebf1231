//! Telemetry configuration from environment variables.

use std::env;

pub const DEFAULT_SERVICE_NAME: &str = "betabuddy-relationships";

/// Configuration for logging and metrics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Service name attached to every log line
    pub service_name: String,

    /// Log filter directive (trace, debug, info, warn, error, or a full
    /// `EnvFilter` directive)
    pub log_level: String,

    /// Whether to write logs to stderr at all
    pub console_output: bool,

    /// Whether to format logs as JSON
    pub json_logs: bool,

    /// Deployment environment (development, staging, production)
    pub environment: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            log_level: "info".to_string(),
            console_output: true,
            json_logs: false,
            environment: "development".to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `OTEL_SERVICE_NAME`: Service name (default: betabuddy-relationships)
    /// - `BB_LOG_LEVEL` or `RUST_LOG`: Log filter (default: info)
    /// - `BB_CONSOLE_OUTPUT`: Enable log output (default: true)
    /// - `BB_JSON_LOGS`: JSON logs (default: false in dev, true in containers)
    /// - `BB_ENVIRONMENT`: Deployment environment (default: development)
    pub fn from_env() -> Self {
        let is_container =
            env::var("KUBERNETES_SERVICE_HOST").is_ok() || env::var("DOCKER_CONTAINER").is_ok();

        Self {
            service_name: env::var("OTEL_SERVICE_NAME")
                .unwrap_or_else(|_| DEFAULT_SERVICE_NAME.to_string()),

            log_level: env::var("BB_LOG_LEVEL")
                .or_else(|_| env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string()),

            console_output: flag(env::var("BB_CONSOLE_OUTPUT").ok().as_deref(), true),

            json_logs: flag(env::var("BB_JSON_LOGS").ok().as_deref(), is_container),

            environment: env::var("BB_ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        }
    }

    /// Configuration for one named component, e.g. `bb-admin`.
    pub fn for_component(component: &str) -> Self {
        let mut config = Self::from_env();
        if config.service_name == DEFAULT_SERVICE_NAME {
            config.service_name = format!("{}-{}", DEFAULT_SERVICE_NAME, component);
        }
        config
    }
}

/// Parses a boolean switch; anything unrecognised keeps the default.
fn flag(value: Option<&str>, default: bool) -> bool {
    match value.map(|v| v.trim().to_ascii_lowercase()) {
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => true,
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => false,
        _ => default,
    }
}
