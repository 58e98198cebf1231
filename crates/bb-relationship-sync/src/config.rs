//! Relationship core configuration.
//!
//! # Environment Variables
//!
//! | Variable | Field | Default |
//! |----------|-------|---------|
//! | `BB_RETRY_MAX_ATTEMPTS` | `retry.max_attempts` | 5 |
//! | `BB_RETRY_BASE_DELAY_MS` | `retry.base_delay_ms` | 50 |
//! | `BB_RETRY_MAX_DELAY_MS` | `retry.max_delay_ms` | 2000 |
//! | `BB_CALL_TIMEOUT_MS` | `call_timeout_ms` | 5000 |
//! | `BB_MUTUAL_REQUEST_POLICY` | `mutual_request_policy` | `auto-accept` |
//! | `BB_RECONCILE_CONCURRENCY` | `reconcile_concurrency` | 8 |
//! | `BB_RECONCILE_INTERVAL_SECS` | `reconcile_interval_secs` | 300 |

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub use crate::domain::state_machine::MutualRequestPolicy;

/// Upper bound on retry attempts for a single write.
pub const MAX_RETRY_ATTEMPTS: u32 = 20;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {var}")]
    InvalidEnv { var: &'static str, value: String },

    #[error("retry.max_attempts must be between 1 and {max}, got {got}")]
    InvalidMaxAttempts { got: u32, max: u32 },

    #[error("retry.multiplier must be at least 1.0, got {0}")]
    InvalidMultiplier(f64),

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("retry.base_delay_ms ({base}) exceeds retry.max_delay_ms ({max})")]
    DelayOrder { base: u64, max: u64 },

    #[error("unknown mutual request policy: {0:?}")]
    UnknownPolicy(String),
}

impl FromStr for MutualRequestPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto-accept" | "auto_accept" => Ok(Self::AutoAccept),
            "lower-id-wins" | "lower_id_wins" => Ok(Self::LowerIdWins),
            other => Err(ConfigError::UnknownPolicy(other.to_string())),
        }
    }
}

/// Bounded exponential backoff for store writes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts including the first one.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    /// Randomize each delay within its upper half.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 50,
            max_delay_ms: 2_000,
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let raw = self.base_delay_ms as f64 * self.multiplier.powi(exponent);
        let capped = raw.min(self.max_delay_ms as f64) as u64;

        if self.jitter && capped > 1 {
            let half = capped / 2;
            let spread = rand::thread_rng().gen_range(0..=capped - half);
            Duration::from_millis(half + spread)
        } else {
            Duration::from_millis(capped)
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 || self.max_attempts > MAX_RETRY_ATTEMPTS {
            return Err(ConfigError::InvalidMaxAttempts {
                got: self.max_attempts,
                max: MAX_RETRY_ATTEMPTS,
            });
        }
        if self.multiplier.is_nan() || self.multiplier < 1.0 {
            return Err(ConfigError::InvalidMultiplier(self.multiplier));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(ConfigError::DelayOrder {
                base: self.base_delay_ms,
                max: self.max_delay_ms,
            });
        }
        Ok(())
    }
}

/// Configuration for the relationship service, reconciler and sweep.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    pub retry: RetryPolicy,
    /// Per store call; there is no transaction-wide timeout.
    pub call_timeout_ms: u64,
    pub mutual_request_policy: MutualRequestPolicy,
    /// Pairs repaired in parallel by one reconciliation run.
    pub reconcile_concurrency: usize,
    pub reconcile_interval_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            call_timeout_ms: 5_000,
            mutual_request_policy: MutualRequestPolicy::default(),
            reconcile_concurrency: 8,
            reconcile_interval_secs: 300,
        }
    }
}

impl SyncConfig {
    /// Reads overrides from the environment on top of the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(v) = parse_var("BB_RETRY_MAX_ATTEMPTS")? {
            config.retry.max_attempts = v;
        }
        if let Some(v) = parse_var("BB_RETRY_BASE_DELAY_MS")? {
            config.retry.base_delay_ms = v;
        }
        if let Some(v) = parse_var("BB_RETRY_MAX_DELAY_MS")? {
            config.retry.max_delay_ms = v;
        }
        if let Some(v) = parse_var("BB_CALL_TIMEOUT_MS")? {
            config.call_timeout_ms = v;
        }
        if let Ok(v) = env::var("BB_MUTUAL_REQUEST_POLICY") {
            config.mutual_request_policy = v.parse()?;
        }
        if let Some(v) = parse_var("BB_RECONCILE_CONCURRENCY")? {
            config.reconcile_concurrency = v;
        }
        if let Some(v) = parse_var("BB_RECONCILE_INTERVAL_SECS")? {
            config.reconcile_interval_secs = v;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.retry.validate()?;
        if self.call_timeout_ms == 0 {
            return Err(ConfigError::Zero {
                field: "call_timeout_ms",
            });
        }
        if self.reconcile_concurrency == 0 {
            return Err(ConfigError::Zero {
                field: "reconcile_concurrency",
            });
        }
        if self.reconcile_interval_secs == 0 {
            return Err(ConfigError::Zero {
                field: "reconcile_interval_secs",
            });
        }
        Ok(())
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_mutual_request_policy(mut self, policy: MutualRequestPolicy) -> Self {
        self.mutual_request_policy = policy;
        self
    }

    pub fn with_reconcile_concurrency(mut self, concurrency: usize) -> Self {
        self.reconcile_concurrency = concurrency;
        self
    }

    /// Sub-second remainders round up, so only a zero interval stores zero.
    pub fn with_reconcile_interval(mut self, interval: Duration) -> Self {
        self.reconcile_interval_secs = interval.as_secs() + u64::from(interval.subsec_nanos() > 0);
        self
    }
}

fn parse_var<T: FromStr>(var: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(var) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { var, value }),
        Err(_) => Ok(None),
    }
}
