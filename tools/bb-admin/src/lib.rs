//! BB-Admin: BetaBuddy relationship graph administration
//!
//! Operator CLI for a friend graph kept in a JSON file. Each invocation
//! opens the file, runs one core operation and prints its result as JSON.
//!
//! ```text
//! bb-admin --store graph.json init
//! bb-admin --store graph.json register alice "Alice"
//! bb-admin --store graph.json send alice bob
//! bb-admin --store graph.json accept bob alice
//! bb-admin --store graph.json --metrics reconcile --dry-run
//! ```
//!
//! Sync behavior (retries, timeouts, mutual-request policy) is read from the
//! `BB_*` environment variables understood by `SyncConfig::from_env`.

pub mod cli;
pub mod commands;
pub mod telemetry_bridge;

pub use cli::{Args, Command, Edge};
pub use commands::execute;
pub use telemetry_bridge::{MeteredStore, PrometheusRecorder};
