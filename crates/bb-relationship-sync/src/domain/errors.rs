//! Error taxonomy for the relationship core.
//!
//! Local precondition failures are [`RejectReason`]s carried inside a
//! successful outcome; only infrastructure failures surface as errors.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use super::entities::UserId;
use crate::config::ConfigError;

/// Why a transition was refused. Never retried automatically.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RejectReason {
    /// The caller targeted its own id.
    SelfReference,
    /// A request or friendship already exists on this edge.
    AlreadyRelated,
    /// The edge is not in the state the transition starts from.
    NotInRequestedState,
    /// One of the two documents no longer exists.
    PartyGone,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SelfReference => "self_reference",
            Self::AlreadyRelated => "already_related",
            Self::NotInRequestedState => "not_in_requested_state",
            Self::PartyGone => "party_gone",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures reported by a document store adapter.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("document not found: {0}")]
    NotFound(UserId),

    #[error("revision conflict on {id}: expected {expected}, found {actual}")]
    Conflict { id: UserId, expected: u64, actual: u64 },

    #[error("document already exists: {0}")]
    AlreadyExists(UserId),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl StoreError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Unavailable(_) | Self::Timeout(_) | Self::Conflict { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Conflict { .. } => "conflict",
            Self::AlreadyExists(_) => "already_exists",
            Self::Unavailable(_) => "unavailable",
            Self::Timeout(_) => "timeout",
            Self::Serialization(_) => "serialization",
            Self::Io(_) => "io",
        }
    }
}

/// Errors returned by the relationship entry points.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("invalid user id: {0:?}")]
    InvalidUserId(String),

    /// Transient store failure before any write landed; the whole
    /// transition can be retried from scratch.
    #[error("store unavailable before any write: {0}")]
    Unavailable(StoreError),

    #[error("store error: {0}")]
    Store(StoreError),

    /// The counterpart write was deferred but could not be journaled.
    #[error("intent journal error: {0}")]
    Journal(StoreError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}
