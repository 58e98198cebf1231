//! Outbound (Driven) ports for the relationship core.
//!
//! The core depends on a document store with single-document atomicity and
//! on a journal of counterpart writes that could not be completed in line.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::domain::{
    DocumentSnapshot, EdgeDelta, RecordPatch, StoreError, TransitionKind, UserId, UserRecord,
};

/// Document database holding one [`UserRecord`] per user id.
///
/// Each call is atomic for its single document. Nothing is atomic across
/// documents, and two callers may observe writes to different ids in
/// different orders.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Reads a document and the revision it was read at.
    ///
    /// # Returns
    /// - `Err(StoreError::NotFound)`: no document for `id`
    async fn fetch(&self, id: &UserId) -> Result<DocumentSnapshot, StoreError>;

    /// Creates a document. Fails with `AlreadyExists` if `id` is taken.
    async fn create(&self, record: UserRecord) -> Result<DocumentSnapshot, StoreError>;

    /// Replaces the listed fields, all or none.
    ///
    /// When `expected_revision` is set and differs from the stored revision
    /// the write is refused with `Conflict`. Returns the new revision.
    async fn update_fields(
        &self,
        id: &UserId,
        patch: &RecordPatch,
        expected_revision: Option<u64>,
    ) -> Result<u64, StoreError>;

    /// Every document id currently stored.
    async fn list_ids(&self) -> Result<Vec<UserId>, StoreError>;
}

/// Identifier of a deferred counterpart write.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IntentId(Uuid);

impl IntentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for IntentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for IntentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A counterpart write that exhausted its retry budget.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeferredWrite {
    pub id: IntentId,
    pub kind: TransitionKind,
    pub initiator: UserId,
    /// Owned by the counterpart.
    pub delta: EdgeDelta,
    pub recorded_at: DateTime<Utc>,
    /// Replays attempted by the reconciler so far.
    #[serde(default)]
    pub attempts: u32,
}

impl DeferredWrite {
    pub fn new(kind: TransitionKind, initiator: UserId, delta: EdgeDelta) -> Self {
        Self {
            id: IntentId::new(),
            kind,
            initiator,
            delta,
            recorded_at: Utc::now(),
            attempts: 0,
        }
    }

    pub fn counterpart(&self) -> &UserId {
        &self.delta.owner
    }
}

/// Durable list of deferred writes, replayed by the reconciler.
#[async_trait]
pub trait IntentJournal: Send + Sync {
    async fn record(&self, write: &DeferredWrite) -> Result<(), StoreError>;

    /// Pending writes, oldest first.
    async fn pending(&self) -> Result<Vec<DeferredWrite>, StoreError>;

    /// Marks a write complete. Returns `false` if it was not pending.
    async fn resolve(&self, id: &IntentId) -> Result<bool, StoreError>;

    /// Counts one failed replay.
    async fn mark_attempted(&self, id: &IntentId) -> Result<(), StoreError>;
}
