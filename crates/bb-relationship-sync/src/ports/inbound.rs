//! # Inbound Port - RelationshipApi
//!
//! Driving port called by the presentation layer. The caller's own id comes
//! from the identity collaborator and is trusted as given.
//!
//! | Method | Initiator | Precondition on initiator's document |
//! |--------|-----------|--------------------------------------|
//! | `send_request` | requester | other is in none of the three sets |
//! | `accept` | recipient | other in `receivedFriendRequests` |
//! | `reject` | recipient | other in `receivedFriendRequests` |
//! | `cancel` | requester | other in `sentFriendRequests` |
//! | `unfriend` | either | other in `friends` |

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use super::outbound::IntentId;
use crate::domain::{EdgeState, RejectReason, SyncError, UserId, UserRecord};

/// Result of one relationship transition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TransitionOutcome {
    /// Both documents reflect the transition.
    Applied,
    /// The transition was refused. Usually nothing was written, but two
    /// refusals clean up first: the losing side of a lower-id collision
    /// rewrites both documents to the winner's request, and `PartyGone`
    /// removes the initiator's references to the vanished account.
    Rejected { reason: RejectReason },
    /// The initiator's write landed but the counterpart's did not. The
    /// counterpart write is journaled for the reconciler when `intent_id`
    /// is set.
    PartiallyApplied { intent_id: Option<IntentId> },
}

impl TransitionOutcome {
    pub fn rejected(reason: RejectReason) -> Self {
        Self::Rejected { reason }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Rejected { .. } => "rejected",
            Self::PartiallyApplied { .. } => "partially_applied",
        }
    }
}

impl fmt::Display for TransitionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected { reason } => write!(f, "rejected ({})", reason),
            Self::PartiallyApplied {
                intent_id: Some(id),
            } => write!(f, "partially_applied (intent {})", id),
            other => f.write_str(other.label()),
        }
    }
}

/// The three lists shown on a user's friends screen.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipView {
    pub friends: Vec<UserId>,
    /// Requests waiting for this user's answer.
    pub incoming: Vec<UserId>,
    /// Requests this user sent that are still unanswered.
    pub outgoing: Vec<UserId>,
}

impl RelationshipView {
    pub fn from_record(record: &UserRecord) -> Self {
        let rel = &record.relationships;
        Self {
            friends: rel.friends.iter().cloned().collect(),
            incoming: rel.received.iter().cloned().collect(),
            outgoing: rel.sent.iter().cloned().collect(),
        }
    }
}

/// Search result row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub user_id: UserId,
    pub username: String,
}

/// Primary relationship API (Driving Port)
///
/// Transitions return `Ok` for every outcome the caller can act on,
/// including rejections. `Err(SyncError::Unavailable)` means nothing was
/// written and the whole call may be retried.
#[async_trait]
pub trait RelationshipApi: Send + Sync {
    async fn send_request(
        &self,
        self_id: &UserId,
        other_id: &UserId,
    ) -> Result<TransitionOutcome, SyncError>;

    /// `self_id` accepts the request `other_id` sent.
    async fn accept(
        &self,
        self_id: &UserId,
        other_id: &UserId,
    ) -> Result<TransitionOutcome, SyncError>;

    async fn reject(
        &self,
        self_id: &UserId,
        other_id: &UserId,
    ) -> Result<TransitionOutcome, SyncError>;

    /// `self_id` withdraws its own outgoing request.
    async fn cancel(
        &self,
        self_id: &UserId,
        other_id: &UserId,
    ) -> Result<TransitionOutcome, SyncError>;

    async fn unfriend(
        &self,
        self_id: &UserId,
        other_id: &UserId,
    ) -> Result<TransitionOutcome, SyncError>;

    /// Creates a user document with empty relationship sets.
    async fn register_account(&self, user_id: &UserId, username: &str) -> Result<(), SyncError>;

    async fn relationship_view(&self, self_id: &UserId) -> Result<RelationshipView, SyncError>;

    /// Everyone except self, friends and pending requests in either direction.
    async fn discoverable_users(&self, self_id: &UserId) -> Result<Vec<UserSummary>, SyncError>;

    /// Authors whose posts the user's feed may show: self plus friends.
    async fn feed_audience(&self, self_id: &UserId) -> Result<BTreeSet<UserId>, SyncError>;

    /// The edge seen from `self_id`, classified from both stored documents.
    async fn edge_state(&self, self_id: &UserId, other_id: &UserId)
        -> Result<EdgeState, SyncError>;
}
