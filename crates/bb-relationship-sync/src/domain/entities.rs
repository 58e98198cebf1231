//! Core entities: user ids, user records and the derived edge state.
//!
//! ## Wire Contract
//!
//! | Field | Serialized As |
//! |-------|---------------|
//! | `user_id` | `userId` (string) |
//! | `username` | `username` (string) |
//! | `friends` | `friends` (array of strings, unordered) |
//! | `sent` | `sentFriendRequests` (array of strings, unordered) |
//! | `received` | `receivedFriendRequests` (array of strings, unordered) |
//!
//! Duplicate ids in a stored array collapse into one set entry on read.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use super::errors::SyncError;

/// Opaque user identifier handed to the core by the identity collaborator.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Creates a user id, rejecting blank strings.
    pub fn new(id: impl Into<String>) -> Result<Self, SyncError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(SyncError::InvalidUserId(id));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for UserId {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// One of the three relationship fields stored on every user document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RelationshipField {
    #[serde(rename = "friends")]
    Friends,
    #[serde(rename = "sentFriendRequests")]
    SentFriendRequests,
    #[serde(rename = "receivedFriendRequests")]
    ReceivedFriendRequests,
}

impl RelationshipField {
    pub const ALL: [RelationshipField; 3] = [
        RelationshipField::Friends,
        RelationshipField::SentFriendRequests,
        RelationshipField::ReceivedFriendRequests,
    ];

    /// Field name as stored in the document database.
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::Friends => "friends",
            Self::SentFriendRequests => "sentFriendRequests",
            Self::ReceivedFriendRequests => "receivedFriendRequests",
        }
    }
}

impl fmt::Display for RelationshipField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// Which of one party's sets mention a given other party.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Marking {
    pub friend: bool,
    pub sent: bool,
    pub received: bool,
}

impl Marking {
    pub const NONE: Marking = Marking {
        friend: false,
        sent: false,
        received: false,
    };
    pub const FRIEND: Marking = Marking {
        friend: true,
        sent: false,
        received: false,
    };
    pub const SENT: Marking = Marking {
        friend: false,
        sent: true,
        received: false,
    };
    pub const RECEIVED: Marking = Marking {
        friend: false,
        sent: false,
        received: true,
    };

    pub fn count(&self) -> usize {
        [self.friend, self.sent, self.received]
            .iter()
            .filter(|set| **set)
            .count()
    }

    pub fn is_none(&self) -> bool {
        self.count() == 0
    }

    /// The marking the other party must hold for the edge to be consistent.
    pub fn mirrored(&self) -> Marking {
        Marking {
            friend: self.friend,
            sent: self.received,
            received: self.sent,
        }
    }

    pub fn has(&self, field: RelationshipField) -> bool {
        match field {
            RelationshipField::Friends => self.friend,
            RelationshipField::SentFriendRequests => self.sent,
            RelationshipField::ReceivedFriendRequests => self.received,
        }
    }
}

/// The relationship fields of one user document.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationships {
    #[serde(default)]
    pub friends: BTreeSet<UserId>,
    #[serde(rename = "sentFriendRequests", default)]
    pub sent: BTreeSet<UserId>,
    #[serde(rename = "receivedFriendRequests", default)]
    pub received: BTreeSet<UserId>,
}

impl Relationships {
    pub fn field(&self, field: RelationshipField) -> &BTreeSet<UserId> {
        match field {
            RelationshipField::Friends => &self.friends,
            RelationshipField::SentFriendRequests => &self.sent,
            RelationshipField::ReceivedFriendRequests => &self.received,
        }
    }

    pub fn field_mut(&mut self, field: RelationshipField) -> &mut BTreeSet<UserId> {
        match field {
            RelationshipField::Friends => &mut self.friends,
            RelationshipField::SentFriendRequests => &mut self.sent,
            RelationshipField::ReceivedFriendRequests => &mut self.received,
        }
    }

    pub fn marking_for(&self, other: &UserId) -> Marking {
        Marking {
            friend: self.friends.contains(other),
            sent: self.sent.contains(other),
            received: self.received.contains(other),
        }
    }

    pub fn references(&self, other: &UserId) -> bool {
        !self.marking_for(other).is_none()
    }

    /// Every id mentioned in any of the three sets.
    pub fn referenced_ids(&self) -> BTreeSet<UserId> {
        self.friends
            .iter()
            .chain(self.sent.iter())
            .chain(self.received.iter())
            .cloned()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.friends.is_empty() && self.sent.is_empty() && self.received.is_empty()
    }
}

/// A user document as seen by the relationship core.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    #[serde(rename = "userId")]
    pub user_id: UserId,
    #[serde(default)]
    pub username: String,
    #[serde(flatten)]
    pub relationships: Relationships,
}

impl UserRecord {
    /// Fresh record with all relationship sets empty.
    pub fn new(user_id: UserId, username: impl Into<String>) -> Self {
        Self {
            user_id,
            username: username.into(),
            relationships: Relationships::default(),
        }
    }
}

/// A fetched record together with the store revision it was read at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DocumentSnapshot {
    pub record: UserRecord,
    pub revision: u64,
}

/// Field replacements for a single document.
///
/// Applied by the store as one atomic single-document write.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecordPatch {
    fields: BTreeMap<RelationshipField, BTreeSet<UserId>>,
}

impl RecordPatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a patch holding only the fields that differ between two states.
    pub fn from_diff(before: &Relationships, after: &Relationships) -> Self {
        let mut patch = Self::new();
        for field in RelationshipField::ALL {
            if before.field(field) != after.field(field) {
                patch.set(field, after.field(field).clone());
            }
        }
        patch
    }

    pub fn set(&mut self, field: RelationshipField, values: BTreeSet<UserId>) {
        self.fields.insert(field, values);
    }

    pub fn fields(&self) -> impl Iterator<Item = (&RelationshipField, &BTreeSet<UserId>)> {
        self.fields.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn apply_to(&self, relationships: &mut Relationships) {
        for (field, values) in &self.fields {
            *relationships.field_mut(*field) = values.clone();
        }
    }
}

/// Canonical state of an edge from one party's point of view.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeState {
    Unrelated,
    RequestOutgoing,
    RequestIncoming,
    Friends,
    Inconsistent,
}

impl EdgeState {
    /// Classifies the edge between `a` and `b` from `a`'s point of view.
    pub fn classify(a_id: &UserId, a: &Relationships, b_id: &UserId, b: &Relationships) -> Self {
        Self::from_markings(a.marking_for(b_id), b.marking_for(a_id))
    }

    pub fn from_markings(a: Marking, b: Marking) -> Self {
        match (a, b) {
            (Marking::NONE, Marking::NONE) => Self::Unrelated,
            (Marking::SENT, Marking::RECEIVED) => Self::RequestOutgoing,
            (Marking::RECEIVED, Marking::SENT) => Self::RequestIncoming,
            (Marking::FRIEND, Marking::FRIEND) => Self::Friends,
            _ => Self::Inconsistent,
        }
    }

    /// The same edge seen from the other side.
    pub fn mirrored(&self) -> Self {
        match self {
            Self::RequestOutgoing => Self::RequestIncoming,
            Self::RequestIncoming => Self::RequestOutgoing,
            other => *other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unrelated => "unrelated",
            Self::RequestOutgoing => "request_outgoing",
            Self::RequestIncoming => "request_incoming",
            Self::Friends => "friends",
            Self::Inconsistent => "inconsistent",
        }
    }
}

impl fmt::Display for EdgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The five relationship transitions a presentation layer can request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransitionKind {
    SendRequest,
    Accept,
    Reject,
    Cancel,
    Unfriend,
}

impl TransitionKind {
    pub const ALL: [TransitionKind; 5] = [
        TransitionKind::SendRequest,
        TransitionKind::Accept,
        TransitionKind::Reject,
        TransitionKind::Cancel,
        TransitionKind::Unfriend,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SendRequest => "send_request",
            Self::Accept => "accept",
            Self::Reject => "reject",
            Self::Cancel => "cancel",
            Self::Unfriend => "unfriend",
        }
    }
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order-independent key for an edge: `(min(a, b), max(a, b))`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PairKey {
    low: UserId,
    high: UserId,
}

impl PairKey {
    pub fn new(a: UserId, b: UserId) -> Self {
        if a <= b {
            Self { low: a, high: b }
        } else {
            Self { low: b, high: a }
        }
    }

    pub fn low(&self) -> &UserId {
        &self.low
    }

    pub fn high(&self) -> &UserId {
        &self.high
    }

    pub fn is_self_pair(&self) -> bool {
        self.low == self.high
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.low, self.high)
    }
}
