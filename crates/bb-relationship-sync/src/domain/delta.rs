//! Idempotent per-document edits.
//!
//! An [`EdgeDelta`] adds or removes single ids in a document's relationship
//! sets. Applying the same delta twice yields the same document as applying
//! it once, which is what lets a failed write be retried any number of times
//! against a freshly fetched snapshot.

use serde::{Deserialize, Serialize};

use super::entities::{RelationshipField, Relationships, UserId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeltaOp {
    Add,
    Remove,
}

/// One set edit within a delta.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: RelationshipField,
    pub op: DeltaOp,
    pub target: UserId,
}

/// Result of applying a delta to a snapshot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeltaApplication {
    /// The document already reflects the delta.
    Unchanged,
    /// The document after the delta.
    Changed(Relationships),
    /// The delta would record a request while the reverse request is
    /// already present in this document.
    MutualRequest { other: UserId },
}

/// Ordered edits to one user's relationship fields.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeDelta {
    pub owner: UserId,
    pub changes: Vec<FieldChange>,
}

impl EdgeDelta {
    pub fn new(owner: UserId) -> Self {
        Self {
            owner,
            changes: Vec::new(),
        }
    }

    pub fn add(mut self, field: RelationshipField, target: &UserId) -> Self {
        self.changes.push(FieldChange {
            field,
            op: DeltaOp::Add,
            target: target.clone(),
        });
        self
    }

    pub fn remove(mut self, field: RelationshipField, target: &UserId) -> Self {
        self.changes.push(FieldChange {
            field,
            op: DeltaOp::Remove,
            target: target.clone(),
        });
        self
    }

    /// Removes `target` from all three relationship sets.
    pub fn remove_everywhere(self, target: &UserId) -> Self {
        RelationshipField::ALL
            .iter()
            .fold(self, |delta, field| delta.remove(*field, target))
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Applies the changes in order to a copy of `current`.
    ///
    /// Adding a pending request for an id already held as a friend is
    /// skipped. Adding a request while the opposite request for the same id
    /// is present reports [`DeltaApplication::MutualRequest`].
    pub fn apply(&self, current: &Relationships) -> DeltaApplication {
        let mut next = current.clone();

        for change in &self.changes {
            match change.op {
                DeltaOp::Remove => {
                    next.field_mut(change.field).remove(&change.target);
                }
                DeltaOp::Add => {
                    let opposite = match change.field {
                        RelationshipField::SentFriendRequests => {
                            Some(RelationshipField::ReceivedFriendRequests)
                        }
                        RelationshipField::ReceivedFriendRequests => {
                            Some(RelationshipField::SentFriendRequests)
                        }
                        RelationshipField::Friends => None,
                    };

                    if let Some(opposite) = opposite {
                        if next.friends.contains(&change.target) {
                            continue;
                        }
                        if next.field(opposite).contains(&change.target) {
                            return DeltaApplication::MutualRequest {
                                other: change.target.clone(),
                            };
                        }
                    }

                    if change.target != self.owner {
                        next.field_mut(change.field).insert(change.target.clone());
                    }
                }
            }
        }

        if next == *current {
            DeltaApplication::Unchanged
        } else {
            DeltaApplication::Changed(next)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uid(id: &str) -> UserId {
        UserId::new(id).unwrap()
    }

    #[test]
    fn test_apply_is_idempotent() {
        let (a, b) = (uid("a"), uid("b"));
        let delta = EdgeDelta::new(a)
            .remove(RelationshipField::ReceivedFriendRequests, &b)
            .add(RelationshipField::Friends, &b);

        let mut start = Relationships::default();
        start.received.insert(b.clone());

        let once = match delta.apply(&start) {
            DeltaApplication::Changed(next) => next,
            other => panic!("expected change, got {:?}", other),
        };
        assert!(once.friends.contains(&b));
        assert!(once.received.is_empty());
        assert_eq!(delta.apply(&once), DeltaApplication::Unchanged);
    }

    #[test]
    fn test_remove_of_absent_id_is_noop() {
        let delta = EdgeDelta::new(uid("a")).remove(RelationshipField::Friends, &uid("b"));
        assert_eq!(
            delta.apply(&Relationships::default()),
            DeltaApplication::Unchanged
        );
    }

    #[test]
    fn test_reverse_request_reported() {
        let (a, b) = (uid("a"), uid("b"));
        let mut current = Relationships::default();
        current.received.insert(b.clone());

        let delta = EdgeDelta::new(a).add(RelationshipField::SentFriendRequests, &b);
        assert_eq!(
            delta.apply(&current),
            DeltaApplication::MutualRequest { other: b }
        );
    }

    #[test]
    fn test_request_for_friend_is_skipped() {
        let (a, b) = (uid("a"), uid("b"));
        let mut current = Relationships::default();
        current.friends.insert(b.clone());

        let delta = EdgeDelta::new(a).add(RelationshipField::ReceivedFriendRequests, &b);
        assert_eq!(delta.apply(&current), DeltaApplication::Unchanged);
    }

    #[test]
    fn test_removal_before_add_avoids_collision() {
        let (a, b) = (uid("a"), uid("b"));
        let mut current = Relationships::default();
        current.received.insert(b.clone());

        let delta = EdgeDelta::new(a)
            .remove(RelationshipField::ReceivedFriendRequests, &b)
            .add(RelationshipField::SentFriendRequests, &b);
        match delta.apply(&current) {
            DeltaApplication::Changed(next) => {
                assert!(next.sent.contains(&b));
                assert!(next.received.is_empty());
            }
            other => panic!("expected change, got {:?}", other),
        }
    }

    #[test]
    fn test_self_add_never_recorded() {
        let a = uid("a");
        let delta = EdgeDelta::new(a.clone()).add(RelationshipField::Friends, &a);
        assert_eq!(
            delta.apply(&Relationships::default()),
            DeltaApplication::Unchanged
        );
    }

    #[test]
    fn test_remove_everywhere() {
        let (a, b) = (uid("a"), uid("b"));
        let mut current = Relationships::default();
        current.friends.insert(b.clone());
        current.sent.insert(b.clone());

        let delta = EdgeDelta::new(a).remove_everywhere(&b);
        match delta.apply(&current) {
            DeltaApplication::Changed(next) => assert!(next.is_empty()),
            other => panic!("expected change, got {:?}", other),
        }
    }
}
