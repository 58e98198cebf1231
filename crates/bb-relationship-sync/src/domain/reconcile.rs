//! Repair planning for drifted edges.
//!
//! When an edge is inconsistent and no deferred write explains it, the state
//! that is further along the lifecycle wins: `Friends > Request > Unrelated`.
//! A reference to a record that no longer exists is dropped.

use serde::{Deserialize, Serialize};

use super::delta::EdgeDelta;
use super::entities::{EdgeState, Marking, PairKey, RelationshipField, Relationships, UserId};
use super::state_machine::MutualRequestPolicy;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RepairKind {
    /// A record listed its own id.
    SelfReference,
    /// A record referenced a user whose record is gone.
    DanglingReference,
    /// One side held a friendship the other side lacked.
    RestoreFriends,
    /// One side held a request marking the other side lacked.
    RestoreRequest,
    /// Requests were pending in both directions.
    MutualRequest,
}

impl RepairKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SelfReference => "self_reference",
            Self::DanglingReference => "dangling_reference",
            Self::RestoreFriends => "restore_friends",
            Self::RestoreRequest => "restore_request",
            Self::MutualRequest => "mutual_request",
        }
    }
}

/// Edits that bring one edge back to a consistent state.
///
/// `before` and `after` are seen from the low id's side.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RepairPlan {
    pub pair: PairKey,
    pub kind: RepairKind,
    pub before: EdgeState,
    pub after: EdgeState,
    pub low: Option<EdgeDelta>,
    pub high: Option<EdgeDelta>,
}

/// Plans the repair of one edge from fresh views of both records.
///
/// A `None` view means the record does not exist. Returns `None` when the
/// edge needs no repair.
pub fn plan_repair(
    policy: MutualRequestPolicy,
    pair: &PairKey,
    low: Option<&Relationships>,
    high: Option<&Relationships>,
) -> Option<RepairPlan> {
    let (low_id, high_id) = (pair.low(), pair.high());

    if pair.is_self_pair() {
        let current = low?;
        if !current.references(low_id) {
            return None;
        }
        return Some(RepairPlan {
            pair: pair.clone(),
            kind: RepairKind::SelfReference,
            before: EdgeState::Inconsistent,
            after: EdgeState::Unrelated,
            low: Some(EdgeDelta::new(low_id.clone()).remove_everywhere(low_id)),
            high: None,
        });
    }

    let (low_view, high_view) = match (low, high) {
        (None, None) => return None,
        (Some(view), None) => {
            return dangling(low_id, high_id, view).map(|delta| RepairPlan {
                pair: pair.clone(),
                kind: RepairKind::DanglingReference,
                before: EdgeState::Inconsistent,
                after: EdgeState::Unrelated,
                low: Some(delta),
                high: None,
            });
        }
        (None, Some(view)) => {
            return dangling(high_id, low_id, view).map(|delta| RepairPlan {
                pair: pair.clone(),
                kind: RepairKind::DanglingReference,
                before: EdgeState::Inconsistent,
                after: EdgeState::Unrelated,
                low: None,
                high: Some(delta),
            });
        }
        (Some(l), Some(h)) => (l, h),
    };

    let lm = low_view.marking_for(high_id);
    let hm = high_view.marking_for(low_id);
    let before = EdgeState::from_markings(lm, hm);
    if before != EdgeState::Inconsistent {
        return None;
    }

    let low_to_high = lm.sent || hm.received;
    let high_to_low = hm.sent || lm.received;

    let (target_low, target_high, kind) = if lm.friend || hm.friend {
        (Marking::FRIEND, Marking::FRIEND, RepairKind::RestoreFriends)
    } else if low_to_high && high_to_low {
        match policy {
            MutualRequestPolicy::AutoAccept => {
                (Marking::FRIEND, Marking::FRIEND, RepairKind::MutualRequest)
            }
            MutualRequestPolicy::LowerIdWins => {
                (Marking::SENT, Marking::RECEIVED, RepairKind::MutualRequest)
            }
        }
    } else if low_to_high {
        (Marking::SENT, Marking::RECEIVED, RepairKind::RestoreRequest)
    } else if high_to_low {
        (Marking::RECEIVED, Marking::SENT, RepairKind::RestoreRequest)
    } else {
        return None;
    };

    let low_delta = delta_towards(low_id, high_id, lm, target_low);
    let high_delta = delta_towards(high_id, low_id, hm, target_high);

    Some(RepairPlan {
        pair: pair.clone(),
        kind,
        before,
        after: EdgeState::from_markings(target_low, target_high),
        low: Some(low_delta).filter(|d| !d.is_empty()),
        high: Some(high_delta).filter(|d| !d.is_empty()),
    })
}

fn dangling(owner: &UserId, missing: &UserId, view: &Relationships) -> Option<EdgeDelta> {
    if view.references(missing) {
        Some(EdgeDelta::new(owner.clone()).remove_everywhere(missing))
    } else {
        None
    }
}

/// Removals first, then additions, so the edit never trips the
/// reverse-request check in [`EdgeDelta::apply`].
fn delta_towards(owner: &UserId, other: &UserId, current: Marking, target: Marking) -> EdgeDelta {
    let removals = RelationshipField::ALL
        .iter()
        .filter(|field| current.has(**field) && !target.has(**field));
    let additions = RelationshipField::ALL
        .iter()
        .filter(|field| !current.has(**field) && target.has(**field));

    let delta = removals.fold(EdgeDelta::new(owner.clone()), |d, field| {
        d.remove(*field, other)
    });
    additions.fold(delta, |d, field| d.add(*field, other))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::delta::DeltaApplication;

    fn uid(id: &str) -> UserId {
        UserId::new(id).unwrap()
    }

    fn apply(delta: &Option<EdgeDelta>, view: &Relationships) -> Relationships {
        match delta.as_ref().map(|d| d.apply(view)) {
            Some(DeltaApplication::Changed(next)) => next,
            Some(DeltaApplication::Unchanged) | None => view.clone(),
            Some(other) => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_consistent_edge_needs_no_repair() {
        let pair = PairKey::new(uid("a"), uid("b"));
        let mut a = Relationships::default();
        let mut b = Relationships::default();
        a.friends.insert(uid("b"));
        b.friends.insert(uid("a"));

        assert!(plan_repair(MutualRequestPolicy::AutoAccept, &pair, Some(&a), Some(&b)).is_none());
    }

    #[test]
    fn test_half_accept_promotes_to_friends() {
        let pair = PairKey::new(uid("a"), uid("b"));
        let mut a = Relationships::default();
        let mut b = Relationships::default();
        a.friends.insert(uid("b"));
        b.sent.insert(uid("a"));

        let plan =
            plan_repair(MutualRequestPolicy::AutoAccept, &pair, Some(&a), Some(&b)).unwrap();
        assert_eq!(plan.kind, RepairKind::RestoreFriends);
        assert_eq!(plan.after, EdgeState::Friends);
        assert!(plan.low.is_none());

        let b = apply(&plan.high, &b);
        assert_eq!(b.marking_for(&uid("a")), Marking::FRIEND);
    }

    #[test]
    fn test_half_request_completed() {
        let pair = PairKey::new(uid("a"), uid("b"));
        let a = Relationships::default();
        let mut b = Relationships::default();
        b.sent.insert(uid("a"));

        let plan =
            plan_repair(MutualRequestPolicy::AutoAccept, &pair, Some(&a), Some(&b)).unwrap();
        assert_eq!(plan.kind, RepairKind::RestoreRequest);
        assert_eq!(plan.after, EdgeState::RequestIncoming);

        let a = apply(&plan.low, &a);
        assert!(a.received.contains(&uid("b")));
    }

    #[test]
    fn test_mutual_requests_follow_policy() {
        let pair = PairKey::new(uid("a"), uid("b"));
        let mut a = Relationships::default();
        let mut b = Relationships::default();
        a.sent.insert(uid("b"));
        b.sent.insert(uid("a"));

        let accept =
            plan_repair(MutualRequestPolicy::AutoAccept, &pair, Some(&a), Some(&b)).unwrap();
        assert_eq!(accept.after, EdgeState::Friends);

        let lower =
            plan_repair(MutualRequestPolicy::LowerIdWins, &pair, Some(&a), Some(&b)).unwrap();
        assert_eq!(lower.after, EdgeState::RequestOutgoing);
        let b = apply(&lower.high, &b);
        assert_eq!(b.marking_for(&uid("a")), Marking::RECEIVED);
    }

    #[test]
    fn test_dangling_reference_removed() {
        let pair = PairKey::new(uid("a"), uid("ghost"));
        let mut a = Relationships::default();
        a.friends.insert(uid("ghost"));

        let plan = plan_repair(MutualRequestPolicy::AutoAccept, &pair, Some(&a), None).unwrap();
        assert_eq!(plan.kind, RepairKind::DanglingReference);
        assert!(apply(&plan.low, &a).is_empty());
    }

    #[test]
    fn test_self_reference_removed() {
        let pair = PairKey::new(uid("a"), uid("a"));
        let mut a = Relationships::default();
        a.sent.insert(uid("a"));

        let plan = plan_repair(MutualRequestPolicy::AutoAccept, &pair, Some(&a), None).unwrap();
        assert_eq!(plan.kind, RepairKind::SelfReference);
        assert!(apply(&plan.low, &a).is_empty());
    }
}
