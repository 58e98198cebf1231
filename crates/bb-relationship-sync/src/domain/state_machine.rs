//! # Relationship State Machine
//!
//! Pure transition logic. Given the stored views of both parties and a
//! requested transition, computes the delta for each document or refuses.
//!
//! ```text
//!              SendRequest(A→B)
//! [Unrelated] ─────────────────→ [RequestOutgoing]
//!      ↑                               │
//!      ├──────── Cancel(A,B) ──────────┤
//!      ├──────── Reject(B,A) ──────────┤
//!      │                               │ Accept(B,A)
//!      │                               ↓
//!      └──────── Unfriend ─────────── [Friends]
//! ```
//!
//! Preconditions are evaluated on the initiator's stored document only.
//! Every removal is a no-op when the id is already absent.

use serde::{Deserialize, Serialize};

use super::delta::{DeltaApplication, EdgeDelta};
use super::entities::{
    Marking, RelationshipField, Relationships, TransitionKind, UserId, UserRecord,
};
use super::errors::RejectReason;

use RelationshipField::{Friends, ReceivedFriendRequests, SentFriendRequests};

/// How a pair that requested each other at the same time is settled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MutualRequestPolicy {
    /// Both parties asked, so both become friends.
    #[default]
    AutoAccept,
    /// The request sent by the lexicographically smaller id survives.
    LowerIdWins,
}

impl MutualRequestPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AutoAccept => "auto-accept",
            Self::LowerIdWins => "lower-id-wins",
        }
    }
}

/// The two document edits implied by one logical transition.
///
/// `initiator` is always written before `counterpart`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitionPlan {
    pub kind: TransitionKind,
    pub initiator: EdgeDelta,
    pub counterpart: EdgeDelta,
}

impl TransitionPlan {
    pub fn initiator_id(&self) -> &UserId {
        &self.initiator.owner
    }

    pub fn counterpart_id(&self) -> &UserId {
        &self.counterpart.owner
    }
}

/// Validates `kind` against the initiator's stored view and returns the plan.
pub fn transition(
    kind: TransitionKind,
    initiator: &UserRecord,
    counterpart: &UserRecord,
) -> Result<TransitionPlan, RejectReason> {
    let a = &initiator.user_id;
    let b = &counterpart.user_id;
    if a == b {
        return Err(RejectReason::SelfReference);
    }

    let marking = initiator.relationships.marking_for(b);
    match kind {
        TransitionKind::SendRequest => {
            if !marking.is_none() {
                return Err(RejectReason::AlreadyRelated);
            }
        }
        TransitionKind::Accept | TransitionKind::Reject => {
            if !marking.received {
                return Err(RejectReason::NotInRequestedState);
            }
        }
        TransitionKind::Cancel => {
            if !marking.sent {
                return Err(RejectReason::NotInRequestedState);
            }
        }
        TransitionKind::Unfriend => {
            if !marking.friend {
                return Err(RejectReason::NotInRequestedState);
            }
        }
    }

    Ok(effects(kind, a, b))
}

/// The deltas of `kind` without any precondition check.
pub fn effects(kind: TransitionKind, a: &UserId, b: &UserId) -> TransitionPlan {
    let (initiator, counterpart) = match kind {
        TransitionKind::SendRequest => (
            EdgeDelta::new(a.clone()).add(SentFriendRequests, b),
            EdgeDelta::new(b.clone()).add(ReceivedFriendRequests, a),
        ),
        TransitionKind::Accept => (
            EdgeDelta::new(a.clone())
                .remove(ReceivedFriendRequests, b)
                .add(Friends, b),
            EdgeDelta::new(b.clone())
                .remove(SentFriendRequests, a)
                .add(Friends, a),
        ),
        TransitionKind::Reject => (
            EdgeDelta::new(a.clone()).remove(ReceivedFriendRequests, b),
            EdgeDelta::new(b.clone()).remove(SentFriendRequests, a),
        ),
        TransitionKind::Cancel => (
            EdgeDelta::new(a.clone()).remove(SentFriendRequests, b),
            EdgeDelta::new(b.clone()).remove(ReceivedFriendRequests, a),
        ),
        TransitionKind::Unfriend => (
            EdgeDelta::new(a.clone()).remove(Friends, b),
            EdgeDelta::new(b.clone()).remove(Friends, a),
        ),
    };

    TransitionPlan {
        kind,
        initiator,
        counterpart,
    }
}

/// Whether the initiator's marking already equals the post-state of `kind`.
pub fn initiator_post_state_reached(kind: TransitionKind, marking: Marking) -> bool {
    match kind {
        TransitionKind::SendRequest => marking == Marking::SENT,
        TransitionKind::Accept => marking == Marking::FRIEND,
        TransitionKind::Reject | TransitionKind::Cancel | TransitionKind::Unfriend => {
            marking.is_none()
        }
    }
}

/// Whether a journaled counterpart `delta` still completes the edge the
/// initiator currently holds.
///
/// A later transition on the pair moves the initiator away from the marking
/// the delta mirrors, and replaying it then would revive a superseded edge.
pub fn deferred_write_current(delta: &EdgeDelta, initiator: &UserId, held: Marking) -> bool {
    let target = match delta.apply(&Relationships::default()) {
        DeltaApplication::Changed(next) => next.marking_for(initiator),
        _ => Marking::NONE,
    };
    held == target.mirrored()
}

/// Rewrites `owner`'s view of `other` to mirror the marking `other` holds.
pub fn mirror_delta(owner: &UserId, other: &UserId, held: Marking) -> EdgeDelta {
    let target = held.mirrored();
    RelationshipField::ALL
        .iter()
        .filter(|field| target.has(**field))
        .fold(EdgeDelta::new(owner.clone()).remove_everywhere(other), |delta, field| {
            delta.add(*field, other)
        })
}

/// Whether either document shows a pending request from `b` to `a`.
pub fn has_incoming_request(a: &UserRecord, b: &UserRecord) -> bool {
    a.relationships.received.contains(&b.user_id) || b.relationships.sent.contains(&a.user_id)
}

/// Settles an edge on which both parties requested each other.
///
/// The plan is the same whichever side computes it, so concurrent resolvers
/// converge.
pub fn mutual_resolution_plan(
    policy: MutualRequestPolicy,
    initiator: &UserId,
    counterpart: &UserId,
) -> TransitionPlan {
    let clear_requests = |owner: &UserId, other: &UserId| {
        EdgeDelta::new(owner.clone())
            .remove(SentFriendRequests, other)
            .remove(ReceivedFriendRequests, other)
    };

    match policy {
        MutualRequestPolicy::AutoAccept => TransitionPlan {
            kind: TransitionKind::Accept,
            initiator: clear_requests(initiator, counterpart).add(Friends, counterpart),
            counterpart: clear_requests(counterpart, initiator).add(Friends, initiator),
        },
        MutualRequestPolicy::LowerIdWins => {
            let winner_delta = |owner: &UserId, other: &UserId| {
                EdgeDelta::new(owner.clone())
                    .remove(ReceivedFriendRequests, other)
                    .add(SentFriendRequests, other)
            };
            let loser_delta = |owner: &UserId, other: &UserId| {
                EdgeDelta::new(owner.clone())
                    .remove(SentFriendRequests, other)
                    .add(ReceivedFriendRequests, other)
            };

            let initiator_wins = initiator < counterpart;
            let (first, second) = if initiator_wins {
                (
                    winner_delta(initiator, counterpart),
                    loser_delta(counterpart, initiator),
                )
            } else {
                (
                    loser_delta(initiator, counterpart),
                    winner_delta(counterpart, initiator),
                )
            };

            TransitionPlan {
                kind: TransitionKind::SendRequest,
                initiator: first,
                counterpart: second,
            }
        }
    }
}
