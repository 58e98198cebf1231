//! # Idempotency & Dedup Guard
//!
//! Every transition is evaluated against freshly fetched documents, never a
//! cached view. A repeated call observes the effect of the first one and
//! either becomes a rejection or resumes the write that is still missing.
//!
//! | Fresh state | Decision |
//! |-------------|----------|
//! | preconditions hold | `Proceed` |
//! | `SendRequest` facing a request from the other side | `ResolveMutual` or `Reject` per policy |
//! | initiator already at post-state, counterpart lagging | `Resume` |
//! | anything else | `Reject` |

use std::sync::Arc;
use std::time::Duration;

use crate::config::{MutualRequestPolicy, RetryPolicy, SyncConfig};
use crate::domain::{
    effects, has_incoming_request, initiator_post_state_reached, mutual_resolution_plan,
    transition, DeltaApplication, RejectReason, StoreError, SyncError, TransitionKind,
    TransitionPlan, UserId, UserRecord,
};
use crate::ports::DocumentStore;

use super::retry::{timed, with_retry};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardDecision {
    /// Write both documents.
    Proceed(TransitionPlan),
    /// The initiator already shows the post-state; write the counterpart only.
    Resume(TransitionPlan),
    /// Both parties requested each other; write the resolution plan.
    ResolveMutual(TransitionPlan),
    Reject(RejectReason),
}

/// Decides what a transition should do given fresh views of both parties.
pub fn evaluate(
    policy: MutualRequestPolicy,
    kind: TransitionKind,
    initiator: &UserRecord,
    counterpart: &UserRecord,
) -> GuardDecision {
    let reason = match transition(kind, initiator, counterpart) {
        Ok(plan) => return GuardDecision::Proceed(plan),
        Err(reason) => reason,
    };
    if reason == RejectReason::SelfReference {
        return GuardDecision::Reject(reason);
    }

    let a = &initiator.user_id;
    let b = &counterpart.user_id;
    let marking = initiator.relationships.marking_for(b);

    if kind == TransitionKind::SendRequest
        && !marking.friend
        && has_incoming_request(initiator, counterpart)
    {
        return match policy {
            MutualRequestPolicy::AutoAccept => {
                GuardDecision::ResolveMutual(mutual_resolution_plan(policy, a, b))
            }
            MutualRequestPolicy::LowerIdWins => GuardDecision::Reject(RejectReason::AlreadyRelated),
        };
    }

    if initiator_post_state_reached(kind, marking) {
        let plan = effects(kind, a, b);
        if let DeltaApplication::Changed(_) = plan.counterpart.apply(&counterpart.relationships) {
            return GuardDecision::Resume(plan);
        }
    }

    GuardDecision::Reject(reason)
}

/// Fetches both parties and evaluates the transition.
pub struct IdempotencyGuard<S: DocumentStore> {
    store: Arc<S>,
    policy: MutualRequestPolicy,
    retry: RetryPolicy,
    call_timeout: Duration,
}

impl<S: DocumentStore> IdempotencyGuard<S> {
    pub fn new(store: Arc<S>, config: &SyncConfig) -> Self {
        Self {
            store,
            policy: config.mutual_request_policy,
            retry: config.retry.clone(),
            call_timeout: config.call_timeout(),
        }
    }

    /// # Errors
    /// - `SyncError::Unavailable`: a fetch kept failing; nothing was written
    /// - `SyncError::Store`: a non-transient store failure
    pub async fn check(
        &self,
        kind: TransitionKind,
        initiator: &UserId,
        counterpart: &UserId,
    ) -> Result<GuardDecision, SyncError> {
        if initiator == counterpart {
            return Ok(GuardDecision::Reject(RejectReason::SelfReference));
        }

        let a = match self.fetch(initiator).await? {
            Some(record) => record,
            None => return Ok(GuardDecision::Reject(RejectReason::PartyGone)),
        };
        let b = match self.fetch(counterpart).await? {
            Some(record) => record,
            None => return Ok(GuardDecision::Reject(RejectReason::PartyGone)),
        };

        Ok(evaluate(self.policy, kind, &a, &b))
    }

    async fn fetch(&self, id: &UserId) -> Result<Option<UserRecord>, SyncError> {
        let result = with_retry(
            &self.retry,
            |_, _| {},
            || timed(self.call_timeout, self.store.fetch(id)),
        )
        .await;

        match result {
            Ok(snapshot) => Ok(Some(snapshot.record)),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(err) if err.is_transient() => Err(SyncError::Unavailable(err)),
            Err(err) => Err(SyncError::Store(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Marking;

    fn record(id: &str) -> UserRecord {
        UserRecord::new(UserId::new(id).unwrap(), id)
    }

    #[test]
    fn test_fresh_preconditions_proceed() {
        let (a, b) = (record("a"), record("b"));
        assert!(matches!(
            evaluate(MutualRequestPolicy::AutoAccept, TransitionKind::SendRequest, &a, &b),
            GuardDecision::Proceed(_)
        ));
    }

    #[test]
    fn test_duplicate_send_rejected() {
        let (mut a, mut b) = (record("a"), record("b"));
        a.relationships.sent.insert(b.user_id.clone());
        b.relationships.received.insert(a.user_id.clone());

        assert_eq!(
            evaluate(MutualRequestPolicy::AutoAccept, TransitionKind::SendRequest, &a, &b),
            GuardDecision::Reject(RejectReason::AlreadyRelated)
        );
    }

    #[test]
    fn test_half_applied_send_resumes() {
        let (mut a, b) = (record("a"), record("b"));
        a.relationships.sent.insert(b.user_id.clone());

        match evaluate(MutualRequestPolicy::AutoAccept, TransitionKind::SendRequest, &a, &b) {
            GuardDecision::Resume(plan) => assert_eq!(plan.counterpart.owner, b.user_id),
            other => panic!("expected resume, got {:?}", other),
        }
    }

    #[test]
    fn test_half_applied_unfriend_resumes() {
        let (a, mut b) = (record("a"), record("b"));
        b.relationships.friends.insert(a.user_id.clone());

        assert!(matches!(
            evaluate(MutualRequestPolicy::AutoAccept, TransitionKind::Unfriend, &a, &b),
            GuardDecision::Resume(_)
        ));
    }

    #[test]
    fn test_unrelated_unfriend_rejected() {
        let (a, mut b) = (record("a"), record("b"));
        b.relationships.sent.insert(a.user_id.clone());

        assert_eq!(
            evaluate(MutualRequestPolicy::AutoAccept, TransitionKind::Unfriend, &a, &b),
            GuardDecision::Reject(RejectReason::NotInRequestedState)
        );
    }

    #[test]
    fn test_send_against_incoming_request_follows_policy() {
        let (mut a, mut b) = (record("a"), record("b"));
        a.relationships.received.insert(b.user_id.clone());
        b.relationships.sent.insert(a.user_id.clone());

        match evaluate(MutualRequestPolicy::AutoAccept, TransitionKind::SendRequest, &a, &b) {
            GuardDecision::ResolveMutual(plan) => {
                let DeltaApplication::Changed(next) = plan.initiator.apply(&a.relationships) else {
                    panic!("resolution should change the initiator");
                };
                assert_eq!(next.marking_for(&b.user_id), Marking::FRIEND);
            }
            other => panic!("expected mutual resolution, got {:?}", other),
        }

        assert_eq!(
            evaluate(MutualRequestPolicy::LowerIdWins, TransitionKind::SendRequest, &a, &b),
            GuardDecision::Reject(RejectReason::AlreadyRelated)
        );
    }
}
