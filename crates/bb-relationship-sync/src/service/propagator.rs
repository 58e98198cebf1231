//! # Two-Phase Propagator
//!
//! Writes the two document edits of a transition in a fixed order:
//! initiator first, counterpart second. Each edit is a single-document
//! read-modify-write guarded by the revision it was read at.
//!
//! ```text
//! fetch(owner) ──→ delta.apply ──→ update_fields(expected_revision)
//!      ↑                                   │
//!      └──────── Conflict / Unavailable ───┘   (bounded backoff)
//! ```
//!
//! Deltas are idempotent, so a retried write that already landed is a no-op.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{RetryPolicy, SyncConfig};
use crate::domain::{DeltaApplication, EdgeDelta, RecordPatch, StoreError, TransitionPlan, UserId};
use crate::metrics::{MetricsRecorder, WritePhase};
use crate::ports::DocumentStore;

use super::retry::{timed, with_retry};

/// Outcome of writing one delta.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    Written { revision: u64 },
    /// The document already reflected the delta; nothing was written.
    AlreadyApplied,
    /// The document holds the reverse request; nothing was written.
    MutualRequest { other: UserId },
}

/// Outcome of propagating a whole transition plan.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PropagationResult {
    Completed,
    /// The initiator write failed; nothing was written.
    InitiatorFailed(StoreError),
    /// One of the two documents does not exist.
    PartyGone { missing: UserId, initiator_written: bool },
    /// A reverse request was found while writing `phase`.
    MutualRequest { phase: WritePhase },
    /// The initiator write landed, the counterpart write exhausted its retries.
    CounterpartFailed(StoreError),
}

/// Applies deltas against a [`DocumentStore`] with retry and timeouts.
pub struct Propagator<S: DocumentStore> {
    store: Arc<S>,
    retry: RetryPolicy,
    call_timeout: Duration,
    metrics: Arc<dyn MetricsRecorder>,
}

impl<S: DocumentStore> Propagator<S> {
    pub fn new(store: Arc<S>, config: &SyncConfig, metrics: Arc<dyn MetricsRecorder>) -> Self {
        Self {
            store,
            retry: config.retry.clone(),
            call_timeout: config.call_timeout(),
            metrics,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Writes `delta` to its owner's document, retrying transient failures.
    pub async fn write(
        &self,
        delta: &EdgeDelta,
        phase: WritePhase,
    ) -> Result<WriteOutcome, StoreError> {
        let on_retry = |attempt: u32, err: &StoreError| {
            self.metrics.record_retry(phase);
            debug!(
                owner = %delta.owner,
                phase = phase.as_str(),
                attempt,
                error = %err,
                "retrying document write"
            );
        };

        with_retry(&self.retry, on_retry, || self.write_once(delta)).await
    }

    async fn write_once(&self, delta: &EdgeDelta) -> Result<WriteOutcome, StoreError> {
        let snapshot = timed(self.call_timeout, self.store.fetch(&delta.owner)).await?;

        let next = match delta.apply(&snapshot.record.relationships) {
            DeltaApplication::Unchanged => return Ok(WriteOutcome::AlreadyApplied),
            DeltaApplication::MutualRequest { other } => {
                return Ok(WriteOutcome::MutualRequest { other })
            }
            DeltaApplication::Changed(next) => next,
        };

        let patch = RecordPatch::from_diff(&snapshot.record.relationships, &next);
        let revision = timed(
            self.call_timeout,
            self.store
                .update_fields(&delta.owner, &patch, Some(snapshot.revision)),
        )
        .await?;

        Ok(WriteOutcome::Written { revision })
    }

    /// Writes the initiator delta, then the counterpart delta.
    pub async fn propagate(&self, plan: &TransitionPlan) -> PropagationResult {
        match self.write(&plan.initiator, WritePhase::Initiator).await {
            Ok(WriteOutcome::MutualRequest { .. }) => {
                return PropagationResult::MutualRequest {
                    phase: WritePhase::Initiator,
                }
            }
            Ok(_) => {}
            Err(StoreError::NotFound(missing)) => {
                return PropagationResult::PartyGone {
                    missing,
                    initiator_written: false,
                }
            }
            Err(err) => {
                warn!(
                    initiator = %plan.initiator_id(),
                    counterpart = %plan.counterpart_id(),
                    kind = plan.kind.as_str(),
                    error = %err,
                    "initiator write failed"
                );
                return PropagationResult::InitiatorFailed(err);
            }
        }

        self.propagate_counterpart(plan).await
    }

    /// Writes only the counterpart delta of `plan`.
    pub async fn propagate_counterpart(&self, plan: &TransitionPlan) -> PropagationResult {
        match self.write(&plan.counterpart, WritePhase::Counterpart).await {
            Ok(WriteOutcome::MutualRequest { .. }) => PropagationResult::MutualRequest {
                phase: WritePhase::Counterpart,
            },
            Ok(_) => PropagationResult::Completed,
            Err(StoreError::NotFound(missing)) => PropagationResult::PartyGone {
                missing,
                initiator_written: true,
            },
            Err(err) => {
                warn!(
                    initiator = %plan.initiator_id(),
                    counterpart = %plan.counterpart_id(),
                    kind = plan.kind.as_str(),
                    attempts = self.retry.max_attempts,
                    error = %err,
                    "counterpart write exhausted retries"
                );
                PropagationResult::CounterpartFailed(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{FaultInjectingStore, InMemoryDocumentStore, StoreCall};
    use crate::domain::{effects, Marking, TransitionKind, UserRecord};
    use crate::metrics::Metrics;

    fn uid(id: &str) -> UserId {
        UserId::new(id).unwrap()
    }

    fn seeded() -> Arc<FaultInjectingStore<InMemoryDocumentStore>> {
        let inner = InMemoryDocumentStore::new();
        inner.insert_record(UserRecord::new(uid("a"), "A"));
        inner.insert_record(UserRecord::new(uid("b"), "B"));
        Arc::new(FaultInjectingStore::new(inner))
    }

    fn propagator(
        store: Arc<FaultInjectingStore<InMemoryDocumentStore>>,
        metrics: Arc<Metrics>,
    ) -> Propagator<FaultInjectingStore<InMemoryDocumentStore>> {
        Propagator::new(store, &SyncConfig::default(), metrics)
    }

    #[tokio::test(start_paused = true)]
    async fn test_both_writes_applied_in_order() {
        let store = seeded();
        let p = propagator(store.clone(), Arc::new(Metrics::new()));
        let plan = effects(TransitionKind::SendRequest, &uid("a"), &uid("b"));

        assert_eq!(p.propagate(&plan).await, PropagationResult::Completed);

        let a = store.inner().get_record(&uid("a")).unwrap();
        let b = store.inner().get_record(&uid("b")).unwrap();
        assert_eq!(a.relationships.marking_for(&uid("b")), Marking::SENT);
        assert_eq!(b.relationships.marking_for(&uid("a")), Marking::RECEIVED);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_write_retried_then_succeeds() {
        let store = seeded();
        let metrics = Arc::new(Metrics::new());
        let p = propagator(store.clone(), metrics.clone());
        store.fail_updates(&uid("b"), 2);

        let plan = effects(TransitionKind::SendRequest, &uid("a"), &uid("b"));
        assert_eq!(p.propagate(&plan).await, PropagationResult::Completed);
        assert_eq!(store.call_count(&uid("b"), StoreCall::Update), 3);
        assert_eq!(metrics.snapshot().write_retries, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_write_exhausts_budget() {
        let store = seeded();
        let p = propagator(store.clone(), Arc::new(Metrics::new()));
        store.fail_updates(&uid("b"), 10);

        let plan = effects(TransitionKind::SendRequest, &uid("a"), &uid("b"));
        assert!(matches!(
            p.propagate(&plan).await,
            PropagationResult::CounterpartFailed(StoreError::Unavailable(_))
        ));
        assert_eq!(store.call_count(&uid("b"), StoreCall::Update), 5);

        let a = store.inner().get_record(&uid("a")).unwrap();
        assert!(a.relationships.sent.contains(&uid("b")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_write_failure_writes_nothing() {
        let store = seeded();
        let p = propagator(store.clone(), Arc::new(Metrics::new()));
        store.fail_updates(&uid("a"), 10);

        let plan = effects(TransitionKind::SendRequest, &uid("a"), &uid("b"));
        assert!(matches!(
            p.propagate(&plan).await,
            PropagationResult::InitiatorFailed(_)
        ));
        assert_eq!(store.call_count(&uid("b"), StoreCall::Fetch), 0);
        assert!(store.inner().get_record(&uid("b")).unwrap().relationships.is_empty());
    }

    #[tokio::test]
    async fn test_missing_counterpart_is_party_gone() {
        let store = seeded();
        store.inner().remove_record(&uid("b"));
        let p = propagator(store.clone(), Arc::new(Metrics::new()));

        let plan = effects(TransitionKind::SendRequest, &uid("a"), &uid("b"));
        assert_eq!(
            p.propagate(&plan).await,
            PropagationResult::PartyGone {
                missing: uid("b"),
                initiator_written: true,
            }
        );
    }

    #[tokio::test]
    async fn test_rewrite_of_applied_delta_is_noop() {
        let store = seeded();
        let p = propagator(store.clone(), Arc::new(Metrics::new()));
        let plan = effects(TransitionKind::SendRequest, &uid("a"), &uid("b"));

        p.propagate(&plan).await;
        assert_eq!(
            p.write(&plan.initiator, WritePhase::Initiator).await,
            Ok(WriteOutcome::AlreadyApplied)
        );
    }
}
