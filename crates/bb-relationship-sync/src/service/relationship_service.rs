//! Relationship Service
//!
//! Implements [`RelationshipApi`] by wiring the guard, the state machine and
//! the propagator together. A counterpart write that cannot be completed in
//! line is journaled for the reconciler.

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::{MutualRequestPolicy, SyncConfig};
use crate::domain::{
    mutual_resolution_plan, EdgeDelta, EdgeState, PairKey, RejectReason, StoreError,
    SyncError, TransitionKind, TransitionPlan, UserId, UserRecord,
};
use crate::metrics::{MetricsRecorder, NoOpMetrics, WritePhase};
use crate::ports::{
    DeferredWrite, DocumentStore, IntentJournal, RelationshipApi, RelationshipView,
    TransitionOutcome, UserSummary,
};

use super::guard::{GuardDecision, IdempotencyGuard};
use super::propagator::{PropagationResult, Propagator};
use super::retry::{timed, with_retry};

/// Relationship service implementation.
pub struct RelationshipService<S: DocumentStore, J: IntentJournal> {
    store: Arc<S>,
    journal: Arc<J>,
    config: SyncConfig,
    guard: IdempotencyGuard<S>,
    propagator: Propagator<S>,
    metrics: Arc<dyn MetricsRecorder>,
}

impl<S: DocumentStore, J: IntentJournal> RelationshipService<S, J> {
    pub fn new(store: Arc<S>, journal: Arc<J>, config: SyncConfig) -> Self {
        Self::with_metrics(store, journal, config, Arc::new(NoOpMetrics))
    }

    pub fn with_metrics(
        store: Arc<S>,
        journal: Arc<J>,
        config: SyncConfig,
        metrics: Arc<dyn MetricsRecorder>,
    ) -> Self {
        Self {
            guard: IdempotencyGuard::new(store.clone(), &config),
            propagator: Propagator::new(store.clone(), &config, metrics.clone()),
            store,
            journal,
            config,
            metrics,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    async fn run_transition(
        &self,
        kind: TransitionKind,
        initiator: &UserId,
        counterpart: &UserId,
    ) -> Result<TransitionOutcome, SyncError> {
        let span = info_span!(
            "transition",
            kind = kind.as_str(),
            initiator = %initiator,
            counterpart = %counterpart
        );

        let result = async {
            match self.guard.check(kind, initiator, counterpart).await? {
                GuardDecision::Reject(reason) => {
                    debug!(reason = reason.as_str(), "transition rejected");
                    Ok(TransitionOutcome::rejected(reason))
                }
                GuardDecision::Proceed(plan) => self.execute(plan, false).await,
                GuardDecision::Resume(plan) => {
                    info!("initiator already at post-state, resuming counterpart write");
                    let outcome = self.execute(plan, true).await?;
                    if outcome.is_applied() {
                        self.settle_intents(initiator, counterpart).await;
                    }
                    Ok(outcome)
                }
                GuardDecision::ResolveMutual(plan) => {
                    info!("request met a pending request from the other side");
                    self.execute(plan, false).await
                }
            }
        }
        .instrument(span)
        .await;

        let label = match &result {
            Ok(outcome) => outcome.label(),
            Err(_) => "error",
        };
        self.metrics.record_transition(kind, label);
        result
    }

    /// Propagates `plan`, resolving at most one mutual-request collision.
    async fn execute(
        &self,
        plan: TransitionPlan,
        counterpart_only: bool,
    ) -> Result<TransitionOutcome, SyncError> {
        let initiator = plan.initiator_id().clone();
        let counterpart = plan.counterpart_id().clone();
        let mut plan = plan;
        let mut counterpart_only = counterpart_only;
        let mut resolving = false;

        loop {
            let result = if counterpart_only {
                self.propagator.propagate_counterpart(&plan).await
            } else {
                self.propagator.propagate(&plan).await
            };

            match result {
                PropagationResult::Completed if resolving => {
                    return Ok(self.mutual_outcome(&initiator, &counterpart));
                }
                PropagationResult::Completed => return Ok(TransitionOutcome::Applied),
                PropagationResult::InitiatorFailed(err) => return Err(store_error(err)),
                PropagationResult::PartyGone {
                    missing,
                    initiator_written,
                } => {
                    if initiator_written {
                        self.drop_dangling(&initiator, &missing).await;
                    }
                    return Ok(TransitionOutcome::rejected(RejectReason::PartyGone));
                }
                PropagationResult::CounterpartFailed(err) => {
                    return Ok(self.defer(&plan, err).await);
                }
                PropagationResult::MutualRequest { phase } if !resolving => {
                    info!(
                        phase = phase.as_str(),
                        policy = self.config.mutual_request_policy.as_str(),
                        "mutual request collision, resolving"
                    );
                    plan = mutual_resolution_plan(
                        self.config.mutual_request_policy,
                        &initiator,
                        &counterpart,
                    );
                    counterpart_only = false;
                    resolving = true;
                }
                PropagationResult::MutualRequest { .. } => {
                    warn!("mutual request persisted after resolution");
                    return Ok(TransitionOutcome::rejected(RejectReason::AlreadyRelated));
                }
            }
        }
    }

    fn mutual_outcome(&self, initiator: &UserId, counterpart: &UserId) -> TransitionOutcome {
        match self.config.mutual_request_policy {
            MutualRequestPolicy::AutoAccept => TransitionOutcome::Applied,
            MutualRequestPolicy::LowerIdWins if initiator < counterpart => {
                TransitionOutcome::Applied
            }
            MutualRequestPolicy::LowerIdWins => {
                TransitionOutcome::rejected(RejectReason::AlreadyRelated)
            }
        }
    }

    /// Journals the counterpart write of `plan` for the reconciler.
    async fn defer(&self, plan: &TransitionPlan, err: StoreError) -> TransitionOutcome {
        let write = DeferredWrite::new(
            plan.kind,
            plan.initiator_id().clone(),
            plan.counterpart.clone(),
        );

        match self.journal.record(&write).await {
            Ok(()) => {
                self.metrics.record_deferred();
                warn!(
                    intent = %write.id,
                    error = %err,
                    "counterpart write deferred to reconciliation"
                );
                TransitionOutcome::PartiallyApplied {
                    intent_id: Some(write.id),
                }
            }
            Err(journal_err) => {
                error!(
                    error = %err,
                    journal_error = %journal_err,
                    "counterpart write failed and could not be journaled; left to the scanner"
                );
                TransitionOutcome::PartiallyApplied { intent_id: None }
            }
        }
    }

    /// Resolves journal entries for the pair once a resumed write has brought
    /// both documents to the same state.
    async fn settle_intents(&self, a: &UserId, b: &UserId) {
        let pair = PairKey::new(a.clone(), b.clone());
        let pending = match self.journal.pending().await {
            Ok(pending) => pending,
            Err(err) => {
                debug!(error = %err, "journal unreadable, leaving intents to the reconciler");
                return;
            }
        };

        for write in pending
            .iter()
            .filter(|w| PairKey::new(w.initiator.clone(), w.counterpart().clone()) == pair)
        {
            match self.journal.resolve(&write.id).await {
                Ok(_) => debug!(intent = %write.id, "deferred write settled by resume"),
                Err(err) => debug!(intent = %write.id, error = %err, "could not settle intent"),
            }
        }
    }

    /// Removes every reference to a vanished counterpart from the initiator.
    async fn drop_dangling(&self, owner: &UserId, missing: &UserId) {
        let delta = EdgeDelta::new(owner.clone()).remove_everywhere(missing);
        if let Err(err) = self.propagator.write(&delta, WritePhase::Repair).await {
            warn!(
                owner = %owner,
                missing = %missing,
                error = %err,
                "could not drop reference to missing party"
            );
        }
    }

    async fn fetch_record(&self, id: &UserId) -> Result<UserRecord, SyncError> {
        self.try_fetch(id)
            .await?
            .ok_or_else(|| SyncError::Store(StoreError::NotFound(id.clone())))
    }

    async fn try_fetch(&self, id: &UserId) -> Result<Option<UserRecord>, SyncError> {
        let timeout = self.config.call_timeout();
        let result = with_retry(
            &self.config.retry,
            |_, _| {},
            || timed(timeout, self.store.fetch(id)),
        )
        .await;

        match result {
            Ok(snapshot) => Ok(Some(snapshot.record)),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(err) => Err(store_error(err)),
        }
    }

    async fn list_ids(&self) -> Result<Vec<UserId>, SyncError> {
        let timeout = self.config.call_timeout();
        with_retry(
            &self.config.retry,
            |_, _| {},
            || timed(timeout, self.store.list_ids()),
        )
        .await
        .map_err(store_error)
    }
}

fn store_error(err: StoreError) -> SyncError {
    if err.is_transient() {
        SyncError::Unavailable(err)
    } else {
        SyncError::Store(err)
    }
}

#[async_trait]
impl<S, J> RelationshipApi for RelationshipService<S, J>
where
    S: DocumentStore + 'static,
    J: IntentJournal + 'static,
{
    async fn send_request(
        &self,
        self_id: &UserId,
        other_id: &UserId,
    ) -> Result<TransitionOutcome, SyncError> {
        self.run_transition(TransitionKind::SendRequest, self_id, other_id)
            .await
    }

    async fn accept(
        &self,
        self_id: &UserId,
        other_id: &UserId,
    ) -> Result<TransitionOutcome, SyncError> {
        self.run_transition(TransitionKind::Accept, self_id, other_id)
            .await
    }

    async fn reject(
        &self,
        self_id: &UserId,
        other_id: &UserId,
    ) -> Result<TransitionOutcome, SyncError> {
        self.run_transition(TransitionKind::Reject, self_id, other_id)
            .await
    }

    async fn cancel(
        &self,
        self_id: &UserId,
        other_id: &UserId,
    ) -> Result<TransitionOutcome, SyncError> {
        self.run_transition(TransitionKind::Cancel, self_id, other_id)
            .await
    }

    async fn unfriend(
        &self,
        self_id: &UserId,
        other_id: &UserId,
    ) -> Result<TransitionOutcome, SyncError> {
        self.run_transition(TransitionKind::Unfriend, self_id, other_id)
            .await
    }

    async fn register_account(&self, user_id: &UserId, username: &str) -> Result<(), SyncError> {
        let record = UserRecord::new(user_id.clone(), username.trim());
        timed(self.config.call_timeout(), self.store.create(record))
            .await
            .map_err(store_error)?;
        info!(user = %user_id, "account registered");
        Ok(())
    }

    async fn relationship_view(&self, self_id: &UserId) -> Result<RelationshipView, SyncError> {
        let record = self.fetch_record(self_id).await?;
        Ok(RelationshipView::from_record(&record))
    }

    async fn discoverable_users(&self, self_id: &UserId) -> Result<Vec<UserSummary>, SyncError> {
        let me = self.fetch_record(self_id).await?;
        let hidden: BTreeSet<UserId> = me.relationships.referenced_ids();

        let candidates: Vec<UserId> = self
            .list_ids()
            .await?
            .into_iter()
            .filter(|id| id != self_id && !hidden.contains(id))
            .collect();

        let records: Vec<Option<UserRecord>> = stream::iter(candidates)
            .map(|id| async move { self.try_fetch(&id).await })
            .buffered(self.config.reconcile_concurrency)
            .try_collect()
            .await?;

        Ok(records
            .into_iter()
            .flatten()
            .filter(|record| !record.relationships.references(self_id))
            .map(|record| UserSummary {
                user_id: record.user_id,
                username: record.username,
            })
            .collect())
    }

    async fn feed_audience(&self, self_id: &UserId) -> Result<BTreeSet<UserId>, SyncError> {
        let record = self.fetch_record(self_id).await?;
        let mut audience = record.relationships.friends;
        audience.remove(self_id);
        audience.insert(self_id.clone());
        Ok(audience)
    }

    async fn edge_state(&self, self_id: &UserId, other_id: &UserId) -> Result<EdgeState, SyncError> {
        let me = self.fetch_record(self_id).await?;
        let other = self
            .try_fetch(other_id)
            .await?
            .map(|record| record.relationships)
            .unwrap_or_default();

        Ok(EdgeState::classify(
            self_id,
            &me.relationships,
            other_id,
            &other,
        ))
    }
}
