//! # Reconciliation Scanner
//!
//! Backstop for drift the propagator could not correct in line.
//!
//! A run has two passes:
//!
//! 1. **Replay**: every journaled counterpart write is re-applied, completing
//!    the transition it belongs to. A write whose initiator has since moved
//!    to another marking is dropped, and the counterpart is aligned with the
//!    initiator's current marking instead.
//! 2. **Scan**: every edge referenced by any document is re-read under a
//!    per-pair lock and repaired with [`plan_repair`] when inconsistent.
//!
//! Disjoint pairs are repaired concurrently, bounded by
//! `reconcile_concurrency`. Two runs never touch the same pair at once.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{watch, OwnedMutexGuard};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::domain::{
    deferred_write_current, mirror_delta, mutual_resolution_plan, plan_repair, EdgeDelta, EdgeState, PairKey,
    Relationships, RepairKind, StoreError, SyncError, UserId,
};
use crate::metrics::{MetricsRecorder, NoOpMetrics, WritePhase};
use crate::ports::{DeferredWrite, DocumentStore, IntentJournal};

use super::propagator::{PropagationResult, Propagator, WriteOutcome};
use super::retry::{timed, with_retry};

/// In-process locks keyed by edge.
#[derive(Default)]
pub struct PairLocks {
    locks: Mutex<HashMap<PairKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl PairLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, pair: &PairKey) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .lock()
            .entry(pair.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Drops locks nobody holds or waits on.
    pub fn prune(&self) {
        self.locks
            .lock()
            .retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.lock().is_empty()
    }
}

/// One repaired (or, in a dry run, repairable) edge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairRecord {
    pub low: UserId,
    pub high: UserId,
    pub kind: RepairKind,
    /// Seen from `low`.
    pub before: EdgeState,
    pub after: EdgeState,
    pub applied: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileFailure {
    /// A pair key (`low|high`), an intent id or a user id.
    pub subject: String,
    pub error: String,
}

/// Audit trail of one reconciliation run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub dry_run: bool,
    pub replayed_intents: usize,
    /// Journal entries dropped because a later transition superseded them.
    pub superseded_intents: usize,
    /// Journal entries still pending after the run.
    pub pending_intents: usize,
    pub pairs_checked: usize,
    pub repairs: Vec<RepairRecord>,
    pub failures: Vec<ReconcileFailure>,
}

impl ReconciliationReport {
    fn new(dry_run: bool) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            dry_run,
            replayed_intents: 0,
            superseded_intents: 0,
            pending_intents: 0,
            pairs_checked: 0,
            repairs: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.repairs.is_empty() && self.failures.is_empty() && self.pending_intents == 0
    }

    fn fail(&mut self, subject: impl ToString, error: impl ToString) {
        self.failures.push(ReconcileFailure {
            subject: subject.to_string(),
            error: error.to_string(),
        });
    }
}

enum ReplayOutcome {
    Completed,
    Superseded,
    Failed(StoreError),
}

/// Detects and repairs asymmetric relationship state.
pub struct Reconciler<S: DocumentStore, J: IntentJournal> {
    store: Arc<S>,
    journal: Arc<J>,
    config: SyncConfig,
    propagator: Propagator<S>,
    locks: Arc<PairLocks>,
    metrics: Arc<dyn MetricsRecorder>,
    dry_run: bool,
}

impl<S: DocumentStore, J: IntentJournal> Reconciler<S, J> {
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
            propagator: Propagator::new(store.clone(), &config, metrics.clone()),
            store,
            journal,
            config,
            locks: Arc::new(PairLocks::new()),
            metrics,
            dry_run: false,
        }
    }

    /// Shares pair locks with another reconciler over the same store.
    pub fn with_locks(mut self, locks: Arc<PairLocks>) -> Self {
        self.locks = locks;
        self
    }

    /// Report what would be repaired without writing.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn locks(&self) -> &Arc<PairLocks> {
        &self.locks
    }

    /// Replays the journal, then scans and repairs every referenced edge.
    ///
    /// # Errors
    /// - `SyncError::Config`: the configuration is invalid
    /// - `SyncError::Journal`: the journal could not be read
    /// - `SyncError::Unavailable`/`Store`: the document ids could not be listed
    pub async fn run_once(&self) -> Result<ReconciliationReport, SyncError> {
        self.config.validate()?;
        let mut report = ReconciliationReport::new(self.dry_run);
        info!(run_id = %report.run_id, dry_run = self.dry_run, "reconciliation started");

        self.replay_journal(&mut report).await?;
        let pairs = self.collect_pairs(&mut report).await?;
        report.pairs_checked = pairs.len();

        let results: Vec<(PairKey, Result<Option<RepairRecord>, StoreError>)> =
            stream::iter(pairs)
                .map(|pair| async move {
                    let result = self.reconcile_pair(&pair).await;
                    (pair, result)
                })
                .buffer_unordered(self.config.reconcile_concurrency)
                .collect()
                .await;

        for (pair, result) in results {
            match result {
                Ok(Some(record)) => report.repairs.push(record),
                Ok(None) => {}
                Err(err) => report.fail(&pair, err),
            }
        }
        report.repairs.sort_by(|a, b| (&a.low, &a.high).cmp(&(&b.low, &b.high)));
        self.locks.prune();

        info!(
            run_id = %report.run_id,
            pairs = report.pairs_checked,
            repairs = report.repairs.len(),
            replayed = report.replayed_intents,
            superseded = report.superseded_intents,
            failures = report.failures.len(),
            "reconciliation finished"
        );
        Ok(report)
    }

    /// Runs [`Self::run_once`] every `reconcile_interval` until `shutdown`
    /// turns true or its sender is dropped.
    ///
    /// Fails with `SyncError::Config` before the first run when the
    /// configuration is invalid.
    pub async fn run_periodic(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), SyncError> {
        self.config.validate()?;
        let mut ticker = tokio::time::interval(self.config.reconcile_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.run_once().await {
                        error!(error = %err, "reconciliation run failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("reconciler shutting down");
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    async fn replay_journal(&self, report: &mut ReconciliationReport) -> Result<(), SyncError> {
        let pending = self.journal.pending().await.map_err(SyncError::Journal)?;
        if self.dry_run {
            report.pending_intents = pending.len();
            return Ok(());
        }

        for write in pending {
            let pair = PairKey::new(write.initiator.clone(), write.counterpart().clone());
            let _guard = self.locks.lock(&pair).await;

            match self.replay(&write).await {
                ReplayOutcome::Completed => {
                    if let Err(err) = self.journal.resolve(&write.id).await {
                        report.fail(write.id, err);
                        report.pending_intents += 1;
                        continue;
                    }
                    report.replayed_intents += 1;
                    info!(
                        intent = %write.id,
                        kind = write.kind.as_str(),
                        initiator = %write.initiator,
                        counterpart = %write.counterpart(),
                        "deferred write replayed"
                    );
                }
                ReplayOutcome::Superseded => {
                    if let Err(err) = self.journal.resolve(&write.id).await {
                        report.fail(write.id, err);
                        report.pending_intents += 1;
                        continue;
                    }
                    report.superseded_intents += 1;
                    info!(
                        intent = %write.id,
                        kind = write.kind.as_str(),
                        initiator = %write.initiator,
                        counterpart = %write.counterpart(),
                        "deferred write superseded, dropped"
                    );
                }
                ReplayOutcome::Failed(err) => {
                    warn!(intent = %write.id, error = %err, "deferred write replay failed");
                    if let Err(journal_err) = self.journal.mark_attempted(&write.id).await {
                        debug!(intent = %write.id, error = %journal_err, "could not count attempt");
                    }
                    report.fail(write.id, err);
                    report.pending_intents += 1;
                }
            }
        }
        Ok(())
    }

    async fn replay(&self, write: &DeferredWrite) -> ReplayOutcome {
        // The initiator's current marking decides whether the write still applies.
        let held = match self.fetch_optional(&write.initiator).await {
            Ok(Some(relationships)) => relationships.marking_for(write.counterpart()),
            // The scan drops whatever still points at the missing record.
            Ok(None) => return ReplayOutcome::Superseded,
            Err(err) => return ReplayOutcome::Failed(err),
        };
        if !deferred_write_current(&write.delta, &write.initiator, held) {
            // A later transition moved the initiator; bring the counterpart
            // in line with it instead of reviving the old edge.
            if held.count() <= 1 {
                let align = mirror_delta(write.counterpart(), &write.initiator, held);
                match self.propagator.write(&align, WritePhase::Repair).await {
                    Ok(_) | Err(StoreError::NotFound(_)) => {}
                    Err(err) => return ReplayOutcome::Failed(err),
                }
            }
            return ReplayOutcome::Superseded;
        }

        match self.propagator.write(&write.delta, WritePhase::Repair).await {
            Ok(WriteOutcome::Written { .. }) | Ok(WriteOutcome::AlreadyApplied) => {
                ReplayOutcome::Completed
            }
            // The scan drops whatever still points at the missing record.
            Err(StoreError::NotFound(_)) => ReplayOutcome::Completed,
            Ok(WriteOutcome::MutualRequest { .. }) => {
                let plan = mutual_resolution_plan(
                    self.config.mutual_request_policy,
                    &write.initiator,
                    write.counterpart(),
                );
                match self.propagator.propagate(&plan).await {
                    PropagationResult::Completed | PropagationResult::PartyGone { .. } => {
                        ReplayOutcome::Completed
                    }
                    PropagationResult::InitiatorFailed(err)
                    | PropagationResult::CounterpartFailed(err) => ReplayOutcome::Failed(err),
                    PropagationResult::MutualRequest { .. } => ReplayOutcome::Failed(
                        StoreError::Unavailable("mutual request persisted".into()),
                    ),
                }
            }
            Err(err) => ReplayOutcome::Failed(err),
        }
    }

    /// Every edge named by any stored document, self-pairs included.
    async fn collect_pairs(
        &self,
        report: &mut ReconciliationReport,
    ) -> Result<BTreeSet<PairKey>, SyncError> {
        let ids = self.call(|| self.store.list_ids()).await.map_err(|err| {
            if err.is_transient() {
                SyncError::Unavailable(err)
            } else {
                SyncError::Store(err)
            }
        })?;

        let mut pairs = BTreeSet::new();
        for id in ids {
            match self.call(|| self.store.fetch(&id)).await {
                Ok(snapshot) => {
                    for other in snapshot.record.relationships.referenced_ids() {
                        pairs.insert(PairKey::new(id.clone(), other));
                    }
                }
                Err(StoreError::NotFound(_)) => {}
                Err(err) => report.fail(&id, err),
            }
        }
        Ok(pairs)
    }

    async fn reconcile_pair(&self, pair: &PairKey) -> Result<Option<RepairRecord>, StoreError> {
        let _guard = self.locks.lock(pair).await;

        let low = self.fetch_optional(pair.low()).await?;
        let high = if pair.is_self_pair() {
            None
        } else {
            self.fetch_optional(pair.high()).await?
        };

        let plan = match plan_repair(
            self.config.mutual_request_policy,
            pair,
            low.as_ref(),
            high.as_ref(),
        ) {
            Some(plan) => plan,
            None => return Ok(None),
        };

        warn!(
            pair = %pair,
            repair = plan.kind.as_str(),
            before = plan.before.as_str(),
            after = plan.after.as_str(),
            dry_run = self.dry_run,
            "repairing drifted edge"
        );

        if !self.dry_run {
            for delta in [&plan.low, &plan.high].into_iter().flatten() {
                self.write_repair(delta).await?;
            }
            self.metrics.record_repair(plan.kind);
        }

        Ok(Some(RepairRecord {
            low: pair.low().clone(),
            high: pair.high().clone(),
            kind: plan.kind,
            before: plan.before,
            after: plan.after,
            applied: !self.dry_run,
        }))
    }

    async fn write_repair(&self, delta: &EdgeDelta) -> Result<(), StoreError> {
        match self.propagator.write(delta, WritePhase::Repair).await? {
            WriteOutcome::MutualRequest { other } => Err(StoreError::Unavailable(format!(
                "reverse request from {} appeared during repair",
                other
            ))),
            _ => Ok(()),
        }
    }

    async fn fetch_optional(&self, id: &UserId) -> Result<Option<Relationships>, StoreError> {
        match self.call(|| self.store.fetch(id)).await {
            Ok(snapshot) => Ok(Some(snapshot.record.relationships)),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn call<T, F, Fut>(&self, op: F) -> Result<T, StoreError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, StoreError>>,
    {
        let timeout = self.config.call_timeout();
        with_retry(&self.config.retry, |_, _| {}, || timed(timeout, op())).await
    }
}
