//! Account-deletion sweep.
//!
//! Removes a deleted user's id from the relationship sets of every other
//! document. Each document is one independent, idempotent write; a failed
//! document is reported and the sweep carries on.

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::SyncConfig;
use crate::domain::{EdgeDelta, StoreError, SyncError, UserId};
use crate::metrics::{MetricsRecorder, NoOpMetrics, WritePhase};
use crate::ports::DocumentStore;

use super::propagator::{Propagator, WriteOutcome};
use super::retry::{timed, with_retry};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepFailure {
    pub user_id: UserId,
    pub error: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub deleted: UserId,
    /// Documents that referenced the deleted id and were rewritten.
    pub updated: Vec<UserId>,
    pub already_clean: usize,
    pub failed: Vec<SweepFailure>,
}

impl SweepReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct AccountSweeper<S: DocumentStore> {
    store: Arc<S>,
    config: SyncConfig,
    propagator: Propagator<S>,
    metrics: Arc<dyn MetricsRecorder>,
}

impl<S: DocumentStore> AccountSweeper<S> {
    pub fn new(store: Arc<S>, config: SyncConfig) -> Self {
        Self::with_metrics(store, config, Arc::new(NoOpMetrics))
    }

    pub fn with_metrics(
        store: Arc<S>,
        config: SyncConfig,
        metrics: Arc<dyn MetricsRecorder>,
    ) -> Self {
        Self {
            propagator: Propagator::new(store.clone(), &config, metrics.clone()),
            store,
            config,
            metrics,
        }
    }

    /// Removes `deleted` from every other document.
    ///
    /// Safe to run again after a partial sweep; documents already clean are
    /// not written.
    pub async fn sweep(&self, deleted: &UserId) -> Result<SweepReport, SyncError> {
        let timeout = self.config.call_timeout();
        let ids = with_retry(
            &self.config.retry,
            |_, _| {},
            || timed(timeout, self.store.list_ids()),
        )
        .await
        .map_err(|err| {
            if err.is_transient() {
                SyncError::Unavailable(err)
            } else {
                SyncError::Store(err)
            }
        })?;

        let results: Vec<(UserId, Result<WriteOutcome, StoreError>)> = stream::iter(ids)
            .filter(|id| futures::future::ready(id != deleted))
            .map(|id| async move {
                let delta = EdgeDelta::new(id.clone()).remove_everywhere(deleted);
                let result = self.propagator.write(&delta, WritePhase::Sweep).await;
                (id, result)
            })
            .buffer_unordered(self.config.reconcile_concurrency)
            .collect()
            .await;

        let mut report = SweepReport {
            deleted: deleted.clone(),
            updated: Vec::new(),
            already_clean: 0,
            failed: Vec::new(),
        };

        for (id, result) in results {
            match result {
                Ok(WriteOutcome::Written { .. }) => report.updated.push(id),
                Ok(_) | Err(StoreError::NotFound(_)) => report.already_clean += 1,
                Err(err) => {
                    warn!(user = %id, deleted = %deleted, error = %err, "sweep write failed");
                    report.failed.push(SweepFailure {
                        user_id: id,
                        error: err.to_string(),
                    });
                }
            }
        }
        report.updated.sort();
        report.failed.sort_by(|a, b| a.user_id.cmp(&b.user_id));

        self.metrics.record_sweep(report.updated.len());
        info!(
            deleted = %deleted,
            updated = report.updated.len(),
            already_clean = report.already_clean,
            failed = report.failed.len(),
            "account sweep finished"
        );
        Ok(report)
    }
}
