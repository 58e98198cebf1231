//! Prometheus bindings for the relationship core.
//!
//! [`PrometheusRecorder`] forwards core metric events to the global
//! registry in `bb-telemetry`; [`MeteredStore`] times every document store
//! call into `bb_store_call_duration_seconds`.

use async_trait::async_trait;
use std::sync::Arc;

use bb_relationship_sync::{
    DocumentSnapshot, DocumentStore, MetricsRecorder, RecordPatch, RepairKind, StoreError,
    TransitionKind, UserId, UserRecord, WritePhase,
};
use bb_telemetry::{
    metric_add, metric_inc, time_histogram, DEFERRED_WRITES, REPAIRS, STORE_CALL_DURATION,
    SWEPT_RECORDS, TRANSITIONS, WRITE_RETRIES,
};

/// [`MetricsRecorder`] backed by the Prometheus registry.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrometheusRecorder;

impl MetricsRecorder for PrometheusRecorder {
    fn record_transition(&self, kind: TransitionKind, outcome: &'static str) {
        metric_inc!(TRANSITIONS, &[kind.as_str(), outcome]);
    }

    fn record_retry(&self, phase: WritePhase) {
        metric_inc!(WRITE_RETRIES, &[phase.as_str()]);
    }

    fn record_deferred(&self) {
        metric_inc!(DEFERRED_WRITES);
    }

    fn record_repair(&self, kind: RepairKind) {
        metric_inc!(REPAIRS, &[kind.as_str()]);
    }

    fn record_sweep(&self, updated: usize) {
        metric_add!(SWEPT_RECORDS, updated as f64);
    }
}

/// Document store wrapper observing call latency.
pub struct MeteredStore<S> {
    inner: Arc<S>,
}

impl<S> MeteredStore<S> {
    pub fn new(inner: Arc<S>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<S: DocumentStore> DocumentStore for MeteredStore<S> {
    async fn fetch(&self, id: &UserId) -> Result<DocumentSnapshot, StoreError> {
        let _timer = time_histogram!(STORE_CALL_DURATION, &["fetch"]);
        self.inner.fetch(id).await
    }

    async fn create(&self, record: UserRecord) -> Result<DocumentSnapshot, StoreError> {
        let _timer = time_histogram!(STORE_CALL_DURATION, &["create"]);
        self.inner.create(record).await
    }

    async fn update_fields(
        &self,
        id: &UserId,
        patch: &RecordPatch,
        expected_revision: Option<u64>,
    ) -> Result<u64, StoreError> {
        let _timer = time_histogram!(STORE_CALL_DURATION, &["update"]);
        self.inner.update_fields(id, patch, expected_revision).await
    }

    async fn list_ids(&self) -> Result<Vec<UserId>, StoreError> {
        let _timer = time_histogram!(STORE_CALL_DURATION, &["list"]);
        self.inner.list_ids().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bb_relationship_sync::InMemoryDocumentStore;

    #[tokio::test]
    async fn test_metered_store_delegates_and_observes() {
        let inner = Arc::new(InMemoryDocumentStore::new());
        let store = MeteredStore::new(inner.clone());
        let id = UserId::new("alice").unwrap();

        let before = STORE_CALL_DURATION
            .with_label_values(&["create"])
            .get_sample_count();
        store.create(UserRecord::new(id.clone(), "Alice")).await.unwrap();
        assert_eq!(store.fetch(&id).await.unwrap().record.username, "Alice");
        assert_eq!(inner.len(), 1);
        assert!(
            STORE_CALL_DURATION
                .with_label_values(&["create"])
                .get_sample_count()
                > before
        );
    }

    #[test]
    fn test_recorder_updates_counters() {
        let recorder = PrometheusRecorder;
        let counter = TRANSITIONS.with_label_values(&["unfriend", "applied"]);
        let before = counter.get();
        recorder.record_transition(TransitionKind::Unfriend, "applied");
        assert!(counter.get() > before);

        let repairs = REPAIRS.with_label_values(&["dangling_reference"]);
        let before = repairs.get();
        recorder.record_repair(RepairKind::DanglingReference);
        assert!(repairs.get() > before);
    }
}
