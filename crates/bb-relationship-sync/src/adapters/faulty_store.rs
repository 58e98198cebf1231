//! Fault-injecting store wrapper.
//!
//! Wraps any [`DocumentStore`] and fails selected calls for selected ids.
//! Used to drive the partial-failure paths of the propagator and the
//! reconciler.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::domain::{DocumentSnapshot, RecordPatch, StoreError, UserId, UserRecord};
use crate::ports::DocumentStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StoreCall {
    Fetch,
    Update,
}

#[derive(Clone, Debug)]
struct Fault {
    remaining: u32,
    error: StoreError,
}

/// Store wrapper with scripted failures.
pub struct FaultInjectingStore<S> {
    inner: S,
    faults: Mutex<HashMap<(UserId, StoreCall), Fault>>,
    calls: Mutex<HashMap<(UserId, StoreCall), u32>>,
    latency: Option<Duration>,
    yield_before_call: bool,
    total_calls: AtomicU64,
}

impl<S: DocumentStore> FaultInjectingStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            faults: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
            latency: None,
            yield_before_call: false,
            total_calls: AtomicU64::new(0),
        }
    }

    /// Sleeps this long before every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Yields to the scheduler before every call so concurrent tasks
    /// interleave between fetch and write.
    pub fn with_yield(mut self) -> Self {
        self.yield_before_call = true;
        self
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Fails the next `times` calls of `call` on `id` with `error`.
    pub fn fail_next(&self, id: &UserId, call: StoreCall, times: u32, error: StoreError) {
        self.faults.lock().insert(
            (id.clone(), call),
            Fault {
                remaining: times,
                error,
            },
        );
    }

    /// Fails the next `times` updates of `id` as unavailable.
    pub fn fail_updates(&self, id: &UserId, times: u32) {
        self.fail_next(
            id,
            StoreCall::Update,
            times,
            StoreError::Unavailable(format!("injected fault on {}", id)),
        );
    }

    pub fn clear_faults(&self) {
        self.faults.lock().clear();
    }

    /// Calls of `call` made on `id`, failed ones included.
    pub fn call_count(&self, id: &UserId, call: StoreCall) -> u32 {
        self.calls
            .lock()
            .get(&(id.clone(), call))
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> u64 {
        self.total_calls.load(Ordering::Relaxed)
    }

    async fn before_call(&self, id: &UserId, call: StoreCall) -> Result<(), StoreError> {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        *self.calls.lock().entry((id.clone(), call)).or_insert(0) += 1;

        if self.yield_before_call {
            tokio::task::yield_now().await;
        }
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let mut faults = self.faults.lock();
        let key = (id.clone(), call);
        if let Some(fault) = faults.get_mut(&key) {
            if fault.remaining > 0 {
                fault.remaining -= 1;
                let error = fault.error.clone();
                if fault.remaining == 0 {
                    faults.remove(&key);
                }
                return Err(error);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<S: DocumentStore> DocumentStore for FaultInjectingStore<S> {
    async fn fetch(&self, id: &UserId) -> Result<DocumentSnapshot, StoreError> {
        self.before_call(id, StoreCall::Fetch).await?;
        self.inner.fetch(id).await
    }

    async fn create(&self, record: UserRecord) -> Result<DocumentSnapshot, StoreError> {
        self.inner.create(record).await
    }

    async fn update_fields(
        &self,
        id: &UserId,
        patch: &RecordPatch,
        expected_revision: Option<u64>,
    ) -> Result<u64, StoreError> {
        self.before_call(id, StoreCall::Update).await?;
        self.inner.update_fields(id, patch, expected_revision).await
    }

    async fn list_ids(&self) -> Result<Vec<UserId>, StoreError> {
        self.inner.list_ids().await
    }
}
