//! In-memory intent journal.

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::domain::StoreError;
use crate::ports::{DeferredWrite, IntentId, IntentJournal};

/// Journal kept in insertion order; lost on restart.
#[derive(Debug, Default)]
pub struct InMemoryIntentJournal {
    entries: Mutex<Vec<DeferredWrite>>,
}

impl InMemoryIntentJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl IntentJournal for InMemoryIntentJournal {
    async fn record(&self, write: &DeferredWrite) -> Result<(), StoreError> {
        let mut entries = self.entries.lock();
        if !entries.iter().any(|e| e.id == write.id) {
            entries.push(write.clone());
        }
        Ok(())
    }

    async fn pending(&self) -> Result<Vec<DeferredWrite>, StoreError> {
        Ok(self.entries.lock().clone())
    }

    async fn resolve(&self, id: &IntentId) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|e| e.id != *id);
        Ok(entries.len() != before)
    }

    async fn mark_attempted(&self, id: &IntentId) -> Result<(), StoreError> {
        if let Some(entry) = self.entries.lock().iter_mut().find(|e| e.id == *id) {
            entry.attempts += 1;
        }
        Ok(())
    }
}
