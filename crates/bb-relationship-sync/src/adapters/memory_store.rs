//! In-memory document store.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

use crate::domain::{DocumentSnapshot, RecordPatch, StoreError, UserId, UserRecord};
use crate::ports::DocumentStore;

#[derive(Clone, Debug)]
struct StoredDocument {
    record: UserRecord,
    revision: u64,
}

/// Document store held in a process-local map.
///
/// Revisions start at 1 and grow by one per successful update.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    documents: RwLock<HashMap<UserId, StoredDocument>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `record` as-is, replacing any existing document.
    ///
    /// Bypasses every check so tests can seed drifted states.
    pub fn insert_record(&self, record: UserRecord) {
        let mut documents = self.documents.write();
        let revision = documents
            .get(&record.user_id)
            .map(|doc| doc.revision + 1)
            .unwrap_or(1);
        documents.insert(record.user_id.clone(), StoredDocument { record, revision });
    }

    pub fn remove_record(&self, id: &UserId) -> Option<UserRecord> {
        self.documents.write().remove(id).map(|doc| doc.record)
    }

    pub fn get_record(&self, id: &UserId) -> Option<UserRecord> {
        self.documents.read().get(id).map(|doc| doc.record.clone())
    }

    /// Every stored record keyed by id.
    pub fn records(&self) -> BTreeMap<UserId, UserRecord> {
        self.documents
            .read()
            .iter()
            .map(|(id, doc)| (id.clone(), doc.record.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn fetch(&self, id: &UserId) -> Result<DocumentSnapshot, StoreError> {
        self.documents
            .read()
            .get(id)
            .map(|doc| DocumentSnapshot {
                record: doc.record.clone(),
                revision: doc.revision,
            })
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    async fn create(&self, record: UserRecord) -> Result<DocumentSnapshot, StoreError> {
        let mut documents = self.documents.write();
        if documents.contains_key(&record.user_id) {
            return Err(StoreError::AlreadyExists(record.user_id));
        }
        documents.insert(
            record.user_id.clone(),
            StoredDocument {
                record: record.clone(),
                revision: 1,
            },
        );
        Ok(DocumentSnapshot {
            record,
            revision: 1,
        })
    }

    async fn update_fields(
        &self,
        id: &UserId,
        patch: &RecordPatch,
        expected_revision: Option<u64>,
    ) -> Result<u64, StoreError> {
        let mut documents = self.documents.write();
        let doc = documents
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;

        if let Some(expected) = expected_revision {
            if expected != doc.revision {
                return Err(StoreError::Conflict {
                    id: id.clone(),
                    expected,
                    actual: doc.revision,
                });
            }
        }

        patch.apply_to(&mut doc.record.relationships);
        doc.revision += 1;
        Ok(doc.revision)
    }

    async fn list_ids(&self) -> Result<Vec<UserId>, StoreError> {
        let mut ids: Vec<UserId> = self.documents.read().keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
