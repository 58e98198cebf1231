//! Adapters implementing the outbound ports.

pub mod faulty_store;
pub mod json_file_store;
pub mod memory_journal;
pub mod memory_store;

pub use faulty_store::{FaultInjectingStore, StoreCall};
pub use json_file_store::JsonFileStore;
pub use memory_journal::InMemoryIntentJournal;
pub use memory_store::InMemoryDocumentStore;
