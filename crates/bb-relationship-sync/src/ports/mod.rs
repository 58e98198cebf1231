//! Ports layer: the traits the relationship core exposes and depends on.

pub mod inbound;
pub mod outbound;

pub use inbound::{RelationshipApi, RelationshipView, TransitionOutcome, UserSummary};
pub use outbound::{DeferredWrite, DocumentStore, IntentId, IntentJournal};
