//! Service layer: orchestration over the ports.

pub mod guard;
pub mod propagator;
pub mod reconciler;
pub mod relationship_service;
pub mod retry;
pub mod sweep;

pub use guard::{evaluate, GuardDecision, IdempotencyGuard};
pub use propagator::{PropagationResult, Propagator, WriteOutcome};
pub use reconciler::{
    PairLocks, ReconcileFailure, ReconciliationReport, Reconciler, RepairRecord,
};
pub use relationship_service::RelationshipService;
pub use sweep::{AccountSweeper, SweepFailure, SweepReport};
