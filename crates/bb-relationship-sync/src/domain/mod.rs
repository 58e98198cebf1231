//! Domain layer: pure relationship logic with no I/O.

pub mod delta;
pub mod entities;
pub mod errors;
pub mod invariants;
pub mod reconcile;
pub mod state_machine;

pub use delta::{DeltaApplication, DeltaOp, EdgeDelta, FieldChange};
pub use entities::{
    DocumentSnapshot, EdgeState, Marking, PairKey, RecordPatch, RelationshipField,
    Relationships, TransitionKind, UserId, UserRecord,
};
pub use errors::{RejectReason, StoreError, SyncError};
pub use invariants::{check_all, check_pair, check_record, Violation};
pub use reconcile::{plan_repair, RepairKind, RepairPlan};
pub use state_machine::{
    deferred_write_current, effects, has_incoming_request, initiator_post_state_reached,
    mirror_delta, mutual_resolution_plan, transition, MutualRequestPolicy, TransitionPlan,
};
