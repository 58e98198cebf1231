//! # BetaBuddy Relationship Sync
//!
//! Friend-graph synchronization between user documents that are only ever
//! written one at a time.
//!
//! A relationship between two users is stored twice: once in each user's
//! document. No cross-document transaction exists, so every transition is
//! two single-document writes in a fixed order, each idempotent and
//! individually retryable. A scanner repairs whatever drift remains.
//!
//! ## Architecture
//!
//! This crate follows Hexagonal Architecture (Ports & Adapters):
//!
//! - **Domain Layer** (`domain/`): Pure logic, no I/O
//!   - `transition`: the relationship state machine
//!   - `EdgeDelta`: idempotent per-document edits
//!   - `plan_repair`: repair planning for drifted edges
//!   - `check_all`: invariant checks
//!
//! - **Ports Layer** (`ports/`): Trait definitions
//!   - `RelationshipApi`: Driving port (presentation layer)
//!   - `DocumentStore`, `IntentJournal`: Driven ports
//!
//! - **Service Layer** (`service/`): Orchestration
//!   - `RelationshipService`: implements `RelationshipApi`
//!   - `Propagator`: two-phase writes with bounded retry
//!   - `IdempotencyGuard`: re-fetch and re-check before every transition
//!   - `Reconciler`: journal replay and drift repair
//!   - `AccountSweeper`: removes a deleted account everywhere
//!
//! - **Adapters Layer** (`adapters/`): in-memory, JSON-file and
//!   fault-injecting stores
//!
//! ## Invariants
//!
//! | ID | Invariant |
//! |----|-----------|
//! | 1 | `B ∈ A.sentFriendRequests ⇔ A ∈ B.receivedFriendRequests` |
//! | 2 | `B ∈ A.friends ⇔ A ∈ B.friends` |
//! | 3 | A holds B in at most one of its three sets |
//! | 4 | A never holds itself |
//!
//! They hold whenever no transition is in flight and no deferred write is
//! pending.
//!
//! ## Transition Flow
//!
//! ```text
//! send_request(A, B)
//!     │
//!     ├─→ IdempotencyGuard: fetch A, fetch B, evaluate
//!     │        └─ Reject ─────────────────────────→ Rejected(reason)
//!     │
//!     ├─→ Propagator: write A (retry) ── fails ───→ Err(Unavailable)
//!     │
//!     ├─→ Propagator: write B (retry) ── fails ───→ journal ─→ PartiallyApplied
//!     │
//!     └─→ Applied
//! ```
//!
//! ## Usage Example
//!
//! ```ignore
//! use bb_relationship_sync::{
//!     InMemoryDocumentStore, InMemoryIntentJournal, RelationshipApi, RelationshipService,
//!     SyncConfig, UserId,
//! };
//! use std::sync::Arc;
//!
//! let store = Arc::new(InMemoryDocumentStore::new());
//! let journal = Arc::new(InMemoryIntentJournal::new());
//! let service = RelationshipService::new(store, journal, SyncConfig::default());
//!
//! let (alice, bob) = (UserId::new("alice")?, UserId::new("bob")?);
//! service.register_account(&alice, "Alice").await?;
//! service.register_account(&bob, "Bob").await?;
//! service.send_request(&alice, &bob).await?;
//! service.accept(&bob, &alice).await?;
//! ```

pub mod adapters;
pub mod config;
pub mod domain;
pub mod metrics;
pub mod ports;
pub mod service;

pub use adapters::{
    FaultInjectingStore, InMemoryDocumentStore, InMemoryIntentJournal, JsonFileStore, StoreCall,
};
pub use config::{ConfigError, MutualRequestPolicy, RetryPolicy, SyncConfig};
pub use domain::{
    DocumentSnapshot, EdgeDelta, EdgeState, PairKey, RecordPatch, RejectReason,
    RelationshipField, Relationships, RepairKind, StoreError, SyncError, TransitionKind, UserId,
    UserRecord,
};
pub use metrics::{Metrics, MetricsRecorder, MetricsSnapshot, NoOpMetrics, WritePhase};
pub use ports::{
    DeferredWrite, DocumentStore, IntentId, IntentJournal, RelationshipApi, RelationshipView,
    TransitionOutcome, UserSummary,
};
pub use service::{
    AccountSweeper, ReconciliationReport, Reconciler, RelationshipService, SweepReport,
};
