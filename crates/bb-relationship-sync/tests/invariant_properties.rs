//! Property-based checks of the four steady-state invariants.
//!
//! Random transition sequences over a small population either keep every
//! invariant after each step, or, when writes are made to fail, are brought
//! back to a consistent graph by one reconciliation run.

use bb_relationship_sync::domain::{
    check_all, check_pair, check_record, plan_repair, DeltaApplication, Marking, PairKey,
};
use bb_relationship_sync::{
    FaultInjectingStore, InMemoryDocumentStore, InMemoryIntentJournal, MutualRequestPolicy,
    Reconciler, RelationshipApi, RelationshipService, Relationships, RetryPolicy, SyncConfig,
    SyncError, TransitionKind, TransitionOutcome, UserId, UserRecord,
};
use proptest::prelude::*;
use std::sync::Arc;

const POPULATION: [&str; 4] = ["ana", "ben", "cleo", "dev"];

type Store = FaultInjectingStore<InMemoryDocumentStore>;

fn uid(id: &str) -> UserId {
    UserId::new(id).unwrap()
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn population_store() -> Arc<Store> {
    let inner = InMemoryDocumentStore::new();
    for id in POPULATION {
        inner.insert_record(UserRecord::new(uid(id), id));
    }
    Arc::new(FaultInjectingStore::new(inner))
}

async fn run(
    service: &RelationshipService<Store, InMemoryIntentJournal>,
    kind: TransitionKind,
    a: &UserId,
    b: &UserId,
) -> Result<TransitionOutcome, SyncError> {
    match kind {
        TransitionKind::SendRequest => service.send_request(a, b).await,
        TransitionKind::Accept => service.accept(a, b).await,
        TransitionKind::Reject => service.reject(a, b).await,
        TransitionKind::Cancel => service.cancel(a, b).await,
        TransitionKind::Unfriend => service.unfriend(a, b).await,
    }
}

fn op() -> impl Strategy<Value = (usize, usize, usize)> {
    (
        0..TransitionKind::ALL.len(),
        0..POPULATION.len(),
        0..POPULATION.len(),
    )
}

fn policy() -> impl Strategy<Value = MutualRequestPolicy> {
    prop_oneof![
        Just(MutualRequestPolicy::AutoAccept),
        Just(MutualRequestPolicy::LowerIdWins)
    ]
}

fn marking() -> impl Strategy<Value = Marking> {
    (any::<bool>(), any::<bool>(), any::<bool>()).prop_map(|(friend, sent, received)| Marking {
        friend,
        sent,
        received,
    })
}

fn view(other: &UserId, marking: Marking, self_ref: bool, me: &UserId) -> Relationships {
    let mut relationships = Relationships::default();
    if marking.friend {
        relationships.friends.insert(other.clone());
    }
    if marking.sent {
        relationships.sent.insert(other.clone());
    }
    if marking.received {
        relationships.received.insert(other.clone());
    }
    if self_ref {
        relationships.friends.insert(me.clone());
    }
    relationships
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn sequential_transitions_keep_invariants(
        ops in prop::collection::vec(op(), 1..40),
        policy in policy(),
    ) {
        let broken = runtime().block_on(async {
            let store = population_store();
            let journal = Arc::new(InMemoryIntentJournal::new());
            let config = SyncConfig::default().with_mutual_request_policy(policy);
            let service = RelationshipService::new(store.clone(), journal, config);

            for (step, (kind, a, b)) in ops.iter().enumerate() {
                let kind = TransitionKind::ALL[*kind];
                let (a, b) = (uid(POPULATION[*a]), uid(POPULATION[*b]));
                let outcome = run(&service, kind, &a, &b).await;
                if !matches!(outcome, Ok(TransitionOutcome::Applied | TransitionOutcome::Rejected { .. })) {
                    return Some((step, format!("unexpected outcome {:?}", outcome)));
                }

                let violations = check_all(&store.inner().records());
                if !violations.is_empty() {
                    return Some((step, format!("{:?}", violations)));
                }
            }
            None
        });

        prop_assert_eq!(broken, None);
    }

    #[test]
    fn failed_writes_reconcile_to_consistent_graph(
        ops in prop::collection::vec((op(), prop::option::of(0..POPULATION.len())), 1..30),
        policy in policy(),
    ) {
        let violations = runtime().block_on(async {
            let store = population_store();
            let journal = Arc::new(InMemoryIntentJournal::new());
            let config = SyncConfig::default()
                .with_mutual_request_policy(policy)
                .with_retry(RetryPolicy::none());
            let service = RelationshipService::new(store.clone(), journal.clone(), config.clone());

            for ((kind, a, b), fault) in &ops {
                if let Some(target) = fault {
                    store.fail_updates(&uid(POPULATION[*target]), 1);
                }
                let kind = TransitionKind::ALL[*kind];
                // Failed initiator writes surface as errors and change nothing.
                let _ = run(&service, kind, &uid(POPULATION[*a]), &uid(POPULATION[*b])).await;
                store.clear_faults();
            }

            let report = Reconciler::new(store.clone(), journal, config)
                .run_once()
                .await
                .unwrap();
            assert!(report.failures.is_empty(), "failures: {:?}", report.failures);
            check_all(&store.inner().records())
        });

        prop_assert!(violations.is_empty(), "violations: {:?}", violations);
    }

    #[test]
    fn repair_plan_restores_pair(
        low_marking in marking(),
        high_marking in marking(),
        low_self in any::<bool>(),
        policy in policy(),
    ) {
        let (low_id, high_id) = (uid("ana"), uid("ben"));
        let pair = PairKey::new(low_id.clone(), high_id.clone());
        let low_view = view(&high_id, low_marking, false, &low_id);
        let high_view = view(&low_id, high_marking, false, &high_id);

        let mut low = UserRecord::new(low_id.clone(), "ana");
        let mut high = UserRecord::new(high_id.clone(), "ben");
        low.relationships = low_view.clone();
        high.relationships = high_view.clone();

        if let Some(plan) = plan_repair(policy, &pair, Some(&low_view), Some(&high_view)) {
            for (record, delta) in [(&mut low, &plan.low), (&mut high, &plan.high)] {
                if let Some(delta) = delta {
                    if let DeltaApplication::Changed(next) = delta.apply(&record.relationships) {
                        record.relationships = next;
                    }
                    // A second application is a no-op.
                    prop_assert_eq!(delta.apply(&record.relationships), DeltaApplication::Unchanged);
                }
            }
        }
        prop_assert!(check_pair(&low, &high).is_empty());
        prop_assert!(check_record(&low).is_empty());
        prop_assert!(check_record(&high).is_empty());

        let self_pair = PairKey::new(low_id.clone(), low_id.clone());
        let mut selfish = UserRecord::new(low_id.clone(), "ana");
        selfish.relationships = view(&high_id, Marking::NONE, low_self, &low_id);
        if let Some(plan) = plan_repair(policy, &self_pair, Some(&selfish.relationships), None) {
            if let Some(DeltaApplication::Changed(next)) =
                plan.low.as_ref().map(|delta| delta.apply(&selfish.relationships))
            {
                selfish.relationships = next;
            }
        }
        prop_assert!(check_record(&selfish).is_empty());
    }
}
