//! # End-to-End Relationship Scenarios
//!
//! Drives the public [`RelationshipApi`] against an in-memory store wrapped
//! in a fault injector and checks both documents after every step.
//!
//! ## Test Categories
//!
//! 1. **Happy paths** - request, accept, cancel, re-send
//! 2. **Idempotence** - repeated calls never double-apply
//! 3. **Partial failure** - a lagging counterpart is resumed or journaled
//! 4. **Concurrency** - simultaneous requests in both directions

use bb_relationship_sync::config::MAX_RETRY_ATTEMPTS;
use bb_relationship_sync::domain::{check_all, Marking};
use bb_relationship_sync::{
    FaultInjectingStore, InMemoryDocumentStore, InMemoryIntentJournal, IntentJournal, Metrics,
    MutualRequestPolicy, RejectReason, RelationshipApi, RelationshipService, RetryPolicy, StoreCall,
    SyncConfig, TransitionOutcome, UserId, UserRecord,
};
use std::sync::Arc;

// =============================================================================
// TEST HELPERS
// =============================================================================

type Store = FaultInjectingStore<InMemoryDocumentStore>;
type Service = RelationshipService<Store, InMemoryIntentJournal>;

fn uid(id: &str) -> UserId {
    UserId::new(id).unwrap()
}

struct World {
    store: Arc<Store>,
    journal: Arc<InMemoryIntentJournal>,
    metrics: Arc<Metrics>,
    service: Service,
}

fn world_with(store: Store, config: SyncConfig, users: &[&str]) -> World {
    for id in users {
        store
            .inner()
            .insert_record(UserRecord::new(uid(id), format!("user-{}", id)));
    }
    let store = Arc::new(store);
    let journal = Arc::new(InMemoryIntentJournal::new());
    let metrics = Arc::new(Metrics::new());
    let service =
        RelationshipService::with_metrics(store.clone(), journal.clone(), config, metrics.clone());
    World {
        store,
        journal,
        metrics,
        service,
    }
}

fn world(users: &[&str]) -> World {
    world_with(
        FaultInjectingStore::new(InMemoryDocumentStore::new()),
        SyncConfig::default(),
        users,
    )
}

impl World {
    fn marking(&self, owner: &str, other: &str) -> Marking {
        self.store
            .inner()
            .get_record(&uid(owner))
            .unwrap()
            .relationships
            .marking_for(&uid(other))
    }

    fn assert_consistent(&self) {
        let violations = check_all(&self.store.inner().records());
        assert!(violations.is_empty(), "violations: {:?}", violations);
    }
}

// =============================================================================
// HAPPY PATHS
// =============================================================================

#[tokio::test]
async fn test_request_then_accept_makes_friends() {
    let w = world(&["alice", "bob"]);

    let sent = w.service.send_request(&uid("alice"), &uid("bob")).await.unwrap();
    assert_eq!(sent, TransitionOutcome::Applied);
    assert_eq!(w.marking("alice", "bob"), Marking::SENT);
    assert_eq!(w.marking("bob", "alice"), Marking::RECEIVED);
    w.assert_consistent();

    let accepted = w.service.accept(&uid("bob"), &uid("alice")).await.unwrap();
    assert_eq!(accepted, TransitionOutcome::Applied);
    assert_eq!(w.marking("alice", "bob"), Marking::FRIEND);
    assert_eq!(w.marking("bob", "alice"), Marking::FRIEND);
    w.assert_consistent();

    let audience = w.service.feed_audience(&uid("alice")).await.unwrap();
    assert!(audience.contains(&uid("bob")));
    assert!(audience.contains(&uid("alice")));
}

#[tokio::test]
async fn test_cancel_then_resend() {
    let w = world(&["alice", "bob"]);

    w.service.send_request(&uid("alice"), &uid("bob")).await.unwrap();
    let cancelled = w.service.cancel(&uid("alice"), &uid("bob")).await.unwrap();
    assert_eq!(cancelled, TransitionOutcome::Applied);
    assert_eq!(w.marking("alice", "bob"), Marking::NONE);
    assert_eq!(w.marking("bob", "alice"), Marking::NONE);

    let resent = w.service.send_request(&uid("alice"), &uid("bob")).await.unwrap();
    assert_eq!(resent, TransitionOutcome::Applied);
    assert_eq!(w.marking("bob", "alice"), Marking::RECEIVED);
    w.assert_consistent();
}

#[tokio::test]
async fn test_reject_clears_both_sides() {
    let w = world(&["alice", "bob"]);

    w.service.send_request(&uid("alice"), &uid("bob")).await.unwrap();
    let rejected = w.service.reject(&uid("bob"), &uid("alice")).await.unwrap();
    assert_eq!(rejected, TransitionOutcome::Applied);
    assert_eq!(w.marking("alice", "bob"), Marking::NONE);
    assert_eq!(w.marking("bob", "alice"), Marking::NONE);

    let discoverable = w.service.discoverable_users(&uid("alice")).await.unwrap();
    assert_eq!(discoverable.len(), 1);
    assert_eq!(discoverable[0].user_id, uid("bob"));
}

#[tokio::test]
async fn test_self_request_mutates_nothing() {
    let w = world(&["alice"]);
    let before = w.store.inner().records();

    let outcome = w.service.send_request(&uid("alice"), &uid("alice")).await.unwrap();
    assert_eq!(
        outcome,
        TransitionOutcome::rejected(RejectReason::SelfReference)
    );
    assert_eq!(w.store.inner().records(), before);
    assert_eq!(w.store.call_count(&uid("alice"), StoreCall::Update), 0);
}

// =============================================================================
// IDEMPOTENCE
// =============================================================================

#[tokio::test]
async fn test_double_accept_is_rejected_without_writes() {
    let w = world(&["alice", "bob"]);
    w.service.send_request(&uid("alice"), &uid("bob")).await.unwrap();
    w.service.accept(&uid("bob"), &uid("alice")).await.unwrap();
    let updates_before = w.store.call_count(&uid("alice"), StoreCall::Update)
        + w.store.call_count(&uid("bob"), StoreCall::Update);

    let again = w.service.accept(&uid("bob"), &uid("alice")).await.unwrap();
    assert_eq!(
        again,
        TransitionOutcome::rejected(RejectReason::NotInRequestedState)
    );
    let updates_after = w.store.call_count(&uid("alice"), StoreCall::Update)
        + w.store.call_count(&uid("bob"), StoreCall::Update);
    assert_eq!(updates_before, updates_after);
    w.assert_consistent();
}

#[tokio::test]
async fn test_duplicate_request_rejected() {
    let w = world(&["alice", "bob"]);
    w.service.send_request(&uid("alice"), &uid("bob")).await.unwrap();

    let again = w.service.send_request(&uid("alice"), &uid("bob")).await.unwrap();
    assert_eq!(again, TransitionOutcome::rejected(RejectReason::AlreadyRelated));
    assert_eq!(w.metrics.snapshot().transitions_rejected, 1);
}

// =============================================================================
// PARTIAL FAILURE
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_retry_after_partial_failure_converges() {
    let w = world(&["alice", "bob"]);
    w.store.fail_updates(&uid("bob"), 1_000);

    let first = w.service.send_request(&uid("alice"), &uid("bob")).await.unwrap();
    assert!(matches!(
        first,
        TransitionOutcome::PartiallyApplied { intent_id: Some(_) }
    ));
    assert_eq!(w.marking("alice", "bob"), Marking::SENT);
    assert_eq!(w.marking("bob", "alice"), Marking::NONE);

    w.store.clear_faults();
    let retried = w.service.send_request(&uid("alice"), &uid("bob")).await.unwrap();
    assert_eq!(retried, TransitionOutcome::Applied);
    assert_eq!(w.marking("bob", "alice"), Marking::RECEIVED);
    w.assert_consistent();

    // The resumed write supersedes the deferred one.
    assert!(w.journal.pending().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_transient_counterpart_failure_absorbed_by_retry() {
    let w = world(&["alice", "bob"]);
    w.store.fail_updates(&uid("bob"), 2);

    let outcome = w.service.send_request(&uid("alice"), &uid("bob")).await.unwrap();
    assert_eq!(outcome, TransitionOutcome::Applied);
    assert_eq!(w.store.call_count(&uid("bob"), StoreCall::Update), 3);
    assert_eq!(w.metrics.snapshot().write_retries, 2);
    assert!(w.journal.is_empty());
    w.assert_consistent();
}

#[tokio::test]
async fn test_counterpart_deleted_mid_transition() {
    let w = world(&["alice", "bob"]);
    w.store.inner().remove_record(&uid("bob"));

    let outcome = w.service.send_request(&uid("alice"), &uid("bob")).await.unwrap();
    assert_eq!(outcome, TransitionOutcome::rejected(RejectReason::PartyGone));
    assert_eq!(w.marking("alice", "bob"), Marking::NONE);
}

// =============================================================================
// CONCURRENCY
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_simultaneous_requests_auto_accept() {
    let w = world_with(
        FaultInjectingStore::new(InMemoryDocumentStore::new()).with_yield(),
        SyncConfig::default(),
        &["alice", "bob"],
    );

    let (alice, bob) = (uid("alice"), uid("bob"));
    let (ab, ba) = tokio::join!(
        w.service.send_request(&alice, &bob),
        w.service.send_request(&bob, &alice),
    );
    assert_eq!(ab.unwrap(), TransitionOutcome::Applied);
    assert_eq!(ba.unwrap(), TransitionOutcome::Applied);

    assert_eq!(w.marking("alice", "bob"), Marking::FRIEND);
    assert_eq!(w.marking("bob", "alice"), Marking::FRIEND);
    w.assert_consistent();
}

#[tokio::test(start_paused = true)]
async fn test_simultaneous_requests_lower_id_wins() {
    let w = world_with(
        FaultInjectingStore::new(InMemoryDocumentStore::new()).with_yield(),
        SyncConfig::default().with_mutual_request_policy(MutualRequestPolicy::LowerIdWins),
        &["alice", "bob"],
    );

    let (alice, bob) = (uid("alice"), uid("bob"));
    let (ab, ba) = tokio::join!(
        w.service.send_request(&alice, &bob),
        w.service.send_request(&bob, &alice),
    );
    assert_eq!(ab.unwrap(), TransitionOutcome::Applied);
    assert_eq!(
        ba.unwrap(),
        TransitionOutcome::rejected(RejectReason::AlreadyRelated)
    );

    assert_eq!(w.marking("alice", "bob"), Marking::SENT);
    assert_eq!(w.marking("bob", "alice"), Marking::RECEIVED);
    w.assert_consistent();
}

#[tokio::test(start_paused = true)]
async fn test_fan_out_to_many_users_stays_consistent() {
    let users = ["u0", "u1", "u2", "u3", "u4", "u5"];
    // Every write lands on u0, so give conflicts room to settle.
    let retry = RetryPolicy {
        max_attempts: MAX_RETRY_ATTEMPTS,
        ..RetryPolicy::default()
    };
    let w = world_with(
        FaultInjectingStore::new(InMemoryDocumentStore::new()).with_yield(),
        SyncConfig::default().with_retry(retry),
        &users,
    );

    let hub = uid("u0");
    let others: Vec<UserId> = users[1..].iter().map(|id| uid(id)).collect();

    let sends = others.iter().map(|other| w.service.send_request(&hub, other));
    for outcome in futures::future::join_all(sends).await {
        assert_eq!(outcome.unwrap(), TransitionOutcome::Applied);
    }

    let accepts = others.iter().map(|other| w.service.accept(other, &hub));
    for outcome in futures::future::join_all(accepts).await {
        assert_eq!(outcome.unwrap(), TransitionOutcome::Applied);
    }

    let view = w.service.relationship_view(&hub).await.unwrap();
    assert_eq!(view.friends.len(), users.len() - 1);
    w.assert_consistent();
}
