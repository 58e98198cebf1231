//! Command execution against a JSON graph file.
//!
//! Every command opens the file, runs one core operation and returns a JSON
//! value for stdout. The same [`JsonFileStore`] serves as document store and
//! intent journal, so deferred writes survive between invocations.

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

use bb_relationship_sync::{
    AccountSweeper, JsonFileStore, MetricsRecorder, Reconciler, RelationshipApi,
    RelationshipService, SyncConfig, TransitionKind, TransitionOutcome, UserId,
};
use bb_telemetry::{log_edge_event, log_repair_event};

use crate::cli::{Command, Edge};
use crate::telemetry_bridge::{MeteredStore, PrometheusRecorder};

type Store = MeteredStore<JsonFileStore>;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Registered<'a> {
    user_id: &'a UserId,
    username: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Initialized<'a> {
    store: &'a Path,
}

/// Handles built once per invocation.
struct Session {
    store: Arc<Store>,
    journal: Arc<JsonFileStore>,
    config: SyncConfig,
    metrics: Arc<dyn MetricsRecorder>,
}

impl Session {
    fn open(path: &Path, config: SyncConfig) -> Result<Self> {
        let file = Arc::new(
            JsonFileStore::open(path)
                .with_context(|| format!("failed to open graph file {}", path.display()))?,
        );
        Ok(Self {
            store: Arc::new(MeteredStore::new(file.clone())),
            journal: file,
            config,
            metrics: Arc::new(PrometheusRecorder),
        })
    }

    fn service(&self) -> RelationshipService<Store, JsonFileStore> {
        RelationshipService::with_metrics(
            self.store.clone(),
            self.journal.clone(),
            self.config.clone(),
            self.metrics.clone(),
        )
    }
}

/// Runs `command` against the graph file at `path`.
pub async fn execute(path: &Path, config: SyncConfig, command: &Command) -> Result<Value> {
    if let Command::Init = command {
        JsonFileStore::initialize(path)
            .with_context(|| format!("failed to create graph file {}", path.display()))?;
        return to_json(&Initialized { store: path });
    }

    let session = Session::open(path, config)?;
    run(&session, command).await
}

async fn run(ctx: &Session, command: &Command) -> Result<Value> {
    let service = ctx.service();

    match command {
        Command::Init => anyhow::bail!("graph file is already initialized"),
        Command::Register { user_id, username } => {
            service
                .register_account(user_id, username)
                .await
                .with_context(|| format!("failed to register {}", user_id))?;
            to_json(&Registered {
                user_id,
                username: username.trim(),
            })
        }
        Command::Send(edge) => transition(&service, TransitionKind::SendRequest, edge).await,
        Command::Accept(edge) => transition(&service, TransitionKind::Accept, edge).await,
        Command::Reject(edge) => transition(&service, TransitionKind::Reject, edge).await,
        Command::Cancel(edge) => transition(&service, TransitionKind::Cancel, edge).await,
        Command::Unfriend(edge) => transition(&service, TransitionKind::Unfriend, edge).await,
        Command::View { user_id } => {
            let view = service
                .relationship_view(user_id)
                .await
                .with_context(|| format!("failed to read relationships of {}", user_id))?;
            to_json(&view)
        }
        Command::Discover { user_id } => {
            let users = service
                .discoverable_users(user_id)
                .await
                .with_context(|| format!("failed to list users discoverable by {}", user_id))?;
            to_json(&users)
        }
        Command::Edge(edge) => {
            let state = service
                .edge_state(&edge.self_id, &edge.other_id)
                .await
                .context("failed to classify edge")?;
            to_json(&state)
        }
        Command::Reconcile { dry_run } => {
            let report = Reconciler::with_metrics(
                ctx.store.clone(),
                ctx.journal.clone(),
                ctx.config.clone(),
                ctx.metrics.clone(),
            )
            .dry_run(*dry_run)
            .run_once()
            .await
            .context("reconciliation run failed")?;

            for repair in &report.repairs {
                log_repair_event!(
                    info,
                    "edge repair recorded",
                    format!("{}|{}", repair.low, repair.high),
                    repair.kind.as_str(),
                    before = repair.before.as_str(),
                    after = repair.after.as_str(),
                    applied = repair.applied
                );
            }
            to_json(&report)
        }
        Command::Sweep { user_id } => {
            let sweeper = AccountSweeper::with_metrics(
                ctx.store.clone(),
                ctx.config.clone(),
                ctx.metrics.clone(),
            );
            let report = sweeper
                .sweep(user_id)
                .await
                .with_context(|| format!("failed to sweep references to {}", user_id))?;
            to_json(&report)
        }
    }
}

async fn transition(
    service: &RelationshipService<Store, JsonFileStore>,
    kind: TransitionKind,
    edge: &Edge,
) -> Result<Value> {
    let (a, b) = (&edge.self_id, &edge.other_id);
    let outcome = match kind {
        TransitionKind::SendRequest => service.send_request(a, b).await,
        TransitionKind::Accept => service.accept(a, b).await,
        TransitionKind::Reject => service.reject(a, b).await,
        TransitionKind::Cancel => service.cancel(a, b).await,
        TransitionKind::Unfriend => service.unfriend(a, b).await,
    }
    .with_context(|| format!("{} {} -> {} failed", kind.as_str(), a, b))?;

    if let TransitionOutcome::PartiallyApplied { intent_id } = &outcome {
        log_edge_event!(
            warn,
            "transition partially applied, run reconcile to finish it",
            a,
            b,
            kind = kind.as_str(),
            intent = ?intent_id
        );
    } else {
        log_edge_event!(
            info,
            "transition finished",
            a,
            b,
            kind = kind.as_str(),
            outcome = outcome.label()
        );
    }
    to_json(&outcome)
}

fn to_json<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).context("failed to encode command output")
}

#[cfg(test)]
mod tests {
    use super::*;
    use bb_relationship_sync::EdgeState;
    use serde_json::json;

    fn uid(id: &str) -> UserId {
        UserId::new(id).unwrap()
    }

    fn edge(a: &str, b: &str) -> Edge {
        Edge {
            self_id: uid(a),
            other_id: uid(b),
        }
    }

    #[tokio::test]
    async fn test_full_session_against_graph_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.json");
        let config = SyncConfig::default();

        execute(&path, config.clone(), &Command::Init).await.unwrap();
        for (id, name) in [("alice", "Alice"), ("bob", "Bob"), ("carol", "Carol")] {
            execute(
                &path,
                config.clone(),
                &Command::Register {
                    user_id: uid(id),
                    username: name.to_string(),
                },
            )
            .await
            .unwrap();
        }

        let sent = execute(&path, config.clone(), &Command::Send(edge("alice", "bob")))
            .await
            .unwrap();
        assert_eq!(sent, json!({ "outcome": "applied" }));

        execute(&path, config.clone(), &Command::Accept(edge("bob", "alice")))
            .await
            .unwrap();
        let state = execute(&path, config.clone(), &Command::Edge(edge("alice", "bob")))
            .await
            .unwrap();
        assert_eq!(state, serde_json::to_value(EdgeState::Friends).unwrap());

        let discover = execute(
            &path,
            config.clone(),
            &Command::Discover {
                user_id: uid("alice"),
            },
        )
        .await
        .unwrap();
        assert_eq!(discover.as_array().map(Vec::len), Some(1));

        let report = execute(&path, config.clone(), &Command::Reconcile { dry_run: false })
            .await
            .unwrap();
        assert_eq!(report["repairs"], json!([]));
        assert_eq!(report["pairs_checked"], json!(1));
    }

    #[tokio::test]
    async fn test_init_refuses_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.json");
        execute(&path, SyncConfig::default(), &Command::Init).await.unwrap();
        assert!(execute(&path, SyncConfig::default(), &Command::Init).await.is_err());
    }

    #[tokio::test]
    async fn test_self_request_reports_rejection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.json");
        let config = SyncConfig::default();
        execute(&path, config.clone(), &Command::Init).await.unwrap();
        execute(
            &path,
            config.clone(),
            &Command::Register {
                user_id: uid("alice"),
                username: "Alice".into(),
            },
        )
        .await
        .unwrap();

        let outcome = execute(&path, config, &Command::Send(edge("alice", "alice")))
            .await
            .unwrap();
        assert_eq!(outcome["outcome"], json!("rejected"));
    }
}
