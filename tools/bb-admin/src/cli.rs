//! Command-line arguments.

use std::path::PathBuf;

use bb_relationship_sync::UserId;
use clap::{Args as ClapArgs, Parser, Subcommand};

/// BB-Admin: BetaBuddy relationship graph administration
#[derive(Parser, Debug)]
#[command(name = "bb-admin")]
#[command(about = "Drive friend-graph transitions, reconciliation and sweeps against a graph file")]
pub struct Args {
    /// JSON graph file holding user documents and pending writes
    #[arg(short, long, default_value = "betabuddy-graph.json")]
    pub store: PathBuf,

    /// Emit logs as JSON lines on stderr
    #[arg(long)]
    pub json_logs: bool,

    /// Print the Prometheus text exposition after the command
    #[arg(long)]
    pub metrics: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// The two parties of a transition, initiator first.
#[derive(ClapArgs, Debug, Clone)]
pub struct Edge {
    /// User performing the action
    pub self_id: UserId,
    /// User on the other end of the edge
    pub other_id: UserId,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create an empty graph file
    Init,
    /// Create a user document with empty relationship sets
    Register { user_id: UserId, username: String },
    /// Send a friend request
    Send(Edge),
    /// Accept a pending request from OTHER_ID
    Accept(Edge),
    /// Reject a pending request from OTHER_ID
    Reject(Edge),
    /// Withdraw a request sent to OTHER_ID
    Cancel(Edge),
    /// End a friendship
    Unfriend(Edge),
    /// Show friends, incoming and outgoing requests
    View { user_id: UserId },
    /// List users with no relationship to USER_ID
    Discover { user_id: UserId },
    /// Classify the edge between two users
    Edge(Edge),
    /// Replay deferred writes and repair drifted edges
    Reconcile {
        /// Report repairs without writing
        #[arg(long)]
        dry_run: bool,
    },
    /// Remove a deleted account from every other document
    Sweep { user_id: UserId },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Register { .. } => "register",
            Self::Send(_) => "send",
            Self::Accept(_) => "accept",
            Self::Reject(_) => "reject",
            Self::Cancel(_) => "cancel",
            Self::Unfriend(_) => "unfriend",
            Self::View { .. } => "view",
            Self::Discover { .. } => "discover",
            Self::Edge(_) => "edge",
            Self::Reconcile { .. } => "reconcile",
            Self::Sweep { .. } => "sweep",
        }
    }
}
