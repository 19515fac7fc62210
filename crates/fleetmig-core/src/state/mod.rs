//! Branch migration state: status, applied history, and lock leases.
//!
//! One record per branch, owned by the [`store::BranchStateStore`]. The
//! durable history tree is the single source of truth for a branch's
//! applied migrations; in-memory state is never trusted across restarts.

pub mod store;

pub use store::BranchStateStore;

use crate::catalog::MigrationId;
use rkyv::{Archive, Deserialize, Serialize};

/// Current timestamp in microseconds since the Unix epoch.
pub fn current_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before Unix epoch")
        .as_micros() as u64
}

/// Orchestration status of one branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchStatus {
    /// Branch registered; its database does not exist yet. Physical
    /// creation happens on the first successful apply, never before.
    NotProvisioned,
    /// Migrations are pending and the branch is eligible for work.
    Pending,
    /// A worker holds the lock and is applying or rolling back.
    InProgress,
    /// All catalog migrations applied.
    Completed,
    /// Last attempt failed; eligible for automatic retry with backoff.
    Failed,
    /// Retry bound exhausted; frozen until an operator intervenes.
    ManualInterventionRequired,
}

impl std::fmt::Display for BranchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BranchStatus::NotProvisioned => write!(f, "not_provisioned"),
            BranchStatus::Pending => write!(f, "pending"),
            BranchStatus::InProgress => write!(f, "in_progress"),
            BranchStatus::Completed => write!(f, "completed"),
            BranchStatus::Failed => write!(f, "failed"),
            BranchStatus::ManualInterventionRequired => {
                write!(f, "manual_intervention_required")
            }
        }
    }
}

/// One history entry: a migration applied to a branch.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[derive(serde::Serialize)]
pub struct AppliedMigration {
    /// The applied migration.
    pub id: MigrationId,
    /// When it was recorded (microseconds since epoch).
    pub applied_at: u64,
}

/// A branch's full orchestration state, assembled from the durable trees.
#[derive(Debug, Clone)]
#[derive(serde::Serialize)]
pub struct BranchMigrationState {
    /// Branch code.
    pub code: String,
    /// Current status.
    pub status: BranchStatus,
    /// Applied migrations in application order (always a catalog prefix).
    pub applied: Vec<AppliedMigration>,
    /// Diagnostic from the most recent failure, if any.
    pub last_error: Option<String>,
    /// Consecutive failed attempts since the last success or reset.
    pub retry_count: u32,
    /// Earliest time (microseconds since epoch) an automatic pass may
    /// retry a failed branch. `None` when no backoff is in force.
    pub next_retry_at: Option<u64>,
    /// Token of the live lock holder, if a worker currently holds the
    /// branch's execution lock.
    pub lock_token: Option<String>,
}

impl BranchMigrationState {
    /// Ids of the applied migrations, in order.
    pub fn applied_ids(&self) -> Vec<MigrationId> {
        self.applied.iter().map(|a| a.id.clone()).collect()
    }
}

/// Opaque identity of a lock holder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken(String);

impl LockToken {
    /// Generate a fresh token.
    pub fn generate() -> Self {
        LockToken(uuid::Uuid::new_v4().to_string())
    }

    /// The token value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}
