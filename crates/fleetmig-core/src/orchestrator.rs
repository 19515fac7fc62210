//! Orchestrator: the per-branch state machine and fleet scheduler.
//!
//! Decides what each branch needs by diffing its durable history against
//! the catalog, serializes work per branch through the state store's lock
//! lease, invokes the executor, and applies the retry policy. Branches are
//! fully independent units of work: bulk operations fan out one worker per
//! branch and a failure on one branch never blocks another.
//!
//! Physical database objects are only ever created by applying migrations;
//! the orchestrator never pre-creates schema outside the migration path.

use crate::branch::{Branch, BranchDirectory};
use crate::catalog::{MigrationCatalog, MigrationId};
use crate::connection::Connector;
use crate::error::{Error, Result};
use crate::executor::MigrationExecutor;
use crate::state::{current_timestamp, BranchMigrationState, BranchStatus, BranchStateStore, LockToken};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Orchestrator tunables.
///
/// Defaults: 3 retries, 30 s attempt timeout, lock lease twice the attempt
/// timeout, 250 ms exponential backoff base capped at 60 s.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Failed attempts before a branch freezes for manual intervention.
    pub max_retries: u32,
    /// Deadline for one migration attempt. Checked between statements; an
    /// in-flight statement is not aborted.
    pub attempt_timeout: Duration,
    /// Lock lease duration, refreshed before each migration.
    pub lock_lease: Duration,
    /// Base delay for exponential retry backoff.
    pub retry_backoff: Duration,
    /// Upper bound for the computed backoff.
    pub max_backoff: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        let attempt_timeout = Duration::from_secs(30);
        Self {
            max_retries: 3,
            attempt_timeout,
            lock_lease: attempt_timeout * 2,
            retry_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(60),
        }
    }
}

/// Per-branch result of a bulk apply.
#[derive(Debug)]
pub struct BranchReport {
    /// Branch code.
    pub code: String,
    /// The branch's resulting state, or why it failed.
    pub outcome: Result<BranchMigrationState>,
}

/// Result of rolling back a branch's most recent migration.
#[derive(Debug)]
pub struct RollbackOutcome {
    /// The branch's state after rollback.
    pub state: BranchMigrationState,
    /// The migration that was rolled back.
    pub rolled_back: MigrationId,
    /// True when the rolled-back migration was lossy: prior data was not
    /// fully reconstructed. Always surfaced to the caller.
    pub data_loss_warning: bool,
}

/// Per-branch result of a bulk rollback.
#[derive(Debug)]
pub struct RollbackReport {
    /// Branch code.
    pub code: String,
    /// The rollback outcome, or why it failed.
    pub outcome: Result<RollbackOutcome>,
}

/// Coordinates schema migrations across the branch fleet.
pub struct Orchestrator {
    catalog: Arc<MigrationCatalog>,
    store: Arc<BranchStateStore>,
    executor: MigrationExecutor,
    directory: Arc<dyn BranchDirectory>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    /// Create an orchestrator.
    pub fn new(
        catalog: Arc<MigrationCatalog>,
        store: Arc<BranchStateStore>,
        connector: Arc<dyn Connector>,
        directory: Arc<dyn BranchDirectory>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            catalog,
            store,
            executor: MigrationExecutor::new(connector),
            directory,
            config,
        }
    }

    /// The shared migration catalog.
    pub fn catalog(&self) -> &MigrationCatalog {
        &self.catalog
    }

    /// All branches known to the directory.
    pub fn branches(&self) -> Vec<Branch> {
        self.directory.list()
    }

    /// Initialize orchestration state for a registered branch.
    ///
    /// The branch starts `NotProvisioned`; if the catalog already has
    /// migrations it immediately becomes `Pending`. Its database is not
    /// touched; physical creation happens on the first apply.
    pub fn register_branch(&self, code: &str) -> Result<BranchMigrationState> {
        self.directory
            .get(code)
            .ok_or_else(|| Error::UnknownBranch(code.to_string()))?;
        let state = self.store.create(code)?;
        if state.status == BranchStatus::NotProvisioned && !self.catalog.is_empty() {
            let token = LockToken::generate();
            if self.store.try_acquire(code, &token, self.config.lock_lease)? {
                let current = self.store.load(code)?;
                if current.status == BranchStatus::NotProvisioned {
                    self.store
                        .set_status(code, &token, BranchStatus::Pending, None)?;
                }
                self.release(code, &token);
            }
        }
        self.store.load(code)
    }

    /// A branch's current state, reassembled from durable storage.
    pub fn status(&self, code: &str) -> Result<BranchMigrationState> {
        self.store.load(code)
    }

    /// Apply all pending catalog migrations to one branch.
    ///
    /// Fails fast with `BranchBusy` when another worker holds the lock and
    /// with `ManualInterventionRequired` when the branch is frozen.
    /// Operator-initiated, so the retry backoff gate is not consulted.
    pub fn apply_branch(&self, code: &str) -> Result<BranchMigrationState> {
        let branch = self
            .directory
            .get(code)
            .ok_or_else(|| Error::UnknownBranch(code.to_string()))?;
        let current = self.store.load(code)?;
        if current.status == BranchStatus::ManualInterventionRequired {
            return Err(Error::ManualInterventionRequired {
                branch: code.to_string(),
            });
        }

        let token = LockToken::generate();
        if !self.store.try_acquire(code, &token, self.config.lock_lease)? {
            return Err(Error::BranchBusy {
                branch: code.to_string(),
            });
        }
        let result = self.apply_locked(&branch, &token);
        self.release(code, &token);
        // Reload so the returned state reflects the released lock.
        result.and_then(|_| self.store.load(code))
    }

    fn apply_locked(&self, branch: &Branch, token: &LockToken) -> Result<()> {
        let code = &branch.code;
        let applied = self.store.applied_ids(code)?;
        let pending = match self.catalog.pending_for(code, &applied) {
            Ok(pending) => pending,
            Err(err) => return Err(self.note_failure(code, token, err)),
        };

        if pending.is_empty() {
            // Idempotent no-op: already at the catalog head.
            self.store
                .set_status(code, token, BranchStatus::Completed, None)?;
            self.store.set_retry_state(code, token, 0, None)?;
            return Ok(());
        }

        self.store
            .set_status(code, token, BranchStatus::InProgress, None)?;

        for descriptor in pending {
            // Refresh the lease so a long chain cannot outlive it.
            if !self.store.try_acquire(code, token, self.config.lock_lease)? {
                return Err(Error::LockLost {
                    branch: code.to_string(),
                });
            }
            let deadline = Instant::now() + self.config.attempt_timeout;
            match self.executor.apply(branch, descriptor, Some(deadline)) {
                Ok(_) => {
                    self.store.record_applied(code, token, &descriptor.id)?;
                }
                Err(err) => return Err(self.note_failure(code, token, err)),
            }
        }

        self.store
            .set_status(code, token, BranchStatus::Completed, None)?;
        self.store.set_retry_state(code, token, 0, None)?;
        Ok(())
    }

    /// Roll back the branch's most recently applied migration.
    ///
    /// Only the history tail can be rolled back; an empty history is
    /// rejected with `InvalidRollbackTarget` and no state change.
    pub fn rollback_last(&self, code: &str) -> Result<RollbackOutcome> {
        let branch = self
            .directory
            .get(code)
            .ok_or_else(|| Error::UnknownBranch(code.to_string()))?;
        let current = self.store.load(code)?;
        if current.status == BranchStatus::ManualInterventionRequired {
            return Err(Error::ManualInterventionRequired {
                branch: code.to_string(),
            });
        }

        let token = LockToken::generate();
        if !self.store.try_acquire(code, &token, self.config.lock_lease)? {
            return Err(Error::BranchBusy {
                branch: code.to_string(),
            });
        }
        let result = self.rollback_locked(&branch, &token);
        self.release(code, &token);
        match result {
            Ok((rolled_back, data_loss_warning)) => Ok(RollbackOutcome {
                state: self.store.load(code)?,
                rolled_back,
                data_loss_warning,
            }),
            Err(err) => Err(err),
        }
    }

    /// Returns the rolled-back id and whether the reversal was lossy.
    fn rollback_locked(
        &self,
        branch: &Branch,
        token: &LockToken,
    ) -> Result<(MigrationId, bool)> {
        let code = &branch.code;
        let applied = self.store.applied_ids(code)?;
        let target = match applied.last() {
            Some(id) => id.clone(),
            None => {
                return Err(Error::InvalidRollbackTarget {
                    branch: code.to_string(),
                    detail: "no applied migrations".to_string(),
                })
            }
        };
        let descriptor = match self.catalog.descriptor(&target) {
            Some(descriptor) => descriptor,
            None => {
                let err = Error::CatalogCorruption {
                    branch: code.to_string(),
                    detail: format!("applied migration {target} is not in the catalog"),
                };
                return Err(self.note_failure(code, token, err));
            }
        };

        self.store
            .set_status(code, token, BranchStatus::InProgress, None)?;
        let deadline = Instant::now() + self.config.attempt_timeout;
        match self.executor.rollback(branch, descriptor, Some(deadline)) {
            Ok(outcome) => {
                self.store.record_rolled_back(code, token, &target)?;
                let status = if applied.len() > 1 {
                    BranchStatus::Completed
                } else {
                    BranchStatus::Pending
                };
                self.store.set_status(code, token, status, None)?;
                self.store.set_retry_state(code, token, 0, None)?;
                Ok((target, outcome.data_loss_warning))
            }
            Err(err) => Err(self.note_failure(code, token, err)),
        }
    }

    /// Operator override: reset the retry budget of a failed or frozen
    /// branch and make it eligible again. A no-op on healthy branches.
    pub fn force_retry(&self, code: &str) -> Result<BranchMigrationState> {
        self.directory
            .get(code)
            .ok_or_else(|| Error::UnknownBranch(code.to_string()))?;
        let token = LockToken::generate();
        if !self.store.try_acquire(code, &token, self.config.lock_lease)? {
            return Err(Error::BranchBusy {
                branch: code.to_string(),
            });
        }
        let result = (|| {
            let state = self.store.load(code)?;
            match state.status {
                BranchStatus::Failed | BranchStatus::ManualInterventionRequired => {
                    self.store.set_retry_state(code, &token, 0, None)?;
                    self.store
                        .set_status(code, &token, BranchStatus::Pending, None)?;
                    tracing::info!(branch = code, "force-retry: branch reset to pending");
                }
                _ => {
                    tracing::warn!(
                        branch = code,
                        status = %state.status,
                        "force-retry ignored: branch is not failed or frozen"
                    );
                }
            }
            Ok(())
        })();
        self.release(code, &token);
        result.and_then(|()| self.store.load(code))
    }

    /// Apply pending migrations to every branch, one worker per branch.
    /// Outcomes are independent; one branch's failure never blocks another.
    pub fn apply_all(&self) -> Vec<BranchReport> {
        let branches = self.directory.list();
        self.fan_out(&branches, |code| BranchReport {
            code: code.to_string(),
            outcome: self.apply_branch(code),
        })
    }

    /// Roll back the most recent migration on every branch.
    pub fn rollback_all_to_previous(&self) -> Vec<RollbackReport> {
        let branches = self.directory.list();
        self.fan_out(&branches, |code| RollbackReport {
            code: code.to_string(),
            outcome: self.rollback_last(code),
        })
    }

    /// One scheduler pass: apply to every branch that is eligible for
    /// automatic work, honoring the retry backoff of failed branches.
    /// Frozen branches are skipped until an operator intervenes.
    pub fn run_pass(&self) -> Vec<BranchReport> {
        let now = current_timestamp();
        let eligible: Vec<Branch> = self
            .directory
            .list()
            .into_iter()
            .filter(|branch| match self.store.load(&branch.code) {
                Ok(state) => match state.status {
                    BranchStatus::NotProvisioned | BranchStatus::Pending => true,
                    // A stale InProgress (crashed worker) is retried; the
                    // lock arbitrates if a live worker still holds it.
                    BranchStatus::InProgress => true,
                    BranchStatus::Completed => state.applied.len() < self.catalog.len(),
                    BranchStatus::Failed => {
                        state.next_retry_at.map_or(true, |at| now >= at)
                    }
                    BranchStatus::ManualInterventionRequired => false,
                },
                Err(_) => false,
            })
            .collect();
        self.fan_out(&eligible, |code| BranchReport {
            code: code.to_string(),
            outcome: self.apply_branch(code),
        })
    }

    fn fan_out<R: Send>(&self, branches: &[Branch], work: impl Fn(&str) -> R + Sync) -> Vec<R> {
        let work = &work;
        std::thread::scope(|scope| {
            let handles: Vec<_> = branches
                .iter()
                .map(|branch| scope.spawn(move || work(&branch.code)))
                .collect();
            handles
                .into_iter()
                .map(|handle| match handle.join() {
                    Ok(report) => report,
                    Err(panic) => std::panic::resume_unwind(panic),
                })
                .collect()
        })
    }

    /// Record a failure and decide the branch's fate: transient errors
    /// consume the retry budget (bounded exponential backoff) until the
    /// branch freezes; fatal errors freeze it immediately. The original
    /// error is always returned to the caller.
    fn note_failure(&self, code: &str, token: &LockToken, err: Error) -> Error {
        let result = if err.is_transient() {
            self.store.load(code).and_then(|state| {
                let retries = state.retry_count + 1;
                if retries >= self.config.max_retries {
                    tracing::error!(
                        branch = code,
                        retries,
                        error = %err,
                        "retry bound exhausted; manual intervention required"
                    );
                    self.store.set_status(
                        code,
                        token,
                        BranchStatus::ManualInterventionRequired,
                        Some(err.to_string()),
                    )?;
                    self.store.set_retry_state(code, token, retries, None)
                } else {
                    let backoff = self.backoff_for(retries);
                    tracing::warn!(
                        branch = code,
                        retries,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "migration attempt failed; will retry"
                    );
                    self.store
                        .set_status(code, token, BranchStatus::Failed, Some(err.to_string()))?;
                    self.store.set_retry_state(
                        code,
                        token,
                        retries,
                        Some(current_timestamp() + backoff.as_micros() as u64),
                    )
                }
            })
        } else {
            tracing::error!(branch = code, error = %err, "fatal error; branch frozen");
            self.store.set_status(
                code,
                token,
                BranchStatus::ManualInterventionRequired,
                Some(err.to_string()),
            )
        };
        if let Err(bookkeeping) = result {
            tracing::warn!(
                branch = code,
                error = %bookkeeping,
                "failed to record failure state"
            );
        }
        err
    }

    fn backoff_for(&self, retries: u32) -> Duration {
        let factor = 2u32.saturating_pow(retries.saturating_sub(1));
        self.config
            .retry_backoff
            .saturating_mul(factor)
            .min(self.config.max_backoff)
    }

    fn release(&self, code: &str, token: &LockToken) {
        if let Err(err) = self.store.release(code, token) {
            tracing::warn!(branch = code, error = %err, "failed to release branch lock");
        }
    }
}
