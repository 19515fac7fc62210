//! Core error types.

use crate::catalog::MigrationId;
use crate::dialect::Provider;
use thiserror::Error;

/// Errors raised by the catalog, state store, executor, and orchestrator.
#[derive(Debug, Error)]
pub enum Error {
    /// A branch's applied history is inconsistent with the known catalog.
    /// Fatal: requires operator diagnosis, never retried automatically.
    #[error("catalog corruption on branch {branch}: {detail}")]
    CatalogCorruption {
        /// The affected branch code.
        branch: String,
        /// What was found, naming the offending migration id.
        detail: String,
    },

    /// The catalog definition itself is invalid (duplicate or unordered ids).
    #[error("invalid catalog definition: {0}")]
    CatalogDefinition(String),

    /// Another worker holds the branch's migration lock.
    #[error("branch {branch} is busy: migration lock held by another worker")]
    BranchBusy {
        /// The affected branch code.
        branch: String,
    },

    /// The caller's lock lease expired or was reclaimed by another worker.
    #[error("migration lock lost on branch {branch}")]
    LockLost {
        /// The affected branch code.
        branch: String,
    },

    /// One rendered DDL statement failed against the branch connection.
    #[error(
        "statement {statement_index} of migration {migration} failed on branch {branch}: {message}"
    )]
    Statement {
        /// The affected branch code.
        branch: String,
        /// The migration being applied or rolled back.
        migration: MigrationId,
        /// Index of the failed statement within the rendered batch.
        statement_index: usize,
        /// The statement text that failed.
        sql: String,
        /// Provider error text.
        message: String,
    },

    /// Rollback was requested for a migration that is not the history tail,
    /// or the branch has nothing applied. Rejected with no state change.
    #[error("invalid rollback target on branch {branch}: {detail}")]
    InvalidRollbackTarget {
        /// The affected branch code.
        branch: String,
        /// Why the target was rejected.
        detail: String,
    },

    /// The branch is frozen after exhausting automatic retries. Only an
    /// operator-initiated force-retry can unfreeze it.
    #[error(
        "branch {branch} requires manual intervention; inspect last_error and use force-retry"
    )]
    ManualInterventionRequired {
        /// The affected branch code.
        branch: String,
    },

    /// No branch registered under this code.
    #[error("unknown branch: {0}")]
    UnknownBranch(String),

    /// A migration id that is not present in the catalog.
    #[error("unknown migration: {0}")]
    UnknownMigration(MigrationId),

    /// Branch codes are restricted to a safe identifier charset.
    #[error("invalid branch code {0:?}: expected [A-Za-z0-9_-]+")]
    InvalidBranchCode(String),

    /// The migration attempt exceeded its deadline between statements.
    #[error("migration {migration} timed out on branch {branch} after {elapsed_ms} ms")]
    AttemptTimeout {
        /// The affected branch code.
        branch: String,
        /// The migration that timed out.
        migration: MigrationId,
        /// Elapsed wall time when the deadline was noticed.
        elapsed_ms: u64,
    },

    /// The dialect cannot render the requested operation.
    #[error("{operation} is not supported on {provider}")]
    Unsupported {
        /// The provider whose dialect rejected the operation.
        provider: Provider,
        /// Description of the rejected operation.
        operation: String,
    },

    /// Branch connection failure (open, execute, or existence probe).
    #[error("connection error: {0}")]
    Connection(String),

    /// State store error.
    #[error("state store error: {0}")]
    Store(#[from] sled::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),
}

impl Error {
    /// Whether the retry policy may re-attempt after this error.
    ///
    /// `CatalogCorruption` and `InvalidRollbackTarget` are never retried;
    /// they surface to the operator immediately.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::BranchBusy { .. }
                | Error::LockLost { .. }
                | Error::Statement { .. }
                | Error::AttemptTimeout { .. }
                | Error::Connection(_)
        )
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let busy = Error::BranchBusy {
            branch: "acme".into(),
        };
        assert!(busy.is_transient());

        let corrupt = Error::CatalogCorruption {
            branch: "acme".into(),
            detail: "hole at 2024_02".into(),
        };
        assert!(!corrupt.is_transient());

        let rollback = Error::InvalidRollbackTarget {
            branch: "acme".into(),
            detail: "no applied migrations".into(),
        };
        assert!(!rollback.is_transient());
    }

    #[test]
    fn test_statement_error_display() {
        let err = Error::Statement {
            branch: "acme".into(),
            migration: MigrationId::new("20240101000000_create_accounts"),
            statement_index: 2,
            sql: "CREATE TABLE t (id TEXT)".into(),
            message: "table t already exists".into(),
        };
        let text = err.to_string();
        assert!(text.contains("statement 2"));
        assert!(text.contains("20240101000000_create_accounts"));
        assert!(text.contains("acme"));
    }
}
