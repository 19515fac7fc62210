//! Migration executor: applies or rolls back one migration against one
//! branch connection.
//!
//! The executor renders operations through the branch's dialect adapter and
//! runs them inside a transaction where the provider supports transactional
//! DDL, otherwise sequentially with per-statement error capture. Before
//! every guarded statement it evaluates the dialect's existence predicate
//! and silently skips statements whose outcome is already in place; this
//! is what makes re-running a migration against a partially-applied branch
//! safe after a crash.

use crate::branch::Branch;
use crate::catalog::ops::{ObjectPresence, SchemaOp};
use crate::catalog::{MigrationDescriptor, MigrationId};
use crate::connection::{BranchConnection, Connector};
use crate::dialect::RenderedStatement;
use crate::error::{Error, Result};
use std::sync::Arc;
use std::time::Instant;

/// Result of applying or rolling back one migration.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    /// The migration that ran.
    pub migration: MigrationId,
    /// Statements executed.
    pub statements_run: usize,
    /// Statements skipped because their guard precondition already held.
    pub statements_skipped: usize,
    /// Set on rollback of a lossy migration: reversal cannot fully
    /// reconstruct prior data. Must be propagated to the operator.
    pub data_loss_warning: bool,
}

/// Applies and rolls back single migrations on branch connections.
pub struct MigrationExecutor {
    connector: Arc<dyn Connector>,
}

impl MigrationExecutor {
    /// Create an executor over a connector.
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self { connector }
    }

    /// Apply one migration's forward operations to a branch.
    pub fn apply(
        &self,
        branch: &Branch,
        descriptor: &MigrationDescriptor,
        deadline: Option<Instant>,
    ) -> Result<ExecutionOutcome> {
        let outcome = self.run(
            branch,
            &descriptor.id,
            &descriptor.forward_ops,
            deadline,
            false,
        )?;
        tracing::info!(
            branch = %branch.code,
            migration = %descriptor.id,
            run = outcome.statements_run,
            skipped = outcome.statements_skipped,
            "migration applied"
        );
        Ok(outcome)
    }

    /// Roll back one migration via its backward operations. For lossy
    /// descriptors the outcome carries a data-loss warning.
    pub fn rollback(
        &self,
        branch: &Branch,
        descriptor: &MigrationDescriptor,
        deadline: Option<Instant>,
    ) -> Result<ExecutionOutcome> {
        let outcome = self.run(
            branch,
            &descriptor.id,
            &descriptor.backward_ops,
            deadline,
            descriptor.lossy,
        )?;
        if outcome.data_loss_warning {
            tracing::warn!(
                branch = %branch.code,
                migration = %descriptor.id,
                "lossy migration rolled back; prior data not fully reconstructed"
            );
        } else {
            tracing::info!(
                branch = %branch.code,
                migration = %descriptor.id,
                "migration rolled back"
            );
        }
        Ok(outcome)
    }

    fn run(
        &self,
        branch: &Branch,
        migration: &MigrationId,
        ops: &[SchemaOp],
        deadline: Option<Instant>,
        data_loss_warning: bool,
    ) -> Result<ExecutionOutcome> {
        let dialect = branch.provider.dialect();
        let mut statements: Vec<RenderedStatement> = Vec::new();
        for op in ops {
            statements.extend(dialect.render(op)?);
        }

        let mut conn = self.connector.connect(branch)?;
        let transactional = dialect.supports_transactional_ddl();
        let started = Instant::now();

        if transactional {
            conn.begin()?;
        }

        let mut outcome = ExecutionOutcome {
            migration: migration.clone(),
            statements_run: 0,
            statements_skipped: 0,
            data_loss_warning,
        };

        for (index, statement) in statements.iter().enumerate() {
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    if transactional {
                        let _ = conn.rollback_tx();
                    }
                    return Err(Error::AttemptTimeout {
                        branch: branch.code.clone(),
                        migration: migration.clone(),
                        elapsed_ms: started.elapsed().as_millis() as u64,
                    });
                }
            }

            if let Some(guard) = &statement.guard {
                let present = conn.query_flag(&dialect.exists_predicate(&guard.object))?;
                let should_run = match guard.run_when {
                    ObjectPresence::Present => present,
                    ObjectPresence::Absent => !present,
                };
                if !should_run {
                    tracing::debug!(
                        branch = %branch.code,
                        migration = %migration,
                        statement_index = index,
                        object = %guard.object,
                        "statement skipped: precondition already satisfied"
                    );
                    outcome.statements_skipped += 1;
                    continue;
                }
            }

            if let Err(source) = conn.execute(&statement.sql) {
                if transactional {
                    let _ = conn.rollback_tx();
                }
                return Err(Error::Statement {
                    branch: branch.code.clone(),
                    migration: migration.clone(),
                    statement_index: index,
                    sql: statement.sql.clone(),
                    message: source.to_string(),
                });
            }
            outcome.statements_run += 1;
        }

        if transactional {
            conn.commit()?;
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::branch::ConnectionDescriptor;
    use crate::catalog::ops::{ColumnDef, LogicalType, ObjectRef};
    use crate::connection::SqliteConnector;
    use crate::dialect::Provider;
    use std::time::Duration;

    fn branch_at(path: &std::path::Path) -> Branch {
        Branch::new(
            "acme",
            Provider::Sqlite,
            ConnectionDescriptor::new(path.to_str().unwrap()),
        )
        .unwrap()
    }

    fn create_accounts() -> MigrationDescriptor {
        MigrationDescriptor::new("20240101000000_create_accounts")
            .with_forward(SchemaOp::CreateTable {
                table: "accounts".into(),
                columns: vec![
                    ColumnDef::new("id", LogicalType::Identifier),
                    ColumnDef::new("name", LogicalType::Text),
                ],
            })
            .with_backward(SchemaOp::DropTable {
                table: "accounts".into(),
            })
    }

    fn add_email() -> MigrationDescriptor {
        MigrationDescriptor::new("20240102000000_add_email")
            .with_forward(SchemaOp::AddColumn {
                table: "accounts".into(),
                column: ColumnDef::new("email", LogicalType::Text).nullable(),
            })
            .with_backward(SchemaOp::DropColumn {
                table: "accounts".into(),
                column: "email".into(),
            })
    }

    fn executor() -> MigrationExecutor {
        MigrationExecutor::new(Arc::new(SqliteConnector))
    }

    fn table_exists(branch: &Branch, table: &str) -> bool {
        let mut conn = SqliteConnector.connect(branch).unwrap();
        conn.query_flag(&format!(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = '{table}'"
        ))
        .unwrap()
    }

    fn column_exists(branch: &Branch, table: &str, column: &str) -> bool {
        let mut conn = SqliteConnector.connect(branch).unwrap();
        conn.query_flag(&format!(
            "SELECT 1 FROM pragma_table_info('{table}') WHERE name = '{column}'"
        ))
        .unwrap()
    }

    #[test]
    fn test_apply_creates_objects() {
        let dir = tempfile::tempdir().unwrap();
        let branch = branch_at(&dir.path().join("acme.db"));
        let outcome = executor().apply(&branch, &create_accounts(), None).unwrap();

        assert_eq!(outcome.statements_run, 1);
        assert_eq!(outcome.statements_skipped, 0);
        assert!(!outcome.data_loss_warning);
        assert!(table_exists(&branch, "accounts"));
    }

    #[test]
    fn test_reapply_skips_existing_objects() {
        let dir = tempfile::tempdir().unwrap();
        let branch = branch_at(&dir.path().join("acme.db"));
        let executor = executor();

        executor.apply(&branch, &create_accounts(), None).unwrap();
        let outcome = executor.apply(&branch, &create_accounts(), None).unwrap();

        assert_eq!(outcome.statements_run, 0);
        assert_eq!(outcome.statements_skipped, 1);
    }

    #[test]
    fn test_rollback_drops_column_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let branch = branch_at(&dir.path().join("acme.db"));
        let executor = executor();

        executor.apply(&branch, &create_accounts(), None).unwrap();
        executor.apply(&branch, &add_email(), None).unwrap();
        assert!(column_exists(&branch, "accounts", "email"));

        let outcome = executor.rollback(&branch, &add_email(), None).unwrap();
        assert_eq!(outcome.statements_run, 1);
        assert!(!column_exists(&branch, "accounts", "email"));

        // Rolling back again skips the already-absent column.
        let outcome = executor.rollback(&branch, &add_email(), None).unwrap();
        assert_eq!(outcome.statements_run, 0);
        assert_eq!(outcome.statements_skipped, 1);
    }

    #[test]
    fn test_lossy_rollback_carries_warning() {
        let dir = tempfile::tempdir().unwrap();
        let branch = branch_at(&dir.path().join("acme.db"));
        let executor = executor();

        executor.apply(&branch, &create_accounts(), None).unwrap();

        let consolidate = MigrationDescriptor::new("20240103000000_consolidate_tiers")
            .with_forward(SchemaOp::AddColumn {
                table: "accounts".into(),
                column: ColumnDef::new("tier", LogicalType::Integer).nullable(),
            })
            .with_backward(SchemaOp::DropColumn {
                table: "accounts".into(),
                column: "tier".into(),
            })
            .with_lossy();

        executor.apply(&branch, &consolidate, None).unwrap();
        let outcome = executor.rollback(&branch, &consolidate, None).unwrap();
        assert!(outcome.data_loss_warning);
    }

    #[test]
    fn test_failed_statement_reports_index_and_sql() {
        let dir = tempfile::tempdir().unwrap();
        let branch = branch_at(&dir.path().join("acme.db"));

        // Guarded against a different object, so the broken statement runs.
        let broken = MigrationDescriptor::new("20240104000000_broken").with_forward(
            SchemaOp::raw_conditional(
                &[(Provider::Sqlite, "THIS IS NOT SQL")],
                ObjectRef::table("accounts"),
                ObjectPresence::Absent,
            ),
        );

        let err = executor().apply(&branch, &broken, None).unwrap_err();
        match err {
            Error::Statement {
                branch,
                statement_index,
                sql,
                ..
            } => {
                assert_eq!(branch, "acme");
                assert_eq!(statement_index, 0);
                assert_eq!(sql, "THIS IS NOT SQL");
            }
            other => panic!("expected statement failure, got {other:?}"),
        }
    }

    #[test]
    fn test_failed_transactional_batch_leaves_no_partial_state() {
        let dir = tempfile::tempdir().unwrap();
        let branch = branch_at(&dir.path().join("acme.db"));

        let partial = MigrationDescriptor::new("20240105000000_partial")
            .with_forward(SchemaOp::CreateTable {
                table: "widgets".into(),
                columns: vec![ColumnDef::new("id", LogicalType::Identifier)],
            })
            .with_forward(SchemaOp::raw_conditional(
                &[(Provider::Sqlite, "THIS IS NOT SQL")],
                ObjectRef::table("widgets"),
                ObjectPresence::Present,
            ));

        assert!(executor().apply(&branch, &partial, None).is_err());
        // SQLite DDL is transactional; the create rolled back with the batch.
        assert!(!table_exists(&branch, "widgets"));
    }

    #[test]
    fn test_expired_deadline_fails_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let branch = branch_at(&dir.path().join("acme.db"));
        let deadline = Instant::now() - Duration::from_millis(1);

        let err = executor()
            .apply(&branch, &create_accounts(), Some(deadline))
            .unwrap_err();
        assert!(matches!(err, Error::AttemptTimeout { .. }));
        assert!(!table_exists(&branch, "accounts"));
    }
}
