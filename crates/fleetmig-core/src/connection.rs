//! Branch connection seam.
//!
//! The executor talks to branches through [`BranchConnection`]; a
//! [`Connector`] opens connections from a branch's opaque descriptor. A
//! SQLite backend ships in-crate; network providers plug in behind the same
//! traits.

use crate::branch::Branch;
use crate::dialect::Provider;
use crate::error::{Error, Result};

/// A live connection to one branch database.
pub trait BranchConnection: Send {
    /// Execute one statement (or statement batch) without reading rows.
    fn execute(&mut self, sql: &str) -> Result<()>;

    /// Run an existence predicate: true iff the query yields at least one
    /// row.
    fn query_flag(&mut self, sql: &str) -> Result<bool>;

    /// Begin a transaction. Only called when the branch's dialect supports
    /// transactional DDL.
    fn begin(&mut self) -> Result<()>;

    /// Commit the open transaction.
    fn commit(&mut self) -> Result<()>;

    /// Roll back the open transaction.
    fn rollback_tx(&mut self) -> Result<()>;
}

/// Opens connections from branch descriptors.
pub trait Connector: Send + Sync {
    /// Open a connection to the branch's database.
    fn connect(&self, branch: &Branch) -> Result<Box<dyn BranchConnection>>;
}

/// Connector for SQLite branches. The descriptor is a filesystem path (or
/// `:memory:` for throwaway databases).
pub struct SqliteConnector;

impl Connector for SqliteConnector {
    fn connect(&self, branch: &Branch) -> Result<Box<dyn BranchConnection>> {
        if branch.provider != Provider::Sqlite {
            return Err(Error::Connection(format!(
                "no connector available for provider {} on branch {}",
                branch.provider, branch.code
            )));
        }
        let conn = rusqlite::Connection::open(branch.connection.expose())
            .map_err(|e| Error::Connection(format!("open {}: {e}", branch.code)))?;
        Ok(Box::new(SqliteConnection { conn }))
    }
}

struct SqliteConnection {
    conn: rusqlite::Connection,
}

impl BranchConnection for SqliteConnection {
    fn execute(&mut self, sql: &str) -> Result<()> {
        self.conn
            .execute_batch(sql)
            .map_err(|e| Error::Connection(e.to_string()))
    }

    fn query_flag(&mut self, sql: &str) -> Result<bool> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(|e| Error::Connection(e.to_string()))?;
        stmt.exists([]).map_err(|e| Error::Connection(e.to_string()))
    }

    fn begin(&mut self) -> Result<()> {
        self.execute("BEGIN")
    }

    fn commit(&mut self) -> Result<()> {
        self.execute("COMMIT")
    }

    fn rollback_tx(&mut self) -> Result<()> {
        self.execute("ROLLBACK")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::branch::ConnectionDescriptor;

    fn sqlite_branch(descriptor: &str) -> Branch {
        Branch::new(
            "acme",
            Provider::Sqlite,
            ConnectionDescriptor::new(descriptor),
        )
        .unwrap()
    }

    #[test]
    fn test_execute_and_query_flag() {
        let mut conn = SqliteConnector.connect(&sqlite_branch(":memory:")).unwrap();
        conn.execute("CREATE TABLE t (id INTEGER)").unwrap();
        assert!(conn
            .query_flag("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 't'")
            .unwrap());
        assert!(!conn
            .query_flag("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'u'")
            .unwrap());
    }

    #[test]
    fn test_transaction_rollback_discards_ddl() {
        let mut conn = SqliteConnector.connect(&sqlite_branch(":memory:")).unwrap();
        conn.begin().unwrap();
        conn.execute("CREATE TABLE t (id INTEGER)").unwrap();
        conn.rollback_tx().unwrap();
        assert!(!conn
            .query_flag("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 't'")
            .unwrap());
    }

    #[test]
    fn test_rejects_other_providers() {
        let branch = Branch::new(
            "acme",
            Provider::Postgres,
            ConnectionDescriptor::new("postgres://localhost/acme"),
        )
        .unwrap();
        assert!(matches!(
            SqliteConnector.connect(&branch),
            Err(Error::Connection(_))
        ));
    }
}
