//! Dialect adapters: per-provider translation of abstract operations into
//! executable DDL.
//!
//! One implementation per provider, selected by a branch's fixed provider
//! field. The adapter owns identifier quoting, the logical-to-native type
//! map (the single source of truth for type resolution), existence
//! predicates for defensive guards, and the provider's native conditional
//! wrapping for raw SQL where one exists.

pub mod mysql;
pub mod postgres;
pub mod sqlite;
pub mod sqlserver;

pub use mysql::MySqlDialect;
pub use postgres::PostgresDialect;
pub use sqlite::SqliteDialect;
pub use sqlserver::SqlServerDialect;

use crate::catalog::ops::{
    ColumnDef, DefaultValue, LogicalType, ObjectRef, SchemaOp, StatementGuard,
};
use crate::error::{Error, Result};

/// SQL engine a branch runs on. Fixed at branch creation; it selects the
/// dialect adapter for every migration against that branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// SQLite.
    Sqlite,
    /// Microsoft SQL Server.
    SqlServer,
    /// MySQL 8+.
    MySql,
    /// PostgreSQL.
    Postgres,
}

impl Provider {
    /// The dialect adapter for this provider.
    pub fn dialect(self) -> &'static dyn Dialect {
        match self {
            Provider::Sqlite => &SqliteDialect,
            Provider::SqlServer => &SqlServerDialect,
            Provider::MySql => &MySqlDialect,
            Provider::Postgres => &PostgresDialect,
        }
    }

    /// Lowercase provider name.
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::Sqlite => "sqlite",
            Provider::SqlServer => "sqlserver",
            Provider::MySql => "mysql",
            Provider::Postgres => "postgres",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One executable statement produced by rendering an operation.
///
/// When `guard` is set, the executor must evaluate the dialect's existence
/// predicate for the guard object and skip the statement unless the
/// presence condition holds. A `None` guard means the condition is already
/// embedded in the statement (native conditional construct) or the
/// statement is unconditional.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedStatement {
    /// Executable statement text.
    pub sql: String,
    /// Application-level existence precondition, if any.
    pub guard: Option<StatementGuard>,
}

/// Escape a string for inclusion in a single-quoted SQL literal.
pub(crate) fn sql_str(s: &str) -> String {
    s.replace('\'', "''")
}

/// Per-provider rendering of abstract schema operations.
pub trait Dialect: Send + Sync {
    /// The provider this dialect renders for.
    fn provider(&self) -> Provider;

    /// Quote an identifier in the provider's convention.
    fn quote_ident(&self, ident: &str) -> String;

    /// Resolve a logical column type to the provider-native type name.
    /// This map is the only place native type names appear.
    fn column_type(&self, ty: &LogicalType) -> String;

    /// Render a default value literal.
    fn default_literal(&self, value: &DefaultValue) -> String {
        match value {
            DefaultValue::Boolean(true) => "1".to_string(),
            DefaultValue::Boolean(false) => "0".to_string(),
            DefaultValue::Integer(n) => n.to_string(),
            DefaultValue::Text(s) => format!("'{}'", sql_str(s)),
            DefaultValue::Now => "CURRENT_TIMESTAMP".to_string(),
        }
    }

    /// A query yielding at least one row iff the object exists. Used by the
    /// executor to evaluate application-level guards.
    fn exists_predicate(&self, object: &ObjectRef) -> String;

    /// Whether DDL can run inside a transaction on this provider.
    fn supports_transactional_ddl(&self) -> bool;

    /// Column clause within CREATE TABLE / ADD COLUMN.
    fn column_clause(&self, column: &ColumnDef) -> String {
        let mut clause = format!(
            "{} {}",
            self.quote_ident(&column.name),
            self.column_type(&column.ty)
        );
        if !column.nullable {
            clause.push_str(" NOT NULL");
        }
        if let Some(default) = &column.default {
            clause.push_str(" DEFAULT ");
            clause.push_str(&self.default_literal(default));
        }
        clause
    }

    /// ADD COLUMN statement. SQL Server omits the COLUMN keyword.
    fn add_column_sql(&self, table: &str, column: &ColumnDef) -> String {
        format!(
            "ALTER TABLE {} ADD COLUMN {}",
            self.quote_ident(table),
            self.column_clause(column)
        )
    }

    /// RENAME COLUMN statement. SQL Server uses `sp_rename`.
    fn rename_column_sql(&self, table: &str, from: &str, to: &str) -> String {
        format!(
            "ALTER TABLE {} RENAME COLUMN {} TO {}",
            self.quote_ident(table),
            self.quote_ident(from),
            self.quote_ident(to)
        )
    }

    /// DROP INDEX statement. MySQL and SQL Server scope it to the table.
    fn drop_index_sql(&self, name: &str, _table: &str) -> String {
        format!("DROP INDEX {}", self.quote_ident(name))
    }

    /// Wrap a raw statement in the provider's native "execute only if the
    /// object exists" construct. The default has no such construct and
    /// returns the statement with an application-level guard for the
    /// executor to pre-check.
    fn wrap_conditional(&self, sql: &str, guard: &StatementGuard) -> RenderedStatement {
        RenderedStatement {
            sql: sql.to_string(),
            guard: Some(guard.clone()),
        }
    }

    /// Render one abstract operation into executable statements.
    fn render(&self, op: &SchemaOp) -> Result<Vec<RenderedStatement>> {
        let guard = op.guard();
        let sql = match op {
            SchemaOp::CreateTable { table, columns } => {
                let cols: Vec<String> =
                    columns.iter().map(|c| self.column_clause(c)).collect();
                format!(
                    "CREATE TABLE {} ({})",
                    self.quote_ident(table),
                    cols.join(", ")
                )
            }
            SchemaOp::DropTable { table } => {
                format!("DROP TABLE {}", self.quote_ident(table))
            }
            SchemaOp::AddColumn { table, column } => self.add_column_sql(table, column),
            SchemaOp::DropColumn { table, column } => format!(
                "ALTER TABLE {} DROP COLUMN {}",
                self.quote_ident(table),
                self.quote_ident(column)
            ),
            SchemaOp::RenameColumn { table, from, to } => {
                self.rename_column_sql(table, from, to)
            }
            SchemaOp::CreateIndex {
                name,
                table,
                columns,
                unique,
            } => {
                let cols: Vec<String> =
                    columns.iter().map(|c| self.quote_ident(c)).collect();
                format!(
                    "CREATE {}INDEX {} ON {} ({})",
                    if *unique { "UNIQUE " } else { "" },
                    self.quote_ident(name),
                    self.quote_ident(table),
                    cols.join(", ")
                )
            }
            SchemaOp::DropIndex { name, table } => self.drop_index_sql(name, table),
            SchemaOp::RawConditionalSql { per_provider, .. } => {
                let template = per_provider.get(&self.provider()).ok_or_else(|| {
                    Error::Unsupported {
                        provider: self.provider(),
                        operation: format!("raw conditional SQL touching {}", guard.object),
                    }
                })?;
                return Ok(vec![self.wrap_conditional(template, &guard)]);
            }
        };
        Ok(vec![RenderedStatement {
            sql,
            guard: Some(guard),
        }])
    }
}
