//! SQL Server dialect.
//!
//! Raw conditional SQL is wrapped in the native `IF OBJECT_ID(...) IS NOT
//! NULL BEGIN ... END` construct. Column rename goes through `sp_rename`.
//! DDL is transactional.

use super::{sql_str, Dialect, Provider, RenderedStatement};
use crate::catalog::ops::{ColumnDef, LogicalType, ObjectPresence, ObjectRef, StatementGuard};

/// Dialect adapter for Microsoft SQL Server.
pub struct SqlServerDialect;

impl SqlServerDialect {
    /// Existence test usable inside an IF condition, positive form.
    fn existence_expr(&self, object: &ObjectRef) -> String {
        match object {
            ObjectRef::Table(table) => {
                format!("OBJECT_ID(N'{}', N'U') IS NOT NULL", sql_str(table))
            }
            ObjectRef::Column { table, column } => format!(
                "COL_LENGTH(N'{}', N'{}') IS NOT NULL",
                sql_str(table),
                sql_str(column)
            ),
            ObjectRef::Index { name, .. } => format!(
                "EXISTS (SELECT 1 FROM sys.indexes WHERE name = N'{}')",
                sql_str(name)
            ),
        }
    }
}

impl Dialect for SqlServerDialect {
    fn provider(&self) -> Provider {
        Provider::SqlServer
    }

    fn quote_ident(&self, ident: &str) -> String {
        format!("[{}]", ident.replace(']', "]]"))
    }

    fn column_type(&self, ty: &LogicalType) -> String {
        match ty {
            LogicalType::Identifier => "UNIQUEIDENTIFIER".to_string(),
            LogicalType::Boolean => "BIT".to_string(),
            LogicalType::Integer => "INT".to_string(),
            LogicalType::BigInt => "BIGINT".to_string(),
            LogicalType::Timestamp => "DATETIME2".to_string(),
            LogicalType::Text => "NVARCHAR(MAX)".to_string(),
            LogicalType::Decimal { precision, scale } => {
                format!("DECIMAL({precision}, {scale})")
            }
        }
    }

    fn default_literal(&self, value: &crate::catalog::ops::DefaultValue) -> String {
        use crate::catalog::ops::DefaultValue;
        match value {
            DefaultValue::Boolean(true) => "1".to_string(),
            DefaultValue::Boolean(false) => "0".to_string(),
            DefaultValue::Integer(n) => n.to_string(),
            DefaultValue::Text(s) => format!("N'{}'", sql_str(s)),
            DefaultValue::Now => "SYSUTCDATETIME()".to_string(),
        }
    }

    fn exists_predicate(&self, object: &ObjectRef) -> String {
        format!("SELECT 1 WHERE {}", self.existence_expr(object))
    }

    fn supports_transactional_ddl(&self) -> bool {
        true
    }

    fn add_column_sql(&self, table: &str, column: &ColumnDef) -> String {
        // T-SQL takes ADD without the COLUMN keyword.
        format!(
            "ALTER TABLE {} ADD {}",
            self.quote_ident(table),
            self.column_clause(column)
        )
    }

    fn rename_column_sql(&self, table: &str, from: &str, to: &str) -> String {
        format!(
            "EXEC sp_rename N'{}.{}', N'{}', 'COLUMN'",
            sql_str(table),
            sql_str(from),
            sql_str(to)
        )
    }

    fn drop_index_sql(&self, name: &str, table: &str) -> String {
        format!(
            "DROP INDEX {} ON {}",
            self.quote_ident(name),
            self.quote_ident(table)
        )
    }

    fn wrap_conditional(&self, sql: &str, guard: &StatementGuard) -> RenderedStatement {
        let condition = match guard.run_when {
            ObjectPresence::Present => self.existence_expr(&guard.object),
            ObjectPresence::Absent => match &guard.object {
                ObjectRef::Table(table) => {
                    format!("OBJECT_ID(N'{}', N'U') IS NULL", sql_str(table))
                }
                ObjectRef::Column { table, column } => format!(
                    "COL_LENGTH(N'{}', N'{}') IS NULL",
                    sql_str(table),
                    sql_str(column)
                ),
                ObjectRef::Index { name, .. } => format!(
                    "NOT EXISTS (SELECT 1 FROM sys.indexes WHERE name = N'{}')",
                    sql_str(name)
                ),
            },
        };
        RenderedStatement {
            sql: format!("IF {condition} BEGIN {sql} END"),
            guard: None,
        }
    }
}
