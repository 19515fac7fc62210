//! SQLite dialect.
//!
//! SQLite has no native conditional DDL guard; raw conditional SQL falls
//! back to the application-level pre-check. DDL is transactional.

use super::{sql_str, Dialect, Provider};
use crate::catalog::ops::{LogicalType, ObjectRef};

/// Dialect adapter for SQLite.
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn provider(&self) -> Provider {
        Provider::Sqlite
    }

    fn quote_ident(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    fn column_type(&self, ty: &LogicalType) -> String {
        match ty {
            LogicalType::Identifier => "TEXT".to_string(),
            LogicalType::Boolean => "INTEGER".to_string(),
            LogicalType::Integer => "INTEGER".to_string(),
            LogicalType::BigInt => "INTEGER".to_string(),
            LogicalType::Timestamp => "TEXT".to_string(),
            LogicalType::Text => "TEXT".to_string(),
            LogicalType::Decimal { precision, scale } => {
                format!("NUMERIC({precision}, {scale})")
            }
        }
    }

    fn exists_predicate(&self, object: &ObjectRef) -> String {
        match object {
            ObjectRef::Table(table) => format!(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = '{}'",
                sql_str(table)
            ),
            ObjectRef::Column { table, column } => format!(
                "SELECT 1 FROM pragma_table_info('{}') WHERE name = '{}'",
                sql_str(table),
                sql_str(column)
            ),
            ObjectRef::Index { name, .. } => format!(
                "SELECT 1 FROM sqlite_master WHERE type = 'index' AND name = '{}'",
                sql_str(name)
            ),
        }
    }

    fn supports_transactional_ddl(&self) -> bool {
        true
    }
}
