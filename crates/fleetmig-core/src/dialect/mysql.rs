//! MySQL dialect (MySQL 8+).
//!
//! MySQL has no conditional DDL construct usable for arbitrary statements,
//! so raw conditional SQL keeps an application-level guard. DDL is not
//! transactional (every DDL statement commits implicitly), so the executor
//! runs statements sequentially with per-statement error capture.

use super::{sql_str, Dialect, Provider};
use crate::catalog::ops::{LogicalType, ObjectRef};

/// Dialect adapter for MySQL.
pub struct MySqlDialect;

impl Dialect for MySqlDialect {
    fn provider(&self) -> Provider {
        Provider::MySql
    }

    fn quote_ident(&self, ident: &str) -> String {
        format!("`{}`", ident.replace('`', "``"))
    }

    fn column_type(&self, ty: &LogicalType) -> String {
        match ty {
            LogicalType::Identifier => "CHAR(36)".to_string(),
            LogicalType::Boolean => "TINYINT(1)".to_string(),
            LogicalType::Integer => "INT".to_string(),
            LogicalType::BigInt => "BIGINT".to_string(),
            LogicalType::Timestamp => "DATETIME(6)".to_string(),
            LogicalType::Text => "LONGTEXT".to_string(),
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
            DefaultValue::Text(s) => format!("'{}'", sql_str(s)),
            DefaultValue::Now => "CURRENT_TIMESTAMP(6)".to_string(),
        }
    }

    fn exists_predicate(&self, object: &ObjectRef) -> String {
        match object {
            ObjectRef::Table(table) => format!(
                "SELECT 1 FROM information_schema.tables \
                 WHERE table_schema = DATABASE() AND table_name = '{}'",
                sql_str(table)
            ),
            ObjectRef::Column { table, column } => format!(
                "SELECT 1 FROM information_schema.columns \
                 WHERE table_schema = DATABASE() \
                 AND table_name = '{}' AND column_name = '{}'",
                sql_str(table),
                sql_str(column)
            ),
            ObjectRef::Index { name, table } => format!(
                "SELECT 1 FROM information_schema.statistics \
                 WHERE table_schema = DATABASE() \
                 AND table_name = '{}' AND index_name = '{}'",
                sql_str(table),
                sql_str(name)
            ),
        }
    }

    fn supports_transactional_ddl(&self) -> bool {
        false
    }

    fn drop_index_sql(&self, name: &str, table: &str) -> String {
        format!(
            "DROP INDEX {} ON {}",
            self.quote_ident(name),
            self.quote_ident(table)
        )
    }
}
