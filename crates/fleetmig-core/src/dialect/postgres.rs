//! PostgreSQL dialect.
//!
//! Raw conditional SQL is wrapped in an anonymous `DO` block that checks
//! object existence natively, so no application-level pre-check is needed.
//! DDL is transactional.

use super::{sql_str, Dialect, Provider, RenderedStatement};
use crate::catalog::ops::{LogicalType, ObjectPresence, ObjectRef, StatementGuard};

/// Dialect adapter for PostgreSQL.
pub struct PostgresDialect;

impl PostgresDialect {
    fn existence_expr(&self, object: &ObjectRef) -> String {
        match object {
            ObjectRef::Table(table) => format!(
                "to_regclass('{}') IS NOT NULL",
                sql_str(&self.quote_ident(table))
            ),
            ObjectRef::Column { table, column } => format!(
                "EXISTS (SELECT 1 FROM information_schema.columns \
                 WHERE table_schema = current_schema() \
                 AND table_name = '{}' AND column_name = '{}')",
                sql_str(table),
                sql_str(column)
            ),
            ObjectRef::Index { name, .. } => format!(
                "EXISTS (SELECT 1 FROM pg_indexes \
                 WHERE schemaname = current_schema() AND indexname = '{}')",
                sql_str(name)
            ),
        }
    }
}

impl Dialect for PostgresDialect {
    fn provider(&self) -> Provider {
        Provider::Postgres
    }

    fn quote_ident(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    fn column_type(&self, ty: &LogicalType) -> String {
        match ty {
            LogicalType::Identifier => "UUID".to_string(),
            LogicalType::Boolean => "BOOLEAN".to_string(),
            LogicalType::Integer => "INTEGER".to_string(),
            LogicalType::BigInt => "BIGINT".to_string(),
            LogicalType::Timestamp => "TIMESTAMPTZ".to_string(),
            LogicalType::Text => "TEXT".to_string(),
            LogicalType::Decimal { precision, scale } => {
                format!("NUMERIC({precision}, {scale})")
            }
        }
    }

    fn default_literal(&self, value: &crate::catalog::ops::DefaultValue) -> String {
        use crate::catalog::ops::DefaultValue;
        match value {
            DefaultValue::Boolean(true) => "TRUE".to_string(),
            DefaultValue::Boolean(false) => "FALSE".to_string(),
            DefaultValue::Integer(n) => n.to_string(),
            DefaultValue::Text(s) => format!("'{}'", sql_str(s)),
            DefaultValue::Now => "now()".to_string(),
        }
    }

    fn exists_predicate(&self, object: &ObjectRef) -> String {
        format!("SELECT 1 WHERE {}", self.existence_expr(object))
    }

    fn supports_transactional_ddl(&self) -> bool {
        true
    }

    fn wrap_conditional(&self, sql: &str, guard: &StatementGuard) -> RenderedStatement {
        let mut condition = self.existence_expr(&guard.object);
        if guard.run_when == ObjectPresence::Absent {
            condition = format!("NOT ({condition})");
        }
        RenderedStatement {
            sql: format!(
                "DO $do$ BEGIN IF {condition} THEN EXECUTE $guarded${sql}$guarded$; \
                 END IF; END $do$"
            ),
            guard: None,
        }
    }
}
