//! Abstract schema operations.
//!
//! Migrations are authored against these provider-neutral operations; the
//! dialect adapters translate them into executable DDL per provider. Column
//! types are logical ([`LogicalType`]); provider-native type names exist
//! only inside the dialect type maps, never in authored migrations.

use crate::dialect::Provider;
use std::collections::BTreeMap;

/// Logical column types resolved by each dialect's type map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogicalType {
    /// 128-bit identifier (GUID).
    Identifier,
    /// Boolean value.
    Boolean,
    /// 32-bit signed integer.
    Integer,
    /// 64-bit signed integer.
    BigInt,
    /// Point in time.
    Timestamp,
    /// Unbounded UTF-8 text.
    Text,
    /// Fixed-precision decimal.
    Decimal {
        /// Total number of digits.
        precision: u8,
        /// Digits after the decimal point.
        scale: u8,
    },
}

/// Provider-neutral default value for a column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefaultValue {
    /// Boolean literal.
    Boolean(bool),
    /// Integer literal.
    Integer(i64),
    /// Text literal.
    Text(String),
    /// Current timestamp at insert time.
    Now,
}

/// A column definition within a create-table or add-column operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    /// Column name.
    pub name: String,
    /// Logical type, resolved per provider by the dialect.
    pub ty: LogicalType,
    /// Whether NULL is allowed.
    pub nullable: bool,
    /// Optional default value.
    pub default: Option<DefaultValue>,
}

impl ColumnDef {
    /// A non-nullable column with no default.
    pub fn new(name: impl Into<String>, ty: LogicalType) -> Self {
        Self {
            name: name.into(),
            ty,
            nullable: false,
            default: None,
        }
    }

    /// Allow NULL.
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Set a default value.
    pub fn with_default(mut self, default: DefaultValue) -> Self {
        self.default = Some(default);
        self
    }
}

/// A schema object an existence guard can point at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectRef {
    /// A table.
    Table(String),
    /// A column of a table.
    Column {
        /// Owning table.
        table: String,
        /// Column name.
        column: String,
    },
    /// A named index.
    Index {
        /// Index name.
        name: String,
        /// Indexed table.
        table: String,
    },
}

impl ObjectRef {
    /// Reference a table.
    pub fn table(name: impl Into<String>) -> Self {
        ObjectRef::Table(name.into())
    }

    /// Reference a column.
    pub fn column(table: impl Into<String>, column: impl Into<String>) -> Self {
        ObjectRef::Column {
            table: table.into(),
            column: column.into(),
        }
    }

    /// Reference an index.
    pub fn index(name: impl Into<String>, table: impl Into<String>) -> Self {
        ObjectRef::Index {
            name: name.into(),
            table: table.into(),
        }
    }
}

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObjectRef::Table(t) => write!(f, "table {t}"),
            ObjectRef::Column { table, column } => write!(f, "column {table}.{column}"),
            ObjectRef::Index { name, table } => write!(f, "index {name} on {table}"),
        }
    }
}

/// Whether a guarded statement runs when its object is present or absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectPresence {
    /// Run only when the object exists.
    Present,
    /// Run only when the object does not exist.
    Absent,
}

/// Existence precondition checked before a statement runs.
///
/// Guards make re-runs idempotent: a creation that already happened, or a
/// drop whose target is already gone, is silently skipped instead of
/// failing. This is the safety net for crash recovery: a reclaimed lock
/// cannot know how far the previous attempt got.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementGuard {
    /// The object whose existence is probed.
    pub object: ObjectRef,
    /// The presence state under which the statement should run.
    pub run_when: ObjectPresence,
}

/// One abstract schema operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaOp {
    /// Create a table with the given columns.
    CreateTable {
        /// Table name.
        table: String,
        /// Column definitions.
        columns: Vec<ColumnDef>,
    },
    /// Drop a table.
    DropTable {
        /// Table name.
        table: String,
    },
    /// Add a column to an existing table.
    AddColumn {
        /// Table name.
        table: String,
        /// The column to add.
        column: ColumnDef,
    },
    /// Drop a column from a table.
    DropColumn {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },
    /// Rename a column.
    RenameColumn {
        /// Table name.
        table: String,
        /// Current column name.
        from: String,
        /// New column name.
        to: String,
    },
    /// Create an index.
    CreateIndex {
        /// Index name.
        name: String,
        /// Indexed table.
        table: String,
        /// Indexed columns, in order.
        columns: Vec<String>,
        /// Whether the index enforces uniqueness.
        unique: bool,
    },
    /// Drop an index.
    DropIndex {
        /// Index name.
        name: String,
        /// Indexed table (required by some providers' drop syntax).
        table: String,
    },
    /// Provider-specific raw SQL, guarded by a named object so the executor
    /// can pre-check existence on providers without native conditional DDL.
    RawConditionalSql {
        /// One statement template per provider that supports this operation.
        per_provider: BTreeMap<Provider, String>,
        /// The object the statement touches.
        guard_object: ObjectRef,
        /// When the statement should run relative to the guard object.
        run_when: ObjectPresence,
    },
}

impl SchemaOp {
    /// Build a raw conditional operation from `(provider, template)` pairs.
    pub fn raw_conditional(
        templates: &[(Provider, &str)],
        guard_object: ObjectRef,
        run_when: ObjectPresence,
    ) -> Self {
        SchemaOp::RawConditionalSql {
            per_provider: templates
                .iter()
                .map(|(p, sql)| (*p, sql.to_string()))
                .collect(),
            guard_object,
            run_when,
        }
    }

    /// The existence precondition under which this operation should run.
    ///
    /// Creations run only when their object is absent, drops only when it is
    /// present, renames only while the source column still exists. Raw SQL
    /// carries its own declared guard.
    pub fn guard(&self) -> StatementGuard {
        match self {
            SchemaOp::CreateTable { table, .. } => StatementGuard {
                object: ObjectRef::table(table.clone()),
                run_when: ObjectPresence::Absent,
            },
            SchemaOp::DropTable { table } => StatementGuard {
                object: ObjectRef::table(table.clone()),
                run_when: ObjectPresence::Present,
            },
            SchemaOp::AddColumn { table, column } => StatementGuard {
                object: ObjectRef::column(table.clone(), column.name.clone()),
                run_when: ObjectPresence::Absent,
            },
            SchemaOp::DropColumn { table, column } => StatementGuard {
                object: ObjectRef::column(table.clone(), column.clone()),
                run_when: ObjectPresence::Present,
            },
            SchemaOp::RenameColumn { table, from, .. } => StatementGuard {
                object: ObjectRef::column(table.clone(), from.clone()),
                run_when: ObjectPresence::Present,
            },
            SchemaOp::CreateIndex { name, table, .. } => StatementGuard {
                object: ObjectRef::index(name.clone(), table.clone()),
                run_when: ObjectPresence::Absent,
            },
            SchemaOp::DropIndex { name, table } => StatementGuard {
                object: ObjectRef::index(name.clone(), table.clone()),
                run_when: ObjectPresence::Present,
            },
            SchemaOp::RawConditionalSql {
                guard_object,
                run_when,
                ..
            } => StatementGuard {
                object: guard_object.clone(),
                run_when: *run_when,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_builders() {
        let col = ColumnDef::new("active", LogicalType::Boolean)
            .with_default(DefaultValue::Boolean(true));
        assert!(!col.nullable);
        assert_eq!(col.default, Some(DefaultValue::Boolean(true)));

        let col = ColumnDef::new("notes", LogicalType::Text).nullable();
        assert!(col.nullable);
        assert!(col.default.is_none());
    }

    #[test]
    fn test_create_guard_runs_when_absent() {
        let op = SchemaOp::CreateTable {
            table: "accounts".into(),
            columns: vec![ColumnDef::new("id", LogicalType::Identifier)],
        };
        let guard = op.guard();
        assert_eq!(guard.object, ObjectRef::table("accounts"));
        assert_eq!(guard.run_when, ObjectPresence::Absent);
    }

    #[test]
    fn test_drop_guard_runs_when_present() {
        let op = SchemaOp::DropColumn {
            table: "accounts".into(),
            column: "legacy_flag".into(),
        };
        let guard = op.guard();
        assert_eq!(guard.object, ObjectRef::column("accounts", "legacy_flag"));
        assert_eq!(guard.run_when, ObjectPresence::Present);
    }

    #[test]
    fn test_rename_guard_tracks_source_column() {
        let op = SchemaOp::RenameColumn {
            table: "accounts".into(),
            from: "mail".into(),
            to: "email".into(),
        };
        let guard = op.guard();
        assert_eq!(guard.object, ObjectRef::column("accounts", "mail"));
        assert_eq!(guard.run_when, ObjectPresence::Present);
    }

    #[test]
    fn test_raw_conditional_carries_declared_guard() {
        let op = SchemaOp::raw_conditional(
            &[(Provider::Postgres, "UPDATE t SET x = 1")],
            ObjectRef::table("t"),
            ObjectPresence::Present,
        );
        let guard = op.guard();
        assert_eq!(guard.object, ObjectRef::table("t"));
        assert_eq!(guard.run_when, ObjectPresence::Present);
    }
}
