//! The migration catalog shipped with this server build.
//!
//! Every branch in the fleet is driven toward the head of this list,
//! whatever engine it runs on: column types are logical and raw SQL
//! carries one template per provider.

use fleetmig_core::{
    ColumnDef, DefaultValue, LogicalType, MigrationCatalog, MigrationDescriptor, ObjectPresence,
    ObjectRef, Provider, Result, SchemaOp,
};

/// Build the catalog. Order is append-only: new migrations go at the end
/// with a fresh timestamp id.
pub fn catalog() -> Result<MigrationCatalog> {
    MigrationCatalog::new(vec![
        create_accounts(),
        create_invoices(),
        unique_account_email(),
        consolidate_plan_tiers(),
    ])
}

fn create_accounts() -> MigrationDescriptor {
    MigrationDescriptor::new("20240105093000_create_accounts")
        .with_forward(SchemaOp::CreateTable {
            table: "accounts".into(),
            columns: vec![
                ColumnDef::new("id", LogicalType::Identifier),
                ColumnDef::new("name", LogicalType::Text),
                ColumnDef::new("email", LogicalType::Text).nullable(),
                ColumnDef::new("plan", LogicalType::Text)
                    .with_default(DefaultValue::Text("standard".into())),
                ColumnDef::new("active", LogicalType::Boolean)
                    .with_default(DefaultValue::Boolean(true)),
                ColumnDef::new("created_at", LogicalType::Timestamp)
                    .with_default(DefaultValue::Now),
            ],
        })
        .with_backward(SchemaOp::DropTable {
            table: "accounts".into(),
        })
}

fn create_invoices() -> MigrationDescriptor {
    MigrationDescriptor::new("20240119110000_create_invoices")
        .with_forward(SchemaOp::CreateTable {
            table: "invoices".into(),
            columns: vec![
                ColumnDef::new("id", LogicalType::Identifier),
                ColumnDef::new("account_id", LogicalType::Identifier),
                ColumnDef::new(
                    "amount",
                    LogicalType::Decimal {
                        precision: 12,
                        scale: 2,
                    },
                ),
                ColumnDef::new("issued_at", LogicalType::Timestamp)
                    .with_default(DefaultValue::Now),
            ],
        })
        .with_forward(SchemaOp::CreateIndex {
            name: "idx_invoices_account".into(),
            table: "invoices".into(),
            columns: vec!["account_id".into()],
            unique: false,
        })
        .with_backward(SchemaOp::DropIndex {
            name: "idx_invoices_account".into(),
            table: "invoices".into(),
        })
        .with_backward(SchemaOp::DropTable {
            table: "invoices".into(),
        })
}

fn unique_account_email() -> MigrationDescriptor {
    MigrationDescriptor::new("20240203150000_unique_account_email")
        .with_forward(SchemaOp::CreateIndex {
            name: "idx_accounts_email".into(),
            table: "accounts".into(),
            columns: vec!["email".into()],
            unique: true,
        })
        .with_backward(SchemaOp::DropIndex {
            name: "idx_accounts_email".into(),
            table: "accounts".into(),
        })
}

/// Consolidates the legacy `gold` and `platinum` plan tiers into `pro`.
///
/// Lossy by design: the reversal maps every `pro` row back to `gold`, the
/// more common legacy tier; which rows were `platinum` is not recoverable.
fn consolidate_plan_tiers() -> MigrationDescriptor {
    let forward_sql = |quote: fn(&str) -> String| {
        format!(
            "UPDATE {accounts} SET {plan} = 'pro' WHERE {plan} IN ('gold', 'platinum')",
            accounts = quote("accounts"),
            plan = quote("plan"),
        )
    };
    let backward_sql = |quote: fn(&str) -> String| {
        format!(
            "UPDATE {accounts} SET {plan} = 'gold' WHERE {plan} = 'pro'",
            accounts = quote("accounts"),
            plan = quote("plan"),
        )
    };
    let double_quoted = |ident: &str| format!("\"{ident}\"");
    let bracketed = |ident: &str| format!("[{ident}]");
    let backticked = |ident: &str| format!("`{ident}`");

    MigrationDescriptor::new("20240217093000_consolidate_plan_tiers")
        .with_forward(SchemaOp::raw_conditional(
            &[
                (Provider::Sqlite, forward_sql(double_quoted).as_str()),
                (Provider::Postgres, forward_sql(double_quoted).as_str()),
                (Provider::SqlServer, forward_sql(bracketed).as_str()),
                (Provider::MySql, forward_sql(backticked).as_str()),
            ],
            ObjectRef::column("accounts", "plan"),
            ObjectPresence::Present,
        ))
        .with_backward(SchemaOp::raw_conditional(
            &[
                (Provider::Sqlite, backward_sql(double_quoted).as_str()),
                (Provider::Postgres, backward_sql(double_quoted).as_str()),
                (Provider::SqlServer, backward_sql(bracketed).as_str()),
                (Provider::MySql, backward_sql(backticked).as_str()),
            ],
            ObjectRef::column("accounts", "plan"),
            ObjectPresence::Present,
        ))
        .with_lossy()
}
