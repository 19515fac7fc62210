//! Fleetmig core - schema migration orchestration for branch fleets.
//!
//! Coordinates an ordered catalog of schema migrations across independently
//! provisioned tenant ("branch") databases running on heterogeneous SQL
//! engines. Each branch is migrated independently under a durable lock
//! lease, with idempotent re-runs, bounded automatic retries, and tail-only
//! rollback.
//!
//! # Example
//!
//! ```ignore
//! use fleetmig_core::{
//!     BranchStateStore, MigrationCatalog, Orchestrator, OrchestratorConfig,
//!     SqliteConnector,
//! };
//! use std::sync::Arc;
//!
//! let db = sled::open("fleet-state")?;
//! let orchestrator = Orchestrator::new(
//!     Arc::new(catalog),
//!     Arc::new(BranchStateStore::open(&db)?),
//!     Arc::new(SqliteConnector),
//!     directory,
//!     OrchestratorConfig::default(),
//! );
//!
//! orchestrator.register_branch("acme")?;
//! let state = orchestrator.apply_branch("acme")?;
//! println!("acme is {}", state.status);
//! ```

pub mod branch;
pub mod catalog;
pub mod connection;
pub mod dialect;
pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod state;

// Catalog types
pub use catalog::{
    ColumnDef, DefaultValue, LogicalType, MigrationCatalog, MigrationDescriptor, MigrationId,
    ObjectPresence, ObjectRef, SchemaOp, StatementGuard,
};

// Error types
pub use error::{Error, Result};

// Dialect types
pub use dialect::{Dialect, Provider, RenderedStatement};

// Branch and connection types
pub use branch::{Branch, BranchDirectory, ConnectionDescriptor, InMemoryDirectory};
pub use connection::{BranchConnection, Connector, SqliteConnector};

// State types
pub use state::{
    AppliedMigration, BranchMigrationState, BranchStateStore, BranchStatus, LockToken,
};

// Executor types
pub use executor::{ExecutionOutcome, MigrationExecutor};

// Orchestrator types
pub use orchestrator::{
    BranchReport, Orchestrator, OrchestratorConfig, RollbackOutcome, RollbackReport,
};
