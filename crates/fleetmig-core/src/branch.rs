//! Branch model: an independently provisioned tenant database.
//!
//! Branch metadata is owned by an external registry; this crate only
//! references it through the [`BranchDirectory`] seam. The connection
//! descriptor is an opaque capability handle: the orchestrator passes it
//! to a connector and never inspects its contents.

use crate::dialect::Provider;
use crate::error::{Error, Result};
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Opaque connection credential bundle for one branch.
///
/// Redacted from debug output; only a connector may look inside.
#[derive(Clone)]
pub struct ConnectionDescriptor(String);

impl ConnectionDescriptor {
    /// Wrap a raw descriptor string.
    pub fn new(descriptor: impl Into<String>) -> Self {
        ConnectionDescriptor(descriptor.into())
    }

    /// The raw descriptor, for connector implementations only.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ConnectionDescriptor(<redacted>)")
    }
}

/// One tenant database instance.
#[derive(Debug, Clone)]
pub struct Branch {
    /// Unique branch code.
    pub code: String,
    /// SQL engine the branch runs on. Fixed at creation; never mixed.
    pub provider: Provider,
    /// Opaque connection descriptor.
    pub connection: ConnectionDescriptor,
}

impl Branch {
    /// Create a branch, validating the code charset.
    pub fn new(
        code: impl Into<String>,
        provider: Provider,
        connection: ConnectionDescriptor,
    ) -> Result<Self> {
        let code = code.into();
        validate_code(&code)?;
        Ok(Self {
            code,
            provider,
            connection,
        })
    }
}

/// Branch codes are restricted so they embed safely in store keys and logs.
pub fn validate_code(code: &str) -> Result<()> {
    let valid = !code.is_empty()
        && code
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidBranchCode(code.to_string()))
    }
}

/// Read access to the external branch registry.
///
/// Branch registration and metadata CRUD live outside this crate; the
/// orchestrator only needs lookup and enumeration.
pub trait BranchDirectory: Send + Sync {
    /// Look up a branch by code.
    fn get(&self, code: &str) -> Option<Branch>;

    /// All known branches.
    fn list(&self) -> Vec<Branch>;
}

/// In-memory directory for embedding and tests.
#[derive(Default)]
pub struct InMemoryDirectory {
    branches: RwLock<BTreeMap<String, Branch>>,
}

impl InMemoryDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a branch.
    pub fn insert(&self, branch: Branch) {
        self.branches.write().insert(branch.code.clone(), branch);
    }
}

impl BranchDirectory for InMemoryDirectory {
    fn get(&self, code: &str) -> Option<Branch> {
        self.branches.read().get(code).cloned()
    }

    fn list(&self) -> Vec<Branch> {
        self.branches.read().values().cloned().collect()
    }
}
