//! Migration catalog: the ordered, shared definition of all schema changes.
//!
//! The catalog is immutable once constructed and is safely shared across all
//! branch workers. Every branch's progress is measured against it: a branch's
//! applied history must always be a prefix of the catalog order.

pub mod ops;

pub use ops::{
    ColumnDef, DefaultValue, LogicalType, ObjectPresence, ObjectRef, SchemaOp, StatementGuard,
};

use crate::error::{Error, Result};
use rkyv::{Archive, Deserialize, Serialize};

/// Identifier of a single migration.
///
/// Ids are ordering keys by convention (`<timestamp>_<name>`, e.g.
/// `20240105093000_create_accounts`); the catalog enforces strictly
/// increasing ids at construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Archive, Serialize, Deserialize)]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct MigrationId(String);

impl MigrationId {
    /// Create a migration id.
    pub fn new(id: impl Into<String>) -> Self {
        MigrationId(id.into())
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MigrationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MigrationId {
    fn from(s: &str) -> Self {
        MigrationId::new(s)
    }
}

/// One versioned schema change: a forward operation sequence and a
/// best-effort backward sequence.
///
/// Descriptors are immutable; build them with the `with_*` constructors and
/// hand them to [`MigrationCatalog::new`]. A descriptor whose reversal cannot
/// fully reconstruct prior data must be flagged `lossy`; rollback still
/// runs, but the outcome carries a data-loss warning.
#[derive(Debug, Clone)]
pub struct MigrationDescriptor {
    /// Monotonic ordering key, unique within the catalog.
    pub id: MigrationId,
    /// Operations applied in order when migrating forward.
    pub forward_ops: Vec<SchemaOp>,
    /// Operations applied in order when rolling back. May be empty for
    /// migrations with no reasonable inverse.
    pub backward_ops: Vec<SchemaOp>,
    /// True when the backward operations are a best-effort mapping that
    /// loses data (e.g. an enum consolidation).
    pub lossy: bool,
}

impl MigrationDescriptor {
    /// Create a descriptor with no operations.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: MigrationId::new(id),
            forward_ops: Vec::new(),
            backward_ops: Vec::new(),
            lossy: false,
        }
    }

    /// Append a forward operation.
    pub fn with_forward(mut self, op: SchemaOp) -> Self {
        self.forward_ops.push(op);
        self
    }

    /// Append a backward operation.
    pub fn with_backward(mut self, op: SchemaOp) -> Self {
        self.backward_ops.push(op);
        self
    }

    /// Flag the backward operations as lossy.
    pub fn with_lossy(mut self) -> Self {
        self.lossy = true;
        self
    }
}

/// The ordered, immutable set of all known migrations.
pub struct MigrationCatalog {
    entries: Vec<MigrationDescriptor>,
}

impl MigrationCatalog {
    /// Build a catalog, validating that ids are unique and strictly
    /// increasing.
    pub fn new(entries: Vec<MigrationDescriptor>) -> Result<Self> {
        for pair in entries.windows(2) {
            if pair[1].id <= pair[0].id {
                return Err(Error::CatalogDefinition(format!(
                    "migration id {} must sort after {}",
                    pair[1].id, pair[0].id
                )));
            }
        }
        Ok(Self { entries })
    }

    /// All migrations in catalog order.
    pub fn list(&self) -> &[MigrationDescriptor] {
        &self.entries
    }

    /// Number of migrations in the catalog.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up a descriptor by id.
    pub fn descriptor(&self, id: &MigrationId) -> Option<&MigrationDescriptor> {
        self.entries.iter().find(|d| &d.id == id)
    }

    /// Migrations not yet applied by a branch, in catalog order.
    ///
    /// `applied` must be exactly a prefix of the catalog order. Anything
    /// else is corruption: an id the catalog does not know means the branch
    /// is ahead of this orchestrator build; a mismatched position means the
    /// branch has a hole in its history.
    pub fn pending_for(
        &self,
        branch: &str,
        applied: &[MigrationId],
    ) -> Result<&[MigrationDescriptor]> {
        for (position, id) in applied.iter().enumerate() {
            let expected = self.entries.get(position).ok_or_else(|| {
                Error::CatalogCorruption {
                    branch: branch.to_string(),
                    detail: format!(
                        "applied migration {id} is beyond the known catalog ({} entries); \
                         the branch is ahead of this orchestrator",
                        self.entries.len()
                    ),
                }
            })?;
            if expected.id != *id {
                return Err(Error::CatalogCorruption {
                    branch: branch.to_string(),
                    detail: format!(
                        "applied migration {id} at position {position} does not match \
                         catalog entry {}; history has a hole or is reordered",
                        expected.id
                    ),
                });
            }
        }
        Ok(&self.entries[applied.len()..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(descs: &[MigrationDescriptor]) -> Vec<&str> {
        descs.iter().map(|d| d.id.as_str()).collect()
    }

    fn catalog() -> MigrationCatalog {
        MigrationCatalog::new(vec![
            MigrationDescriptor::new("20240101000000_one"),
            MigrationDescriptor::new("20240102000000_two"),
            MigrationDescriptor::new("20240103000000_three"),
        ])
        .unwrap()
    }

    #[test]
    fn test_rejects_unordered_ids() {
        let result = MigrationCatalog::new(vec![
            MigrationDescriptor::new("20240102000000_two"),
            MigrationDescriptor::new("20240101000000_one"),
        ]);
        assert!(matches!(result, Err(Error::CatalogDefinition(_))));
    }

    #[test]
    fn test_rejects_duplicate_ids() {
        let result = MigrationCatalog::new(vec![
            MigrationDescriptor::new("20240101000000_one"),
            MigrationDescriptor::new("20240101000000_one"),
        ]);
        assert!(matches!(result, Err(Error::CatalogDefinition(_))));
    }

    #[test]
    fn test_pending_for_fresh_branch() {
        let catalog = catalog();
        let pending = catalog.pending_for("acme", &[]).unwrap();
        assert_eq!(
            ids(pending),
            vec![
                "20240101000000_one",
                "20240102000000_two",
                "20240103000000_three"
            ]
        );
    }

    #[test]
    fn test_pending_for_partial_branch() {
        let catalog = catalog();
        let applied = vec![MigrationId::new("20240101000000_one")];
        let pending = catalog.pending_for("acme", &applied).unwrap();
        assert_eq!(ids(pending), vec!["20240102000000_two", "20240103000000_three"]);
    }

    #[test]
    fn test_pending_for_complete_branch() {
        let catalog = catalog();
        let applied = vec![
            MigrationId::new("20240101000000_one"),
            MigrationId::new("20240102000000_two"),
            MigrationId::new("20240103000000_three"),
        ];
        assert!(catalog.pending_for("acme", &applied).unwrap().is_empty());
    }

    #[test]
    fn test_hole_is_corruption() {
        let catalog = catalog();
        // Second migration applied without the first.
        let applied = vec![MigrationId::new("20240102000000_two")];
        let err = catalog.pending_for("acme", &applied).unwrap_err();
        assert!(matches!(err, Error::CatalogCorruption { .. }));
        assert!(err.to_string().contains("20240102000000_two"));
    }

    #[test]
    fn test_branch_ahead_of_catalog_is_corruption() {
        let catalog = catalog();
        let applied = vec![
            MigrationId::new("20240101000000_one"),
            MigrationId::new("20240102000000_two"),
            MigrationId::new("20240103000000_three"),
            MigrationId::new("20240104000000_four"),
        ];
        let err = catalog.pending_for("acme", &applied).unwrap_err();
        assert!(matches!(err, Error::CatalogCorruption { .. }));
        assert!(err.to_string().contains("ahead of this orchestrator"));
    }

    #[test]
    fn test_descriptor_lookup() {
        let catalog = catalog();
        assert!(catalog.descriptor(&MigrationId::new("20240102000000_two")).is_some());
        assert!(catalog.descriptor(&MigrationId::new("20249999000000_nope")).is_none());
    }
}
