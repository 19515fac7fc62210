//! Fleet definition file: which branches exist and how to reach them.
//!
//! ```json
//! {
//!   "branches": [
//!     { "code": "acme", "provider": "sqlite", "connection": "/var/lib/fleet/acme.db" },
//!     { "code": "globex", "provider": "postgres", "connection": "postgres://..." }
//!   ]
//! }
//! ```

use fleetmig_core::Provider;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize)]
pub struct FleetFile {
    pub branches: Vec<BranchEntry>,
}

#[derive(Debug, Deserialize)]
pub struct BranchEntry {
    pub code: String,
    pub provider: Provider,
    pub connection: String,
}

/// Load and parse a fleet definition file.
pub fn load(path: &Path) -> anyhow::Result<FleetFile> {
    let raw = std::fs::read_to_string(path)?;
    let fleet: FleetFile = serde_json::from_str(&raw)?;
    Ok(fleet)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fleet_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet.json");
        std::fs::write(
            &path,
            r#"{
                "branches": [
                    { "code": "acme", "provider": "sqlite", "connection": "acme.db" },
                    { "code": "globex", "provider": "postgres", "connection": "postgres://db/globex" }
                ]
            }"#,
        )
        .unwrap();

        let fleet = load(&path).unwrap();
        assert_eq!(fleet.branches.len(), 2);
        assert_eq!(fleet.branches[0].code, "acme");
        assert_eq!(fleet.branches[0].provider, Provider::Sqlite);
        assert_eq!(fleet.branches[1].provider, Provider::Postgres);
    }

    #[test]
    fn test_reject_unknown_provider() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet.json");
        std::fs::write(
            &path,
            r#"{ "branches": [ { "code": "acme", "provider": "oracle", "connection": "x" } ] }"#,
        )
        .unwrap();
        assert!(load(&path).is_err());
    }
}
