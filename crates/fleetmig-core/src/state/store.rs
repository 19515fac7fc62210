//! Durable branch state store over sled.
//!
//! Three trees: status records, append-only applied history, and lock
//! leases. The lock tree is the fleet's only concurrency control point:
//! acquisition is compare-and-set (fails closed, never blocks) and every
//! state mutation revalidates the caller's lease, so a worker whose lease
//! expired mid-migration cannot corrupt a record another worker now owns.

use super::{current_timestamp, AppliedMigration, BranchMigrationState, BranchStatus, LockToken};
use crate::catalog::MigrationId;
use crate::error::{Error, Result};
use rkyv::{Archive, Deserialize, Serialize};
use sled::Tree;
use std::time::Duration;

/// Persisted per-branch status record.
#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
struct BranchStateRecord {
    status: BranchStatus,
    last_error: Option<String>,
    retry_count: u32,
    next_retry_at: Option<u64>,
}

impl BranchStateRecord {
    fn to_bytes(&self) -> Result<Vec<u8>> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|v| v.to_vec())
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(bytes)
            .map_err(|e| Error::Deserialization(e.to_string()))
    }
}

/// Persisted history entry.
#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
struct HistoryRecord {
    id: MigrationId,
    applied_at: u64,
}

impl HistoryRecord {
    fn to_bytes(&self) -> Result<Vec<u8>> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|v| v.to_vec())
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(bytes)
            .map_err(|e| Error::Deserialization(e.to_string()))
    }
}

/// Persisted lock lease.
#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
struct LockRecord {
    token: String,
    expires_at: u64,
}

impl LockRecord {
    fn to_bytes(&self) -> Result<Vec<u8>> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|v| v.to_vec())
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(bytes)
            .map_err(|e| Error::Deserialization(e.to_string()))
    }

    fn is_live(&self, now: u64) -> bool {
        self.expires_at > now
    }
}

/// Durable read/write access to branch migration state.
pub struct BranchStateStore {
    state_tree: Tree,
    history_tree: Tree,
    lock_tree: Tree,
}

impl BranchStateStore {
    /// Tree name for status records.
    pub const STATE_TREE: &'static str = "branch:state";
    /// Tree name for applied-migration history.
    pub const HISTORY_TREE: &'static str = "branch:history";
    /// Tree name for lock leases.
    pub const LOCK_TREE: &'static str = "branch:lock";

    /// Open or create the store on a sled database.
    pub fn open(db: &sled::Db) -> Result<Self> {
        Ok(Self {
            state_tree: db.open_tree(Self::STATE_TREE)?,
            history_tree: db.open_tree(Self::HISTORY_TREE)?,
            lock_tree: db.open_tree(Self::LOCK_TREE)?,
        })
    }

    /// Initialize a branch record as `NotProvisioned` if absent.
    /// Branch records are never deleted while the branch exists.
    pub fn create(&self, code: &str) -> Result<BranchMigrationState> {
        let record = BranchStateRecord {
            status: BranchStatus::NotProvisioned,
            last_error: None,
            retry_count: 0,
            next_retry_at: None,
        };
        // Lost race means another worker initialized it; both are fresh.
        let _ = self.state_tree.compare_and_swap(
            code.as_bytes(),
            None as Option<&[u8]>,
            Some(record.to_bytes()?),
        )?;
        self.load(code)
    }

    /// Whether a state record exists for this code.
    pub fn contains(&self, code: &str) -> Result<bool> {
        Ok(self.state_tree.contains_key(code.as_bytes())?)
    }

    /// Assemble a branch's full state from the durable trees.
    pub fn load(&self, code: &str) -> Result<BranchMigrationState> {
        let bytes = self
            .state_tree
            .get(code.as_bytes())?
            .ok_or_else(|| Error::UnknownBranch(code.to_string()))?;
        let record = BranchStateRecord::from_bytes(&bytes)?;
        let lock_token = match self.lock_tree.get(lock_key(code))? {
            Some(lock_bytes) => {
                let held = LockRecord::from_bytes(&lock_bytes)?;
                held.is_live(current_timestamp()).then_some(held.token)
            }
            None => None,
        };
        Ok(BranchMigrationState {
            code: code.to_string(),
            status: record.status,
            applied: self.applied(code)?,
            last_error: record.last_error,
            retry_count: record.retry_count,
            next_retry_at: record.next_retry_at,
            lock_token,
        })
    }

    /// The branch's applied history, oldest first.
    pub fn applied(&self, code: &str) -> Result<Vec<AppliedMigration>> {
        let mut entries = Vec::new();
        for item in self.history_tree.scan_prefix(history_prefix(code)) {
            let (_, value) = item?;
            let record = HistoryRecord::from_bytes(&value)?;
            entries.push(AppliedMigration {
                id: record.id,
                applied_at: record.applied_at,
            });
        }
        Ok(entries)
    }

    /// Ids of the branch's applied migrations, oldest first.
    pub fn applied_ids(&self, code: &str) -> Result<Vec<MigrationId>> {
        Ok(self.applied(code)?.into_iter().map(|a| a.id).collect())
    }

    /// Try to acquire (or refresh) the branch's lock lease.
    ///
    /// Returns false without blocking when another actor holds a live
    /// lease. An expired lease is reclaimable; reclaiming says nothing
    /// about how far the previous holder got; the executor's guards are
    /// the real safety net there.
    pub fn try_acquire(&self, code: &str, token: &LockToken, lease: Duration) -> Result<bool> {
        let key = lock_key(code);
        loop {
            let now = current_timestamp();
            let current = self.lock_tree.get(&key)?;
            if let Some(bytes) = &current {
                let held = LockRecord::from_bytes(bytes)?;
                if held.is_live(now) && held.token != token.as_str() {
                    return Ok(false);
                }
            }
            let fresh = LockRecord {
                token: token.as_str().to_string(),
                expires_at: now + lease.as_micros() as u64,
            }
            .to_bytes()?;
            match self
                .lock_tree
                .compare_and_swap(&key, current, Some(fresh))?
            {
                Ok(()) => return Ok(true),
                Err(_) => continue,
            }
        }
    }

    /// Release the lease if this token still holds it. Releasing a lease
    /// that was already reclaimed is a no-op.
    pub fn release(&self, code: &str, token: &LockToken) -> Result<()> {
        let key = lock_key(code);
        if let Some(bytes) = self.lock_tree.get(&key)? {
            let held = LockRecord::from_bytes(&bytes)?;
            if held.token == token.as_str() {
                let _ = self
                    .lock_tree
                    .compare_and_swap(&key, Some(&bytes), None as Option<Vec<u8>>)?;
            } else {
                tracing::warn!(branch = code, "release skipped: lease reclaimed");
            }
        }
        Ok(())
    }

    /// Fail with `LockLost` unless `token` holds a live lease on the branch.
    pub fn verify_lease(&self, code: &str, token: &LockToken) -> Result<()> {
        let bytes = self
            .lock_tree
            .get(lock_key(code))?
            .ok_or_else(|| Error::LockLost {
                branch: code.to_string(),
            })?;
        let held = LockRecord::from_bytes(&bytes)?;
        if held.token == token.as_str() && held.is_live(current_timestamp()) {
            Ok(())
        } else {
            Err(Error::LockLost {
                branch: code.to_string(),
            })
        }
    }

    /// Update the branch status (and last error) under the caller's lease.
    pub fn set_status(
        &self,
        code: &str,
        token: &LockToken,
        status: BranchStatus,
        error: Option<String>,
    ) -> Result<()> {
        self.update_record(code, token, |record| {
            record.status = status;
            record.last_error = error;
        })
    }

    /// Update retry bookkeeping under the caller's lease.
    pub fn set_retry_state(
        &self,
        code: &str,
        token: &LockToken,
        retry_count: u32,
        next_retry_at: Option<u64>,
    ) -> Result<()> {
        self.update_record(code, token, |record| {
            record.retry_count = retry_count;
            record.next_retry_at = next_retry_at;
        })
    }

    /// Append a migration to the branch's history. Must be called inside
    /// the holder's lease, after the migration's statements succeeded.
    pub fn record_applied(
        &self,
        code: &str,
        token: &LockToken,
        id: &MigrationId,
    ) -> Result<AppliedMigration> {
        self.verify_lease(code, token)?;
        if !self.contains(code)? {
            return Err(Error::UnknownBranch(code.to_string()));
        }
        let seq = self.next_seq(code)?;
        let record = HistoryRecord {
            id: id.clone(),
            applied_at: current_timestamp(),
        };
        self.history_tree
            .insert(history_key(code, seq), record.to_bytes()?)?;
        self.history_tree.flush()?;
        Ok(AppliedMigration {
            id: record.id,
            applied_at: record.applied_at,
        })
    }

    /// Remove the tail entry of the branch's history. The target must be
    /// the most recently applied migration; anything else is rejected with
    /// no state change.
    pub fn record_rolled_back(
        &self,
        code: &str,
        token: &LockToken,
        id: &MigrationId,
    ) -> Result<()> {
        self.verify_lease(code, token)?;
        let tail = self
            .history_tree
            .scan_prefix(history_prefix(code))
            .last()
            .transpose()?;
        let (key, value) = tail.ok_or_else(|| Error::InvalidRollbackTarget {
            branch: code.to_string(),
            detail: "no applied migrations".to_string(),
        })?;
        let record = HistoryRecord::from_bytes(&value)?;
        if record.id != *id {
            return Err(Error::InvalidRollbackTarget {
                branch: code.to_string(),
                detail: format!("{id} is not the most recently applied migration ({})", record.id),
            });
        }
        self.history_tree.remove(key)?;
        self.history_tree.flush()?;
        Ok(())
    }

    /// Flush all trees to disk.
    pub fn flush(&self) -> Result<()> {
        self.state_tree.flush()?;
        self.history_tree.flush()?;
        self.lock_tree.flush()?;
        Ok(())
    }

    fn update_record(
        &self,
        code: &str,
        token: &LockToken,
        mutate: impl FnOnce(&mut BranchStateRecord),
    ) -> Result<()> {
        self.verify_lease(code, token)?;
        let bytes = self
            .state_tree
            .get(code.as_bytes())?
            .ok_or_else(|| Error::UnknownBranch(code.to_string()))?;
        let mut record = BranchStateRecord::from_bytes(&bytes)?;
        mutate(&mut record);
        self.state_tree.insert(code.as_bytes(), record.to_bytes()?)?;
        Ok(())
    }

    fn next_seq(&self, code: &str) -> Result<u32> {
        let tail = self
            .history_tree
            .scan_prefix(history_prefix(code))
            .last()
            .transpose()?;
        Ok(match tail {
            Some((key, _)) => {
                let mut buf = [0u8; 4];
                buf.copy_from_slice(&key[key.len() - 4..]);
                u32::from_be_bytes(buf) + 1
            }
            None => 0,
        })
    }
}

/// History keys are `code \0 seq_be32`; branch codes cannot contain NUL.
fn history_prefix(code: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(code.len() + 1);
    prefix.extend_from_slice(code.as_bytes());
    prefix.push(0);
    prefix
}

fn history_key(code: &str, seq: u32) -> Vec<u8> {
    let mut key = history_prefix(code);
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

fn lock_key(code: &str) -> Vec<u8> {
    code.as_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_store() -> (BranchStateStore, sled::Db, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        let store = BranchStateStore::open(&db).unwrap();
        (store, db, dir)
    }

    fn locked(store: &BranchStateStore, code: &str) -> LockToken {
        let token = LockToken::generate();
        assert!(store
            .try_acquire(code, &token, Duration::from_secs(30))
            .unwrap());
        token
    }

    #[test]
    fn test_create_and_load() {
        let (store, _db, _dir) = open_store();
        let state = store.create("acme").unwrap();
        assert_eq!(state.status, BranchStatus::NotProvisioned);
        assert!(state.applied.is_empty());
        assert_eq!(state.retry_count, 0);

        // Creation is idempotent.
        let again = store.create("acme").unwrap();
        assert_eq!(again.status, BranchStatus::NotProvisioned);
    }

    #[test]
    fn test_load_unknown_branch() {
        let (store, _db, _dir) = open_store();
        assert!(matches!(
            store.load("ghost"),
            Err(Error::UnknownBranch(_))
        ));
    }

    #[test]
    fn test_lock_fails_closed_for_other_holder() {
        let (store, _db, _dir) = open_store();
        store.create("acme").unwrap();

        let holder = locked(&store, "acme");
        let contender = LockToken::generate();
        assert!(!store
            .try_acquire("acme", &contender, Duration::from_secs(30))
            .unwrap());

        // The holder can refresh its own lease.
        assert!(store
            .try_acquire("acme", &holder, Duration::from_secs(30))
            .unwrap());

        store.release("acme", &holder).unwrap();
        assert!(store
            .try_acquire("acme", &contender, Duration::from_secs(30))
            .unwrap());
    }

    #[test]
    fn test_expired_lease_is_reclaimable() {
        let (store, _db, _dir) = open_store();
        store.create("acme").unwrap();

        let crashed = LockToken::generate();
        assert!(store
            .try_acquire("acme", &crashed, Duration::from_micros(1))
            .unwrap());
        std::thread::sleep(Duration::from_millis(5));

        let reclaimer = LockToken::generate();
        assert!(store
            .try_acquire("acme", &reclaimer, Duration::from_secs(30))
            .unwrap());

        // The crashed worker's lease no longer authorizes mutations.
        assert!(matches!(
            store.set_status("acme", &crashed, BranchStatus::Failed, None),
            Err(Error::LockLost { .. })
        ));
    }

    #[test]
    fn test_mutation_requires_lease() {
        let (store, _db, _dir) = open_store();
        store.create("acme").unwrap();
        let stranger = LockToken::generate();
        assert!(matches!(
            store.record_applied("acme", &stranger, &MigrationId::new("20240101000000_one")),
            Err(Error::LockLost { .. })
        ));
    }

    #[test]
    fn test_history_append_and_order() {
        let (store, _db, _dir) = open_store();
        store.create("acme").unwrap();
        let token = locked(&store, "acme");

        store
            .record_applied("acme", &token, &MigrationId::new("20240101000000_one"))
            .unwrap();
        store
            .record_applied("acme", &token, &MigrationId::new("20240102000000_two"))
            .unwrap();

        let ids = store.applied_ids("acme").unwrap();
        assert_eq!(
            ids,
            vec![
                MigrationId::new("20240101000000_one"),
                MigrationId::new("20240102000000_two")
            ]
        );
    }

    #[test]
    fn test_rollback_must_target_tail() {
        let (store, _db, _dir) = open_store();
        store.create("acme").unwrap();
        let token = locked(&store, "acme");

        store
            .record_applied("acme", &token, &MigrationId::new("20240101000000_one"))
            .unwrap();
        store
            .record_applied("acme", &token, &MigrationId::new("20240102000000_two"))
            .unwrap();

        let err = store
            .record_rolled_back("acme", &token, &MigrationId::new("20240101000000_one"))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRollbackTarget { .. }));

        store
            .record_rolled_back("acme", &token, &MigrationId::new("20240102000000_two"))
            .unwrap();
        assert_eq!(
            store.applied_ids("acme").unwrap(),
            vec![MigrationId::new("20240101000000_one")]
        );
    }

    #[test]
    fn test_rollback_on_empty_history() {
        let (store, _db, _dir) = open_store();
        store.create("acme").unwrap();
        let token = locked(&store, "acme");
        let err = store
            .record_rolled_back("acme", &token, &MigrationId::new("20240101000000_one"))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRollbackTarget { .. }));
    }

    #[test]
    fn test_load_exposes_live_lock_holder() {
        let (store, _db, _dir) = open_store();
        store.create("acme").unwrap();
        assert!(store.load("acme").unwrap().lock_token.is_none());

        let token = locked(&store, "acme");
        assert_eq!(
            store.load("acme").unwrap().lock_token.as_deref(),
            Some(token.as_str())
        );

        store.release("acme", &token).unwrap();
        assert!(store.load("acme").unwrap().lock_token.is_none());
    }

    #[test]
    fn test_history_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = sled::open(dir.path()).unwrap();
            let store = BranchStateStore::open(&db).unwrap();
            store.create("acme").unwrap();
            let token = locked(&store, "acme");
            store
                .record_applied("acme", &token, &MigrationId::new("20240101000000_one"))
                .unwrap();
            store
                .set_status("acme", &token, BranchStatus::Completed, None)
                .unwrap();
            store.flush().unwrap();
        }
        let db = sled::open(dir.path()).unwrap();
        let store = BranchStateStore::open(&db).unwrap();
        let state = store.load("acme").unwrap();
        assert_eq!(state.status, BranchStatus::Completed);
        assert_eq!(
            state.applied_ids(),
            vec![MigrationId::new("20240101000000_one")]
        );
    }

    #[test]
    fn test_branches_do_not_share_history() {
        let (store, _db, _dir) = open_store();
        store.create("acme").unwrap();
        store.create("acme2").unwrap();
        let token = locked(&store, "acme");
        store
            .record_applied("acme", &token, &MigrationId::new("20240101000000_one"))
            .unwrap();
        assert!(store.applied("acme2").unwrap().is_empty());
    }
}
