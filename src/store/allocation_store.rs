//! Durable allocation store.
//!
//! The store is the only owner of allocation records. Every mutation is
//! applied to a copy of the current records, persisted as a whole file with
//! an atomic replace, and only then published to readers. A failed write
//! therefore leaves both the file on disk and the in-memory view untouched.

use super::types::{AllocationKey, AllocationRecord, StoreFile, STORE_VERSION};
use crate::error::StoreError;
use crate::utils::fs::atomic_write;
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

type Records = HashMap<AllocationKey, AllocationRecord>;
type LockTable = Mutex<HashMap<String, Arc<Mutex<()>>>>;

/// Crash-consistent map from allocation key to record
#[derive(Debug)]
pub struct AllocationStore {
    /// Backing file; `None` keeps the store in memory only
    path: Option<PathBuf>,
    records: RwLock<Records>,
    /// Serializes copy-persist-publish cycles
    writer: Mutex<()>,
    pool_locks: LockTable,
    /// One lock per (container, interface), dropped when unused
    owner_locks: LockTable,
}

impl AllocationStore {
    fn with_records(path: Option<PathBuf>, records: Records) -> Self {
        Self {
            path,
            records: RwLock::new(records),
            writer: Mutex::new(()),
            pool_locks: Mutex::new(HashMap::new()),
            owner_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Store that never touches the filesystem
    pub fn open_in_memory() -> Self {
        Self::with_records(None, Records::new())
    }

    /// Open the store backed by `path`.
    ///
    /// Loads the last complete file, or starts empty when none exists yet.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let records = match fs::read(path) {
            Ok(data) => Self::decode(path, &data)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("no allocation store at {}, starting empty", path.display());
                Records::new()
            }
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        info!("loaded {} allocations from {}", records.len(), path.display());
        Ok(Self::with_records(Some(path.to_path_buf()), records))
    }

    fn decode(path: &Path, data: &[u8]) -> Result<Records, StoreError> {
        let file: StoreFile = serde_json::from_slice(data).map_err(|e| StoreError::Corrupted {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        if file.version > STORE_VERSION {
            return Err(StoreError::UnsupportedVersion {
                path: path.to_path_buf(),
                found: file.version,
                supported: STORE_VERSION,
            });
        }

        let mut records = Records::new();
        for record in file.into_records() {
            let key = record.key();
            if records.contains_key(&key) {
                warn!("duplicate allocation {} in {}, keeping the first", key, path.display());
                continue;
            }
            records.insert(key, record);
        }
        Ok(records)
    }

    /// Path of the backing file, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Apply `change` to a copy of the records and, when it reports a
    /// modification, persist and publish the copy.
    fn update<T>(
        &self,
        change: impl FnOnce(&mut Records) -> Result<(T, bool), StoreError>,
    ) -> Result<T, StoreError> {
        let _writer = self.writer.lock();
        let mut next = self.records.read().clone();
        let (outcome, changed) = change(&mut next)?;
        if changed {
            self.persist(&next)?;
            *self.records.write() = next;
        }
        Ok(outcome)
    }

    fn persist(&self, records: &Records) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let data = serde_json::to_vec_pretty(&StoreFile::from_records(records.values()))?;
        atomic_write(path, &data).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        debug!("persisted {} allocations to {}", records.len(), path.display());
        Ok(())
    }

    /// Record for `key`, if one is live
    pub fn get(&self, key: &AllocationKey) -> Option<AllocationRecord> {
        self.records.read().get(key).cloned()
    }

    /// Insert a new record.
    ///
    /// Fails with [`StoreError::AlreadyExists`] if the key already has a
    /// live record; records are never overwritten.
    pub fn put(&self, record: AllocationRecord) -> Result<(), StoreError> {
        self.update(|records| {
            let key = record.key();
            if records.contains_key(&key) {
                return Err(StoreError::AlreadyExists { key: key.to_string() });
            }
            records.insert(key, record);
            Ok(((), true))
        })
    }

    /// Remove the record for `key`.
    ///
    /// Removing a missing key succeeds; the return value tells whether
    /// anything was removed.
    pub fn delete(&self, key: &AllocationKey) -> Result<bool, StoreError> {
        self.update(|records| {
            let removed = records.remove(key).is_some();
            Ok((removed, removed))
        })
    }

    /// Drop every record whose pool key is not in `valid_pools`.
    ///
    /// Returns the number of records removed.
    pub fn reconcile(&self, valid_pools: &HashSet<String>) -> Result<usize, StoreError> {
        self.update(|records| {
            let before = records.len();
            records.retain(|key, record| {
                let keep = valid_pools.contains(&key.pool);
                if !keep {
                    warn!(
                        "dropping allocation {} ({}): pool no longer assigned to this node",
                        key, record.address
                    );
                }
                keep
            });
            let removed = before - records.len();
            Ok((removed, removed > 0))
        })
    }

    /// Addresses currently allocated in the pool with key `pool`
    pub fn list_by_pool(&self, pool: &str) -> HashSet<IpAddr> {
        self.records
            .read()
            .iter()
            .filter(|(key, _)| key.pool == pool)
            .map(|(_, record)| record.address.addr())
            .collect()
    }

    /// Run `f` while holding the exclusive lock of `pool`.
    ///
    /// Allocation decisions (`list_by_pool` followed by `put`) made under this
    /// lock cannot interleave with other decisions for the same pool. Other
    /// pools are not blocked.
    pub fn with_pool_lock<T>(&self, pool: &str, f: impl FnOnce() -> T) -> T {
        let lock = {
            let mut locks = self.pool_locks.lock();
            Arc::clone(locks.entry(pool.to_string()).or_default())
        };
        let _guard = lock.lock();
        f()
    }

    /// Run `f` while holding the lock of one container interface.
    ///
    /// A multi-pool request holds this lock for its whole duration, including
    /// rollback, so no other request for the same interface can observe or
    /// reuse records that may still be rolled back. Take it before any pool
    /// lock.
    pub fn with_owner_lock<T>(&self, container_id: &str, interface_name: &str, f: impl FnOnce() -> T) -> T {
        let owner = format!("{}/{}", container_id, interface_name);
        let lock = {
            let mut locks = self.owner_locks.lock();
            Arc::clone(locks.entry(owner.clone()).or_default())
        };

        let result = {
            let _guard = lock.lock();
            f()
        };

        // Evict the entry unless another request still holds a handle. New
        // handles are only taken under the table lock held here.
        let mut locks = self.owner_locks.lock();
        if Arc::strong_count(&lock) == 2 {
            locks.remove(&owner);
        }
        result
    }

    /// All live records, ordered by key
    pub fn records(&self) -> Vec<AllocationRecord> {
        let mut records: Vec<AllocationRecord> = self.records.read().values().cloned().collect();
        records.sort_by_key(|record| record.key());
        records
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}
