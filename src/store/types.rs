//! Allocation record type definitions.

use crate::pool::{pool_key, PoolType};
use chrono::{DateTime, Utc};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

/// Identity of one allocation: (pool key, container, interface)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AllocationKey {
    pub pool: String,
    pub container_id: String,
    pub interface_name: String,
}

impl AllocationKey {
    pub fn new(pool_type: PoolType, pool_name: &str, container_id: &str, interface_name: &str) -> Self {
        Self {
            pool: pool_key(pool_type, pool_name),
            container_id: container_id.to_string(),
            interface_name: interface_name.to_string(),
        }
    }
}

impl fmt::Display for AllocationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.pool, self.container_id, self.interface_name)
    }
}

/// Opaque caller identifiers carried with a record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocationMetadata {
    pub pod_name: String,
    pub pod_namespace: String,
    pub pod_uid: String,
    pub device_id: String,
}

/// One live allocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationRecord {
    pub pool_name: String,
    #[serde(default)]
    pub pool_type: PoolType,
    pub container_id: String,
    pub interface_name: String,
    pub address: IpNet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<IpAddr>,
    #[serde(default)]
    pub metadata: AllocationMetadata,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl AllocationRecord {
    pub fn key(&self) -> AllocationKey {
        AllocationKey::new(self.pool_type, &self.pool_name, &self.container_id, &self.interface_name)
    }
}

/// Current on-disk format version
pub const STORE_VERSION: u32 = 1;

/// Records of one pool as persisted, keyed by `<container>_<interface>`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolReservations {
    #[serde(default)]
    pub entries: BTreeMap<String, AllocationRecord>,
}

/// Entry name of a record inside its pool
fn entry_name(record: &AllocationRecord) -> String {
    format!("{}_{}", record.container_id, record.interface_name)
}

/// Whole-file representation of the store.
///
/// Unknown fields are ignored on load so that newer writers can add metadata
/// without breaking older readers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreFile {
    pub version: u32,
    #[serde(default)]
    pub pools: BTreeMap<String, PoolReservations>,
}

impl Default for StoreFile {
    fn default() -> Self {
        Self {
            version: STORE_VERSION,
            pools: BTreeMap::new(),
        }
    }
}

impl StoreFile {
    /// Build the persisted form, grouping records by pool key. Maps keep
    /// the file stable across writes.
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a AllocationRecord>) -> Self {
        let mut file = Self::default();
        for record in records {
            file.pools
                .entry(record.key().pool)
                .or_default()
                .entries
                .insert(entry_name(record), record.clone());
        }
        file
    }

    /// Every record of the file, in pool key order
    pub fn into_records(self) -> impl Iterator<Item = AllocationRecord> {
        self.pools.into_values().flat_map(|pool| pool.entries.into_values())
    }
}
