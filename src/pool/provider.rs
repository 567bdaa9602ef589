//! Pool snapshot providers.
//!
//! The engine never watches cluster resources itself. Whatever keeps the
//! node's view of the pools current (a resource watcher, a file loader, a
//! test) pushes snapshots into a provider, and the engine reads the latest one
//! through [`PoolSnapshotProvider`] at allocation time.

use super::definitions::PoolDefinitions;
use super::types::{pool_key, PoolSnapshot, PoolType};
use crate::error::ProviderError;
use log::{debug, info};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// Read interface over the node's current pool assignments
pub trait PoolSnapshotProvider: Send + Sync {
    /// Latest snapshot of `name` in the `pool_type` namespace.
    ///
    /// Implementations must give up after `timeout` and report
    /// [`ProviderError::Timeout`].
    fn current_snapshot(
        &self,
        pool_type: PoolType,
        name: &str,
        timeout: Duration,
    ) -> Result<PoolSnapshot, ProviderError>;

    /// Keys of every pool currently assigned to this node
    fn pool_keys(&self) -> Result<HashSet<String>, ProviderError>;
}

/// In-memory provider fed by an external source
#[derive(Debug, Default)]
pub struct StaticSnapshotProvider {
    pools: RwLock<HashMap<String, PoolSnapshot>>,
}

impl StaticSnapshotProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider holding every pool assigned to `node_name`
    pub fn from_definitions(definitions: &PoolDefinitions, node_name: &str) -> Self {
        let provider = Self::new();
        provider.replace_all(definitions.snapshots_for_node(node_name).into_iter().map(|(_, s)| s));
        provider
    }

    /// Insert or replace the snapshot of one pool
    pub fn upsert(&self, snapshot: PoolSnapshot) {
        debug!("updating snapshot of pool {}", snapshot.key());
        self.pools.write().insert(snapshot.key(), snapshot);
    }

    /// Drop a pool that is no longer assigned to this node
    pub fn remove(&self, pool_type: PoolType, name: &str) -> Option<PoolSnapshot> {
        self.pools.write().remove(&pool_key(pool_type, name))
    }

    /// Replace the whole pool universe in one step
    pub fn replace_all(&self, snapshots: impl IntoIterator<Item = PoolSnapshot>) {
        let pools: HashMap<String, PoolSnapshot> =
            snapshots.into_iter().map(|s| (s.key(), s)).collect();
        info!("pool snapshot provider now holds {} pools", pools.len());
        *self.pools.write() = pools;
    }

    /// Every snapshot currently held, ordered by pool key
    pub fn snapshots(&self) -> Vec<PoolSnapshot> {
        let mut snapshots: Vec<PoolSnapshot> = self.pools.read().values().cloned().collect();
        snapshots.sort_by_key(|s| s.key());
        snapshots
    }
}

impl PoolSnapshotProvider for StaticSnapshotProvider {
    fn current_snapshot(
        &self,
        pool_type: PoolType,
        name: &str,
        timeout: Duration,
    ) -> Result<PoolSnapshot, ProviderError> {
        let pools = self.pools.try_read_for(timeout).ok_or(ProviderError::Timeout {
            timeout_ms: timeout.as_millis(),
        })?;
        pools
            .get(&pool_key(pool_type, name))
            .cloned()
            .ok_or_else(|| ProviderError::UnknownPool {
                pool: name.to_string(),
            })
    }

    fn pool_keys(&self) -> Result<HashSet<String>, ProviderError> {
        Ok(self.pools.read().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;

    fn range_pool(name: &str) -> PoolSnapshot {
        let start: IpAddr = "192.168.0.2".parse().unwrap();
        let end: IpAddr = "192.168.0.254".parse().unwrap();
        PoolSnapshot::range(name, start, end, "192.168.0.0/16".parse().unwrap())
    }

    #[test]
    fn test_lookup_by_type_and_name() {
        let provider = StaticSnapshotProvider::new();
        provider.upsert(range_pool("pool-a"));
        provider.upsert(PoolSnapshot::cidr("pool-a", "10.0.0.0/24".parse().unwrap()));

        let timeout = Duration::from_millis(50);
        let range = provider.current_snapshot(PoolType::IpPool, "pool-a", timeout).unwrap();
        assert_eq!(range.pool_type(), PoolType::IpPool);
        let cidr = provider.current_snapshot(PoolType::CidrPool, "pool-a", timeout).unwrap();
        assert_eq!(cidr.pool_type(), PoolType::CidrPool);

        let keys = provider.pool_keys().unwrap();
        assert!(keys.contains("pool-a"));
        assert!(keys.contains("cidrpool/pool-a"));
    }

    #[test]
    fn test_unknown_pool() {
        let provider = StaticSnapshotProvider::new();
        let err = provider
            .current_snapshot(PoolType::IpPool, "missing", Duration::from_millis(10))
            .unwrap_err();
        assert_eq!(err, ProviderError::UnknownPool { pool: "missing".to_string() });
    }

    #[test]
    fn test_timeout_while_updating() {
        let provider = StaticSnapshotProvider::new();
        provider.upsert(range_pool("pool-a"));

        let _writer = provider.pools.write();
        let err = provider
            .current_snapshot(PoolType::IpPool, "pool-a", Duration::from_millis(10))
            .unwrap_err();
        assert!(matches!(err, ProviderError::Timeout { .. }));
    }

    #[test]
    fn test_replace_and_remove() {
        let provider = StaticSnapshotProvider::new();
        provider.replace_all(vec![range_pool("pool-a"), range_pool("pool-b")]);
        assert_eq!(provider.snapshots().len(), 2);

        assert!(provider.remove(PoolType::IpPool, "pool-a").is_some());
        assert!(provider.remove(PoolType::IpPool, "pool-a").is_none());
        assert_eq!(provider.pool_keys().unwrap().len(), 1);
    }
}
