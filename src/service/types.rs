//! Request and response types of the allocation service.

use crate::error::IpamError;
use crate::pool::PoolType;
use crate::store::{AllocationKey, AllocationMetadata, AllocationRecord};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Parameters shared by Allocate, Deallocate and IsAllocated
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpamParameters {
    pub pools: Vec<String>,
    #[serde(default)]
    pub pool_type: PoolType,
    pub container_id: String,
    pub interface_name: String,
    #[serde(default)]
    pub metadata: AllocationMetadata,
}

impl IpamParameters {
    pub fn new(pools: &[&str], container_id: &str, interface_name: &str) -> Self {
        Self {
            pools: pools.iter().map(|p| p.to_string()).collect(),
            pool_type: PoolType::IpPool,
            container_id: container_id.to_string(),
            interface_name: interface_name.to_string(),
            metadata: AllocationMetadata::default(),
        }
    }

    pub fn with_pool_type(mut self, pool_type: PoolType) -> Self {
        self.pool_type = pool_type;
        self
    }

    pub fn with_metadata(mut self, metadata: AllocationMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Store key of this request in `pool`
    pub fn key(&self, pool: &str) -> AllocationKey {
        AllocationKey::new(self.pool_type, pool, &self.container_id, &self.interface_name)
    }

    /// Reject requests that cannot identify an allocation
    pub fn validate(&self) -> Result<(), IpamError> {
        if self.pools.is_empty() {
            return Err(IpamError::InvalidArgument("at least one pool is required".to_string()));
        }
        if self.container_id.is_empty() {
            return Err(IpamError::InvalidArgument("container_id cannot be empty".to_string()));
        }
        if self.interface_name.is_empty() {
            return Err(IpamError::InvalidArgument("interface_name cannot be empty".to_string()));
        }

        let mut seen = HashSet::new();
        for pool in &self.pools {
            if pool.is_empty() {
                return Err(IpamError::InvalidArgument("pool name cannot be empty".to_string()));
            }
            if !seen.insert(pool.as_str()) {
                return Err(IpamError::InvalidArgument(format!("pool {} requested twice", pool)));
            }
        }
        Ok(())
    }
}

/// One allocation as returned to the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationInfo {
    pub pool: String,
    pub address: IpNet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<IpAddr>,
}

impl From<&AllocationRecord> for AllocationInfo {
    fn from(record: &AllocationRecord) -> Self {
        Self {
            pool: record.pool_name.clone(),
            address: record.address,
            gateway: record.gateway,
        }
    }
}

/// Per-request cancellation state.
///
/// Clones share the cancel flag, so a transport layer can keep one clone and
/// cancel the request while the service works on another.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context that expires `timeout` from now
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            cancelled: Arc::default(),
            deadline: Instant::now().checked_add(timeout),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// True once cancelled or past the deadline
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
            || self.deadline.map_or(false, |deadline| Instant::now() >= deadline)
    }
}
