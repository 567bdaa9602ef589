//! Allocation service.
//!
//! Composes the snapshot provider, the allocators and the store into the
//! three request operations. Every request is idempotent: a repeated
//! Allocate returns the record created the first time, and Deallocate of a
//! missing allocation succeeds.

use super::types::{AllocationInfo, IpamParameters, RequestContext};
use crate::error::IpamError;
use crate::ip::{RangeAllocator, SubnetAllocator};
use crate::pool::{PoolKind, PoolSnapshotProvider};
use crate::store::{AllocationKey, AllocationRecord, AllocationStore};
use chrono::Utc;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;

/// Default time to wait for a pool snapshot
pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(5);

/// Behaviour switches of the service
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    /// How long to wait for the snapshot provider before failing the request
    pub provider_timeout: Duration,
    /// Let several keys share the single address of a degenerate CIDR prefix
    pub allow_degenerate_sharing: bool,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            provider_timeout: DEFAULT_PROVIDER_TIMEOUT,
            allow_degenerate_sharing: false,
        }
    }
}

/// Node-local IPAM façade
pub struct AllocationService {
    store: Arc<AllocationStore>,
    provider: Arc<dyn PoolSnapshotProvider>,
    options: ServiceOptions,
}

impl AllocationService {
    pub fn new(
        store: Arc<AllocationStore>,
        provider: Arc<dyn PoolSnapshotProvider>,
        options: ServiceOptions,
    ) -> Self {
        Self {
            store,
            provider,
            options,
        }
    }

    pub fn store(&self) -> &AllocationStore {
        &self.store
    }

    pub fn options(&self) -> &ServiceOptions {
        &self.options
    }

    /// Allocate an address in every requested pool.
    ///
    /// All or nothing: if any pool fails, records created earlier in this
    /// call are removed again before the error is returned. The whole call
    /// runs under the lock of the container interface, so a concurrent
    /// request for the same interface never reuses a record that is later
    /// rolled back.
    pub fn allocate(
        &self,
        params: &IpamParameters,
        ctx: &RequestContext,
    ) -> Result<Vec<AllocationInfo>, IpamError> {
        params.validate()?;

        self.store
            .with_owner_lock(&params.container_id, &params.interface_name, || {
                self.allocate_all(params, ctx)
            })
    }

    fn allocate_all(
        &self,
        params: &IpamParameters,
        ctx: &RequestContext,
    ) -> Result<Vec<AllocationInfo>, IpamError> {
        let mut created: Vec<AllocationKey> = Vec::new();
        let mut allocations = Vec::with_capacity(params.pools.len());

        for pool in &params.pools {
            let outcome = if ctx.is_cancelled() {
                Err(IpamError::Cancelled)
            } else {
                self.allocate_in_pool(params, pool)
            };

            match outcome {
                Ok((record, fresh)) => {
                    if fresh {
                        created.push(record.key());
                    }
                    allocations.push(AllocationInfo::from(&record));
                }
                Err(e) => {
                    warn!(
                        "allocation for container {} interface {} failed in pool {}: {}",
                        params.container_id, params.interface_name, pool, e
                    );
                    self.rollback(&created)?;
                    return Err(e);
                }
            }
        }

        Ok(allocations)
    }

    /// Reuse the key's record or create one. The boolean tells whether the
    /// record was created by this call.
    fn allocate_in_pool(
        &self,
        params: &IpamParameters,
        pool: &str,
    ) -> Result<(AllocationRecord, bool), IpamError> {
        let key = params.key(pool);

        self.store.with_pool_lock(&key.pool, || -> Result<_, IpamError> {
            if let Some(existing) = self.store.get(&key) {
                debug!("reusing allocation {} -> {}", key, existing.address);
                return Ok((existing, false));
            }

            let snapshot =
                self.provider
                    .current_snapshot(params.pool_type, pool, self.options.provider_timeout)?;
            let in_use = self.store.list_by_pool(&key.pool);

            let address = match &snapshot.kind {
                PoolKind::Range { .. } => RangeAllocator::allocate(&snapshot, &in_use)?,
                PoolKind::CidrSubdivision { .. } => SubnetAllocator::allocate(
                    &snapshot,
                    &in_use,
                    self.options.allow_degenerate_sharing,
                )?,
            };

            let record = AllocationRecord {
                pool_name: pool.to_string(),
                pool_type: params.pool_type,
                container_id: params.container_id.clone(),
                interface_name: params.interface_name.clone(),
                address,
                gateway: snapshot.gateway,
                metadata: params.metadata.clone(),
                created_at: Utc::now(),
            };
            self.store.put(record.clone())?;

            info!(
                "allocated {} in pool {} for container {} interface {} (pod {}/{})",
                record.address,
                key.pool,
                record.container_id,
                record.interface_name,
                record.metadata.pod_namespace,
                record.metadata.pod_name
            );
            Ok((record, true))
        })
    }

    /// Remove the records created by a failed call.
    ///
    /// Every key is attempted; the first persistence failure is returned so
    /// the caller learns that addresses are still held.
    fn rollback(&self, created: &[AllocationKey]) -> Result<(), IpamError> {
        let mut failure = None;
        for key in created.iter().rev() {
            match self.store.with_pool_lock(&key.pool, || self.store.delete(key)) {
                Ok(_) => info!("rolled back allocation {}", key),
                Err(e) => {
                    warn!("failed to roll back allocation {}: {}", key, e);
                    failure.get_or_insert(e);
                }
            }
        }
        match failure {
            Some(e) => Err(IpamError::Persistence(e)),
            None => Ok(()),
        }
    }

    /// Release the allocations of the request. Missing records are not an
    /// error.
    pub fn deallocate(&self, params: &IpamParameters) -> Result<(), IpamError> {
        params.validate()?;

        self.store
            .with_owner_lock(&params.container_id, &params.interface_name, || -> Result<(), IpamError> {
                for pool in &params.pools {
                    let key = params.key(pool);
                    let removed = self
                        .store
                        .with_pool_lock(&key.pool, || self.store.delete(&key))?;
                    if removed {
                        info!("released allocation {}", key);
                    } else {
                        debug!("no allocation to release for {}", key);
                    }
                }
                Ok(())
            })
    }

    /// Existing allocations of the request, or `NotFound` if any pool has
    /// none.
    pub fn is_allocated(&self, params: &IpamParameters) -> Result<Vec<AllocationInfo>, IpamError> {
        params.validate()?;

        params
            .pools
            .iter()
            .map(|pool| {
                self.store
                    .get(&params.key(pool))
                    .map(|record| AllocationInfo::from(&record))
                    .ok_or_else(|| IpamError::NotFound {
                        pool: pool.clone(),
                        container_id: params.container_id.clone(),
                        interface_name: params.interface_name.clone(),
                    })
            })
            .collect()
    }

    /// Drop allocations of pools that are no longer assigned to this node.
    ///
    /// Run once at startup, after the store is loaded and before requests are
    /// served.
    pub fn reconcile(&self) -> Result<usize, IpamError> {
        let valid_pools = self.provider.pool_keys()?;
        let removed = self.store.reconcile(&valid_pools)?;
        info!(
            "reconciled allocation store: {} stale allocations removed, {} kept",
            removed,
            self.store.len()
        );
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorCode, ProviderError};
    use crate::pool::{PoolSnapshot, PoolType, StaticSnapshotProvider};
    use crate::store::AllocationMetadata;
    use std::collections::HashSet;
    use std::net::IpAddr;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn provider() -> Arc<StaticSnapshotProvider> {
        let provider = StaticSnapshotProvider::new();
        provider.upsert(
            PoolSnapshot::range("pool-a", ip("192.168.0.2"), ip("192.168.0.254"), "192.168.0.0/16".parse().unwrap())
                .with_gateway(ip("192.168.0.1")),
        );
        provider.upsert(
            PoolSnapshot::range("pool-b", ip("10.100.0.2"), ip("10.100.0.3"), "10.100.0.0/16".parse().unwrap())
                .with_gateway(ip("10.100.0.1")),
        );
        provider.upsert(PoolSnapshot::cidr("pool-a", "10.200.0.0/31".parse().unwrap()));
        Arc::new(provider)
    }

    fn service_with(options: ServiceOptions) -> AllocationService {
        AllocationService::new(Arc::new(AllocationStore::open_in_memory()), provider(), options)
    }

    fn service() -> AllocationService {
        service_with(ServiceOptions::default())
    }

    #[test]
    fn test_is_allocated_before_allocate() {
        let svc = service();
        let err = svc.is_allocated(&IpamParameters::new(&["pool-a"], "c1", "eth0")).unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
    }

    #[test]
    fn test_sequential_keys_get_next_address() {
        let svc = service();
        let ctx = RequestContext::new();

        let first = svc.allocate(&IpamParameters::new(&["pool-a"], "c1", "eth0"), &ctx).unwrap();
        let second = svc.allocate(&IpamParameters::new(&["pool-a"], "c2", "eth0"), &ctx).unwrap();

        assert_eq!(first[0].address.addr(), ip("192.168.0.2"));
        assert_eq!(second[0].address.addr(), ip("192.168.0.3"));
        assert_eq!(first[0].gateway, Some(ip("192.168.0.1")));
    }

    #[test]
    fn test_allocate_is_idempotent() {
        let svc = service();
        let ctx = RequestContext::new();
        let params = IpamParameters::new(&["pool-a", "pool-b"], "c1", "net0");

        let first = svc.allocate(&params, &ctx).unwrap();
        let retry = svc.allocate(&params, &ctx).unwrap();
        assert_eq!(first, retry);
        assert_eq!(svc.store().len(), 2);
        assert_eq!(svc.is_allocated(&params).unwrap(), first);
    }

    #[test]
    fn test_deallocate_twice() {
        let svc = service();
        let params = IpamParameters::new(&["pool-a"], "c1", "eth0");
        svc.allocate(&params, &RequestContext::new()).unwrap();

        svc.deallocate(&params).unwrap();
        svc.deallocate(&params).unwrap();
        assert!(matches!(svc.is_allocated(&params), Err(IpamError::NotFound { .. })));
    }

    #[test]
    fn test_unknown_pool_rolls_back_partial_allocation() {
        let svc = service();
        let params = IpamParameters::new(&["pool-a", "missing"], "c1", "eth0");

        let err = svc.allocate(&params, &RequestContext::new()).unwrap_err();
        assert!(matches!(err, IpamError::UnknownPool { .. }));
        assert_eq!(err.code(), ErrorCode::InvalidArgument);

        let first_only = IpamParameters::new(&["pool-a"], "c1", "eth0");
        assert!(matches!(svc.is_allocated(&first_only), Err(IpamError::NotFound { .. })));
        assert!(svc.store().is_empty());
    }

    #[test]
    fn test_exhaustion_keeps_earlier_idempotent_record() {
        let svc = service();
        let ctx = RequestContext::new();
        svc.allocate(&IpamParameters::new(&["pool-a"], "c1", "eth0"), &ctx).unwrap();
        svc.allocate(&IpamParameters::new(&["pool-b"], "x1", "eth0"), &ctx).unwrap();
        svc.allocate(&IpamParameters::new(&["pool-b"], "x2", "eth0"), &ctx).unwrap();

        // pool-a already holds a record for c1, pool-b is full.
        let err = svc
            .allocate(&IpamParameters::new(&["pool-a", "pool-b"], "c1", "eth0"), &ctx)
            .unwrap_err();
        assert!(matches!(err, IpamError::PoolExhausted { .. }));
        assert!(svc.is_allocated(&IpamParameters::new(&["pool-a"], "c1", "eth0")).is_ok());
    }

    #[test]
    fn test_cancelled_request_leaves_nothing_behind() {
        let svc = service();
        let ctx = RequestContext::new();
        ctx.cancel();

        let params = IpamParameters::new(&["pool-a", "pool-b"], "c1", "eth0");
        assert!(matches!(svc.allocate(&params, &ctx), Err(IpamError::Cancelled)));
        assert!(svc.store().is_empty());
    }

    #[test]
    fn test_metadata_is_returned_unchanged() {
        let svc = service();
        let metadata = AllocationMetadata {
            pod_name: "web-0".to_string(),
            pod_namespace: "default".to_string(),
            pod_uid: "8d1c".to_string(),
            device_id: "0000:d8:00.1".to_string(),
        };
        let params = IpamParameters::new(&["pool-a"], "c1", "eth0").with_metadata(metadata.clone());
        svc.allocate(&params, &RequestContext::new()).unwrap();

        let record = svc.store().get(&params.key("pool-a")).unwrap();
        assert_eq!(record.metadata, metadata);
    }

    #[test]
    fn test_degenerate_cidr_pool_policy() {
        let ctx = RequestContext::new();
        let first = IpamParameters::new(&["pool-a"], "c1", "eth0").with_pool_type(PoolType::CidrPool);
        let second = IpamParameters::new(&["pool-a"], "c2", "eth0").with_pool_type(PoolType::CidrPool);

        let strict = service();
        let address = strict.allocate(&first, &ctx).unwrap()[0].address;
        assert_eq!(address.to_string(), "10.200.0.0/31");
        assert!(matches!(strict.allocate(&second, &ctx), Err(IpamError::PoolExhausted { .. })));

        let sharing = service_with(ServiceOptions {
            allow_degenerate_sharing: true,
            ..ServiceOptions::default()
        });
        let a = sharing.allocate(&first, &ctx).unwrap();
        let b = sharing.allocate(&second, &ctx).unwrap();
        assert_eq!(a[0].address, b[0].address);
    }

    #[test]
    fn test_pool_types_do_not_collide() {
        let svc = service();
        let ctx = RequestContext::new();
        let range = IpamParameters::new(&["pool-a"], "c1", "eth0");
        let cidr = range.clone().with_pool_type(PoolType::CidrPool);

        svc.allocate(&range, &ctx).unwrap();
        svc.allocate(&cidr, &ctx).unwrap();
        assert_eq!(svc.store().len(), 2);

        svc.deallocate(&cidr).unwrap();
        assert!(svc.is_allocated(&range).is_ok());
        assert!(svc.is_allocated(&cidr).is_err());
    }

    #[test]
    fn test_reconcile_uses_provider_pools() {
        let provider = provider();
        let svc = AllocationService::new(
            Arc::new(AllocationStore::open_in_memory()),
            provider.clone(),
            ServiceOptions::default(),
        );
        let ctx = RequestContext::new();
        svc.allocate(&IpamParameters::new(&["pool-a", "pool-b"], "c1", "eth0"), &ctx).unwrap();

        provider.remove(PoolType::IpPool, "pool-b");
        assert_eq!(svc.reconcile().unwrap(), 1);
        assert!(svc.is_allocated(&IpamParameters::new(&["pool-a"], "c1", "eth0")).is_ok());
    }

    struct SlowProvider;

    impl PoolSnapshotProvider for SlowProvider {
        fn current_snapshot(&self, _: PoolType, _: &str, timeout: Duration) -> Result<PoolSnapshot, ProviderError> {
            Err(ProviderError::Timeout { timeout_ms: timeout.as_millis() })
        }

        fn pool_keys(&self) -> Result<HashSet<String>, ProviderError> {
            Ok(HashSet::new())
        }
    }

    #[test]
    fn test_provider_timeout_is_retryable() {
        let svc = AllocationService::new(
            Arc::new(AllocationStore::open_in_memory()),
            Arc::new(SlowProvider),
            ServiceOptions::default(),
        );
        let err = svc
            .allocate(&IpamParameters::new(&["pool-a"], "c1", "eth0"), &RequestContext::new())
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Unavailable);
        assert!(err.is_retryable());
    }
}
