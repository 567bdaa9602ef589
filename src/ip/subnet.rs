//! CIDR subdivision allocation.
//!
//! Every node owns one prefix carved out of the pool CIDR, so there is no
//! contention with other nodes. Within the prefix, addresses are taken by
//! index, lowest first, skipping the network address, the IPv4 broadcast
//! address, the gateway and exclusions.
//!
//! Prefixes with at most two addresses (IPv4 `/31` and `/32`, IPv6 `/127` and
//! `/128`) are degenerate: they resolve to a single fixed address. Whether two
//! keys may share that address is decided by the caller.

use super::{count_eligible, walk_eligible};
use crate::error::AllocError;
use crate::pool::{PoolKind, PoolSnapshot};
use crate::utils::ip_utils::{host_net, prefix_bounds};
use ipnet::IpNet;
use log::debug;
use std::collections::HashSet;
use std::net::IpAddr;

/// The node's prefix as resolved from a snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubnetLease {
    pub prefix: IpNet,
    pub gateway: Option<IpAddr>,
    pub degenerate: bool,
}

impl SubnetLease {
    /// Numeric bounds of the addresses hosts may receive
    fn host_bounds(&self) -> (u128, u128) {
        let (network, last) = prefix_bounds(&self.prefix);
        if self.degenerate {
            (network, last)
        } else if self.prefix.addr().is_ipv4() {
            (network + 1, last - 1)
        } else {
            (network + 1, last)
        }
    }

    fn is_ipv4(&self) -> bool {
        self.prefix.addr().is_ipv4()
    }
}

/// Index-based allocator over a node's CIDR prefix
#[derive(Debug, Clone, Copy, Default)]
pub struct SubnetAllocator;

impl SubnetAllocator {
    /// Returns true if the prefix leaves no room for distinct host addresses
    pub fn is_degenerate(prefix: &IpNet) -> bool {
        prefix.max_prefix_len() - prefix.prefix_len() <= 1
    }

    /// Derive the node prefix and gateway from a CIDR snapshot
    pub fn resolve(snapshot: &PoolSnapshot) -> Result<SubnetLease, AllocError> {
        snapshot.validate()?;
        let prefix = match &snapshot.kind {
            PoolKind::CidrSubdivision { prefix } => *prefix,
            PoolKind::Range { .. } => {
                return Err(AllocError::InvalidSnapshot {
                    pool: snapshot.name.clone(),
                    reason: "subnet allocator given a range pool".to_string(),
                })
            }
        };

        if let Some(gateway) = snapshot.gateway {
            if !prefix.contains(&gateway) {
                return Err(AllocError::InvalidSnapshot {
                    pool: snapshot.name.clone(),
                    reason: format!("gateway {} is outside prefix {}", gateway, prefix),
                });
            }
        }

        Ok(SubnetLease {
            prefix,
            gateway: snapshot.gateway,
            degenerate: Self::is_degenerate(&prefix),
        })
    }

    /// Pick the address for a new key.
    ///
    /// `in_use` holds the addresses already recorded for this pool. For a
    /// degenerate prefix the fixed address is returned when it is free, or
    /// when `allow_sharing` is set; otherwise the pool is exhausted.
    pub fn allocate(
        snapshot: &PoolSnapshot,
        in_use: &HashSet<IpAddr>,
        allow_sharing: bool,
    ) -> Result<IpNet, AllocError> {
        let lease = Self::resolve(snapshot)?;
        let (first, last) = lease.host_bounds();
        let exhausted = || AllocError::PoolExhausted {
            pool: snapshot.name.clone(),
        };

        let mut found = None;
        if lease.degenerate {
            walk_eligible(snapshot, first, last, lease.is_ipv4(), |candidate| {
                found = Some(candidate);
                true
            });
            let address = found.ok_or_else(exhausted)?;
            if in_use.contains(&address) {
                if !allow_sharing {
                    return Err(exhausted());
                }
                debug!(
                    "sharing address {} of degenerate prefix {} in pool {}",
                    address, lease.prefix, snapshot.name
                );
            }
        } else {
            walk_eligible(snapshot, first, last, lease.is_ipv4(), |candidate| {
                if in_use.contains(&candidate) {
                    return false;
                }
                found = Some(candidate);
                true
            });
        }

        found
            .and_then(|ip| host_net(ip, lease.prefix.prefix_len()))
            .ok_or_else(exhausted)
    }

    /// Number of distinct addresses the prefix can hand out
    pub fn capacity(snapshot: &PoolSnapshot) -> Result<u128, AllocError> {
        let lease = Self::resolve(snapshot)?;
        let (first, last) = lease.host_bounds();
        let count = count_eligible(snapshot, first, last, lease.is_ipv4());
        Ok(if lease.degenerate { count.min(1) } else { count })
    }
}
