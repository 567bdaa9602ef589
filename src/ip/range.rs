//! Range pool allocation.
//!
//! A range pool assigns this node a closed `[start, end]` interval. Addresses
//! are handed out lowest-first so that allocation order is reproducible.

use super::{count_eligible, walk_eligible};
use crate::error::AllocError;
use crate::pool::{PoolKind, PoolSnapshot};
use crate::utils::ip_utils::{host_net, ip_to_u128};
use ipnet::IpNet;
use std::collections::HashSet;
use std::net::IpAddr;

/// Lowest-free allocator over a range pool block
#[derive(Debug, Clone, Copy, Default)]
pub struct RangeAllocator;

struct RangeBounds {
    first: u128,
    last: u128,
    prefix_len: u8,
    ipv4: bool,
}

impl RangeAllocator {
    fn bounds(snapshot: &PoolSnapshot) -> Result<RangeBounds, AllocError> {
        snapshot.validate()?;
        match &snapshot.kind {
            PoolKind::Range { start, end, subnet } => Ok(RangeBounds {
                first: ip_to_u128(*start),
                last: ip_to_u128(*end),
                prefix_len: subnet.prefix_len(),
                ipv4: start.is_ipv4(),
            }),
            PoolKind::CidrSubdivision { .. } => Err(AllocError::InvalidSnapshot {
                pool: snapshot.name.clone(),
                reason: "range allocator given a CIDR pool".to_string(),
            }),
        }
    }

    /// Lowest address of the block that is not excluded, not the gateway and
    /// not in `in_use`.
    ///
    /// The address carries the prefix length of the pool subnet.
    pub fn allocate(snapshot: &PoolSnapshot, in_use: &HashSet<IpAddr>) -> Result<IpNet, AllocError> {
        let bounds = Self::bounds(snapshot)?;

        let mut found = None;
        walk_eligible(snapshot, bounds.first, bounds.last, bounds.ipv4, |candidate| {
            if in_use.contains(&candidate) {
                return false;
            }
            found = Some(candidate);
            true
        });

        found
            .and_then(|ip| host_net(ip, bounds.prefix_len))
            .ok_or_else(|| AllocError::PoolExhausted {
                pool: snapshot.name.clone(),
            })
    }

    /// Number of addresses the block can ever hand out
    pub fn capacity(snapshot: &PoolSnapshot) -> Result<u128, AllocError> {
        let bounds = Self::bounds(snapshot)?;
        Ok(count_eligible(snapshot, bounds.first, bounds.last, bounds.ipv4))
    }
}
