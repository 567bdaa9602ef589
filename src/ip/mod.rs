//! IP address allocation.
//!
//! This module holds the two allocators of the engine: the range allocator
//! for start-end pool blocks and the subnet allocator for per-node CIDR
//! prefixes. Both are stateless; the set of addresses already in use is
//! always supplied by the caller from the allocation store.

pub mod range;
pub mod subnet;

// Re-export commonly used types
pub use range::RangeAllocator;
pub use subnet::{SubnetAllocator, SubnetLease};

use crate::pool::PoolSnapshot;
use crate::utils::ip_utils::{ip_to_u128, u128_to_ip};
use std::net::IpAddr;

/// Walk the addresses of `[first, last]` that the snapshot allows, ascending.
///
/// Excluded intervals are skipped as a whole and the gateway is never
/// yielded. `visit` returns `true` to stop the walk.
pub(crate) fn walk_eligible(
    snapshot: &PoolSnapshot,
    first: u128,
    last: u128,
    ipv4: bool,
    mut visit: impl FnMut(IpAddr) -> bool,
) {
    let gateway = snapshot.gateway.map(ip_to_u128);
    let mut cursor = first;

    while cursor <= last {
        if let Some(excluded_end) = snapshot.exclusion_end_covering(cursor, ipv4) {
            match excluded_end.checked_add(1) {
                Some(next) => {
                    cursor = next;
                    continue;
                }
                None => return,
            }
        }

        if gateway != Some(cursor) {
            if let Some(candidate) = u128_to_ip(cursor, ipv4) {
                if visit(candidate) {
                    return;
                }
            }
        }

        match cursor.checked_add(1) {
            Some(next) => cursor = next,
            None => return,
        }
    }
}

/// Number of addresses of `[first, last]` the snapshot allows.
///
/// Computed from merged exclusion intervals, so it is cheap even for IPv6
/// blocks. Saturates at `u128::MAX`.
pub(crate) fn count_eligible(snapshot: &PoolSnapshot, first: u128, last: u128, ipv4: bool) -> u128 {
    if first > last {
        return 0;
    }

    let mut excluded: Vec<(u128, u128)> = snapshot
        .exclusions
        .iter()
        .filter(|range| range.start_ip.is_ipv4() == ipv4)
        .map(|range| (ip_to_u128(range.start_ip).max(first), ip_to_u128(range.end_ip).min(last)))
        .filter(|(start, end)| start <= end)
        .collect();
    excluded.sort_unstable();

    let mut merged: Vec<(u128, u128)> = Vec::with_capacity(excluded.len());
    for (start, end) in excluded {
        match merged.last_mut() {
            Some((_, last_end)) if start <= last_end.saturating_add(1) => {
                *last_end = (*last_end).max(end);
            }
            _ => merged.push((start, end)),
        }
    }

    let total = (last - first).saturating_add(1);
    let excluded_count = merged
        .iter()
        .fold(0u128, |acc, (start, end)| acc.saturating_add((end - start).saturating_add(1)));

    let gateway_counts = snapshot
        .gateway
        .filter(|gw| gw.is_ipv4() == ipv4)
        .map(ip_to_u128)
        .map_or(false, |gw| {
            gw >= first && gw <= last && !merged.iter().any(|(start, end)| gw >= *start && gw <= *end)
        });

    total
        .saturating_sub(excluded_count)
        .saturating_sub(u128::from(gateway_counts))
}
