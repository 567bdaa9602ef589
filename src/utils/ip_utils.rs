//! IP utility functions for address arithmetic shared by both allocators.
//!
//! Addresses of either family are mapped onto `u128` so that range scans,
//! offsets and comparisons use one code path.

use ipnet::IpNet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Convert an address to its numeric value
pub fn ip_to_u128(ip: IpAddr) -> u128 {
    match ip {
        IpAddr::V4(v4) => u32::from(v4) as u128,
        IpAddr::V6(v6) => u128::from(v6),
    }
}

/// Convert a numeric value back to an address of the requested family.
///
/// Returns `None` when the value does not fit an IPv4 address.
pub fn u128_to_ip(value: u128, ipv4: bool) -> Option<IpAddr> {
    if ipv4 {
        u32::try_from(value).ok().map(|v| IpAddr::V4(Ipv4Addr::from(v)))
    } else {
        Some(IpAddr::V6(Ipv6Addr::from(value)))
    }
}

/// Check that two addresses belong to the same family
pub fn same_family(a: IpAddr, b: IpAddr) -> bool {
    a.is_ipv4() == b.is_ipv4()
}

/// Return the address `offset` positions after `ip`, if it exists
pub fn offset_ip(ip: IpAddr, offset: u128) -> Option<IpAddr> {
    let value = ip_to_u128(ip).checked_add(offset)?;
    u128_to_ip(value, ip.is_ipv4())
}

/// Check whether `ip` lies in the closed interval `[start, end]`.
///
/// Addresses of a different family are never in range.
pub fn ip_in_range(ip: IpAddr, start: IpAddr, end: IpAddr) -> bool {
    if !same_family(ip, start) || !same_family(ip, end) {
        return false;
    }
    let value = ip_to_u128(ip);
    value >= ip_to_u128(start) && value <= ip_to_u128(end)
}

/// First and last address of a prefix as numeric values
pub fn prefix_bounds(prefix: &IpNet) -> (u128, u128) {
    let first = ip_to_u128(prefix.network());
    let last = ip_to_u128(prefix.broadcast());
    (first, last)
}

/// Attach the prefix length of the owning network to a host address
pub fn host_net(ip: IpAddr, prefix_len: u8) -> Option<IpNet> {
    IpNet::new(ip, prefix_len).ok()
}
