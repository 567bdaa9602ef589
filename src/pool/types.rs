//! Pool snapshot type definitions.
//!
//! A snapshot is the node-local, point-in-time view of one pool: the block
//! assigned to this node, its gateway and the addresses that must never be
//! handed out. Snapshots are produced by a provider and never mutated by the
//! engine.

use crate::error::AllocError;
use crate::utils::ip_utils::{ip_in_range, ip_to_u128, same_family};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// Prefix used to separate CIDR pools from IP pools in pool keys
const CIDR_POOL_KEY_PREFIX: &str = "cidrpool/";

/// Which pool namespace a request refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolType {
    /// Contiguous range pool, one start-end block per node
    #[default]
    IpPool,
    /// CIDR pool subdivided into one prefix per node
    CidrPool,
}

impl fmt::Display for PoolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IpPool => write!(f, "ippool"),
            Self::CidrPool => write!(f, "cidrpool"),
        }
    }
}

/// Build the store-level key of a pool.
///
/// IP pools keep their plain name, CIDR pools are prefixed so that both
/// namespaces can hold a pool with the same name.
///
/// # Examples
/// ```
/// use ipam_node::pool::{pool_key, PoolType};
///
/// assert_eq!(pool_key(PoolType::IpPool, "pool-a"), "pool-a");
/// assert_eq!(pool_key(PoolType::CidrPool, "pool-a"), "cidrpool/pool-a");
/// ```
pub fn pool_key(pool_type: PoolType, name: &str) -> String {
    match pool_type {
        PoolType::IpPool => name.to_string(),
        PoolType::CidrPool => format!("{}{}", CIDR_POOL_KEY_PREFIX, name),
    }
}

/// Closed interval of addresses, used for exclusions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusionRange {
    pub start_ip: IpAddr,
    pub end_ip: IpAddr,
}

impl ExclusionRange {
    pub fn new(start_ip: IpAddr, end_ip: IpAddr) -> Self {
        Self { start_ip, end_ip }
    }

    /// Returns true if `ip` lies inside this exclusion
    pub fn contains(&self, ip: IpAddr) -> bool {
        ip_in_range(ip, self.start_ip, self.end_ip)
    }
}

/// Block of addresses assigned to this node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PoolKind {
    /// Closed interval inside the pool-wide `subnet`
    Range {
        start: IpAddr,
        end: IpAddr,
        subnet: IpNet,
    },
    /// Prefix owned exclusively by this node
    CidrSubdivision { prefix: IpNet },
}

/// Point-in-time view of a pool as assigned to this node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub name: String,
    pub kind: PoolKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<IpAddr>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclusions: Vec<ExclusionRange>,
}

impl PoolSnapshot {
    /// Snapshot of a range pool
    pub fn range(name: &str, start: IpAddr, end: IpAddr, subnet: IpNet) -> Self {
        Self {
            name: name.to_string(),
            kind: PoolKind::Range { start, end, subnet },
            gateway: None,
            exclusions: Vec::new(),
        }
    }

    /// Snapshot of a CIDR subdivision pool
    pub fn cidr(name: &str, prefix: IpNet) -> Self {
        Self {
            name: name.to_string(),
            kind: PoolKind::CidrSubdivision { prefix },
            gateway: None,
            exclusions: Vec::new(),
        }
    }

    pub fn with_gateway(mut self, gateway: IpAddr) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn with_exclusion(mut self, start_ip: IpAddr, end_ip: IpAddr) -> Self {
        self.exclusions.push(ExclusionRange::new(start_ip, end_ip));
        self
    }

    /// Namespace this snapshot belongs to
    pub fn pool_type(&self) -> PoolType {
        match self.kind {
            PoolKind::Range { .. } => PoolType::IpPool,
            PoolKind::CidrSubdivision { .. } => PoolType::CidrPool,
        }
    }

    /// Store-level key of this pool
    pub fn key(&self) -> String {
        pool_key(self.pool_type(), &self.name)
    }

    /// Returns true if `ip` is covered by any exclusion
    pub fn is_excluded(&self, ip: IpAddr) -> bool {
        self.exclusions.iter().any(|range| range.contains(ip))
    }

    /// Returns true if `ip` is the pool gateway
    pub fn is_gateway(&self, ip: IpAddr) -> bool {
        self.gateway == Some(ip)
    }

    /// Highest exclusion end (numeric) covering `value`, used to skip whole
    /// excluded intervals during a scan.
    pub(crate) fn exclusion_end_covering(&self, value: u128, ipv4: bool) -> Option<u128> {
        self.exclusions
            .iter()
            .filter(|range| range.start_ip.is_ipv4() == ipv4)
            .filter(|range| value >= ip_to_u128(range.start_ip) && value <= ip_to_u128(range.end_ip))
            .map(|range| ip_to_u128(range.end_ip))
            .max()
    }

    fn invalid(&self, reason: impl Into<String>) -> AllocError {
        AllocError::InvalidSnapshot {
            pool: self.name.clone(),
            reason: reason.into(),
        }
    }

    /// Check the snapshot for internal consistency
    pub fn validate(&self) -> Result<(), AllocError> {
        if self.name.is_empty() {
            return Err(self.invalid("pool name cannot be empty"));
        }

        let family_anchor = match &self.kind {
            PoolKind::Range { start, end, subnet } => {
                if !same_family(*start, *end) || !same_family(*start, subnet.addr()) {
                    return Err(self.invalid("range start, end and subnet must share an address family"));
                }
                if ip_to_u128(*start) > ip_to_u128(*end) {
                    return Err(self.invalid(format!("range start {} is after end {}", start, end)));
                }
                if !subnet.contains(start) || !subnet.contains(end) {
                    return Err(self.invalid(format!(
                        "range {}-{} is not inside subnet {}",
                        start, end, subnet
                    )));
                }
                *start
            }
            PoolKind::CidrSubdivision { prefix } => {
                if prefix.trunc() != *prefix {
                    return Err(self.invalid(format!(
                        "prefix {} is not aligned to its network address",
                        prefix
                    )));
                }
                prefix.addr()
            }
        };

        if let Some(gateway) = self.gateway {
            if !same_family(gateway, family_anchor) {
                return Err(self.invalid(format!("gateway {} has the wrong address family", gateway)));
            }
        }

        for range in &self.exclusions {
            if !same_family(range.start_ip, family_anchor) || !same_family(range.end_ip, family_anchor) {
                return Err(self.invalid(format!(
                    "exclusion {}-{} has the wrong address family",
                    range.start_ip, range.end_ip
                )));
            }
            if ip_to_u128(range.start_ip) > ip_to_u128(range.end_ip) {
                return Err(self.invalid(format!(
                    "exclusion start {} is after end {}",
                    range.start_ip, range.end_ip
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn net(s: &str) -> IpNet {
        s.parse().unwrap()
    }

    #[test]
    fn test_pool_key_namespaces() {
        let range = PoolSnapshot::range("pool-a", ip("192.168.0.2"), ip("192.168.0.254"), net("192.168.0.0/16"));
        let cidr = PoolSnapshot::cidr("pool-a", net("10.200.0.0/24"));

        assert_eq!(range.key(), "pool-a");
        assert_eq!(cidr.key(), "cidrpool/pool-a");
        assert_ne!(range.key(), cidr.key());
    }

    #[test]
    fn test_valid_snapshots() {
        let range = PoolSnapshot::range("pool-a", ip("192.168.0.2"), ip("192.168.0.254"), net("192.168.0.0/16"))
            .with_gateway(ip("192.168.0.1"))
            .with_exclusion(ip("192.168.0.10"), ip("192.168.0.20"));
        assert!(range.validate().is_ok());

        let cidr = PoolSnapshot::cidr("pool-b", net("fd00:10::/64")).with_gateway(ip("fd00:10::1"));
        assert!(cidr.validate().is_ok());
    }

    #[test]
    fn test_range_outside_subnet_is_invalid() {
        let snapshot = PoolSnapshot::range("pool-a", ip("192.168.0.2"), ip("192.169.0.1"), net("192.168.0.0/16"));
        assert!(matches!(snapshot.validate(), Err(AllocError::InvalidSnapshot { .. })));
    }

    #[test]
    fn test_reversed_range_is_invalid() {
        let snapshot = PoolSnapshot::range("pool-a", ip("192.168.0.20"), ip("192.168.0.2"), net("192.168.0.0/16"));
        assert!(snapshot.validate().is_err());
    }

    #[test]
    fn test_mixed_families_are_invalid() {
        let snapshot = PoolSnapshot::cidr("pool-b", net("10.0.0.0/24")).with_gateway(ip("fd00::1"));
        assert!(snapshot.validate().is_err());

        let snapshot = PoolSnapshot::cidr("pool-b", net("10.0.0.0/24")).with_exclusion(ip("fd00::1"), ip("fd00::2"));
        assert!(snapshot.validate().is_err());
    }

    #[test]
    fn test_unaligned_prefix_is_invalid() {
        let snapshot = PoolSnapshot::cidr("pool-b", net("10.0.0.5/24"));
        assert!(snapshot.validate().is_err());
    }

    #[test]
    fn test_exclusion_lookup() {
        let snapshot = PoolSnapshot::range("pool-a", ip("10.0.0.1"), ip("10.0.0.100"), net("10.0.0.0/24"))
            .with_exclusion(ip("10.0.0.5"), ip("10.0.0.9"))
            .with_exclusion(ip("10.0.0.8"), ip("10.0.0.12"));

        assert!(snapshot.is_excluded(ip("10.0.0.5")));
        assert!(snapshot.is_excluded(ip("10.0.0.12")));
        assert!(!snapshot.is_excluded(ip("10.0.0.13")));

        let covering = snapshot.exclusion_end_covering(ip_to_u128(ip("10.0.0.8")), true);
        assert_eq!(covering, Some(ip_to_u128(ip("10.0.0.12"))));
    }

    #[test]
    fn test_snapshot_yaml_shape() {
        let yaml = r#"
name: pool-a
kind:
  type: range
  start: 192.168.0.2
  end: 192.168.0.254
  subnet: 192.168.0.0/16
gateway: 192.168.0.1
exclusions:
  - start_ip: 192.168.0.10
    end_ip: 192.168.0.12
"#;
        let snapshot: PoolSnapshot = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(snapshot.pool_type(), PoolType::IpPool);
        assert_eq!(snapshot.gateway, Some(ip("192.168.0.1")));
        assert_eq!(snapshot.exclusions.len(), 1);
    }
}
