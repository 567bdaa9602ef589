//! Cluster-wide pool definitions.
//!
//! Pools are defined once for the whole cluster; an upstream controller
//! assigns every node either a start-end block (IP pools) or a prefix (CIDR
//! pools) and records it in the pool status. This module reads those
//! definitions from a YAML document and projects them onto a single node,
//! yielding the snapshots the allocation engine works with.

use super::types::{ExclusionRange, PoolKind, PoolSnapshot, PoolType};
use crate::utils::ip_utils::offset_ip;
use crate::utils::validation::validate_resource_name;
use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use ipnet::IpNet;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::net::IpAddr;
use std::path::Path;

/// All pools known to the cluster
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolDefinitions {
    #[serde(default)]
    pub ip_pools: Vec<IpPoolDefinition>,
    #[serde(default)]
    pub cidr_pools: Vec<CidrPoolDefinition>,
}

/// Range pool: the subnet is split into per-node blocks of addresses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpPoolDefinition {
    pub name: String,
    pub subnet: IpNet,
    pub per_node_block_size: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<IpAddr>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclusions: Vec<ExclusionRange>,
    #[serde(default)]
    pub allocations: Vec<NodeRangeAllocation>,
}

/// Block of an IP pool assigned to one node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRangeAllocation {
    pub node_name: String,
    pub start_ip: IpAddr,
    pub end_ip: IpAddr,
}

/// CIDR pool: the cidr is split into one prefix per node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CidrPoolDefinition {
    pub name: String,
    pub cidr: IpNet,
    pub per_node_network_prefix: u8,
    /// Index of the gateway inside every node prefix (1 = first host)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclusions: Vec<ExclusionRange>,
    #[serde(default)]
    pub allocations: Vec<NodePrefixAllocation>,
}

/// Prefix of a CIDR pool assigned to one node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodePrefixAllocation {
    pub node_name: String,
    pub prefix: IpNet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<IpAddr>,
}

impl IpPoolDefinition {
    /// Project the pool onto `node_name`.
    ///
    /// Returns `None` when the node has no block in this pool.
    pub fn snapshot_for_node(&self, node_name: &str) -> Option<PoolSnapshot> {
        let allocation = self.allocations.iter().find(|a| a.node_name == node_name)?;
        Some(PoolSnapshot {
            name: self.name.clone(),
            kind: PoolKind::Range {
                start: allocation.start_ip,
                end: allocation.end_ip,
                subnet: self.subnet,
            },
            gateway: self.gateway,
            exclusions: self.exclusions.clone(),
        })
    }
}

impl CidrPoolDefinition {
    /// Gateway inside `prefix`: the one recorded for the node wins, then the
    /// pool-wide gateway index.
    fn gateway_for(&self, allocation: &NodePrefixAllocation) -> Option<IpAddr> {
        if allocation.gateway.is_some() {
            return allocation.gateway;
        }
        let index = self.gateway_index?;
        let gateway = offset_ip(allocation.prefix.network(), index as u128)?;
        if allocation.prefix.contains(&gateway) {
            Some(gateway)
        } else {
            warn!(
                "gateway index {} is outside prefix {} of pool {}",
                index, allocation.prefix, self.name
            );
            None
        }
    }

    /// Project the pool onto `node_name`.
    ///
    /// Returns `None` when the node has no prefix in this pool.
    pub fn snapshot_for_node(&self, node_name: &str) -> Option<PoolSnapshot> {
        let allocation = self.allocations.iter().find(|a| a.node_name == node_name)?;
        if allocation.prefix.prefix_len() != self.per_node_network_prefix {
            warn!(
                "prefix {} of pool {} does not match per-node prefix length {}",
                allocation.prefix, self.name, self.per_node_network_prefix
            );
        }
        Some(PoolSnapshot {
            name: self.name.clone(),
            kind: PoolKind::CidrSubdivision {
                prefix: allocation.prefix,
            },
            gateway: self.gateway_for(allocation),
            exclusions: self.exclusions.clone(),
        })
    }
}

impl PoolDefinitions {
    /// Snapshots of every pool that has a valid assignment for `node_name`.
    ///
    /// Pools with an invalid name or an inconsistent assignment are skipped
    /// with a warning so that one bad pool does not block the others.
    pub fn snapshots_for_node(&self, node_name: &str) -> Vec<(PoolType, PoolSnapshot)> {
        let ip_snapshots = self
            .ip_pools
            .iter()
            .filter(|pool| Self::usable_name(&pool.name))
            .filter_map(|pool| pool.snapshot_for_node(node_name));
        let cidr_snapshots = self
            .cidr_pools
            .iter()
            .filter(|pool| Self::usable_name(&pool.name))
            .filter_map(|pool| pool.snapshot_for_node(node_name));

        ip_snapshots
            .chain(cidr_snapshots)
            .filter_map(|snapshot| match snapshot.validate() {
                Ok(()) => {
                    debug!("pool {} assigned to node {}: {:?}", snapshot.key(), node_name, snapshot.kind);
                    Some((snapshot.pool_type(), snapshot))
                }
                Err(e) => {
                    warn!("skipping pool {} for node {}: {}", snapshot.key(), node_name, e);
                    None
                }
            })
            .collect()
    }

    fn usable_name(name: &str) -> bool {
        match validate_resource_name(name) {
            Ok(()) => true,
            Err(e) => {
                warn!("skipping pool with invalid name: {}", e);
                false
            }
        }
    }
}

/// Load pool definitions from a YAML file
pub fn load_pool_definitions(path: &Path) -> Result<PoolDefinitions> {
    info!("Loading pool definitions from: {:?}", path);

    let file = File::open(path)
        .wrap_err_with(|| format!("Failed to open pool definitions '{}'", path.display()))?;
    let definitions: PoolDefinitions = serde_yaml::from_reader(file)
        .wrap_err_with(|| format!("Failed to parse pool definitions '{}'", path.display()))?;

    info!(
        "Loaded {} IP pools and {} CIDR pools",
        definitions.ip_pools.len(),
        definitions.cidr_pools.len()
    );
    Ok(definitions)
}
