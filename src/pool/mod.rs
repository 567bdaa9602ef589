//! Pool snapshots and the provider interface.
//!
//! This module defines the node-local view of a pool that the allocators
//! consume, the cluster-wide definitions it is projected from, and the
//! provider trait through which the engine reads the latest snapshot.

pub mod definitions;
pub mod provider;
pub mod types;

// Re-export commonly used types
pub use definitions::{load_pool_definitions, PoolDefinitions};
pub use provider::{PoolSnapshotProvider, StaticSnapshotProvider};
pub use types::{pool_key, ExclusionRange, PoolKind, PoolSnapshot, PoolType};
