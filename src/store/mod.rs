//! Allocation store module.
//!
//! The store owns every allocation record on this node and is the only
//! component that may create or remove one. State lives in a single JSON
//! file that is replaced atomically on every change:
//!
//! ```json
//! {
//!   "version": 1,
//!   "pools": {
//!     "pool-a": {
//!       "entries": {
//!         "c1_eth0": {
//!           "pool_name": "pool-a",
//!           "pool_type": "ippool",
//!           "container_id": "c1",
//!           "interface_name": "eth0",
//!           "address": "192.168.0.2/16",
//!           "gateway": "192.168.0.1",
//!           "metadata": { "pod_name": "web-0", "pod_namespace": "default",
//!                         "pod_uid": "…", "device_id": "0000:d8:00.1" },
//!           "created_at": "2024-01-01T00:00:00Z"
//!         }
//!       }
//!     }
//!   }
//! }
//! ```

pub mod allocation_store;
pub mod types;

// Re-export commonly used types
pub use allocation_store::AllocationStore;
pub use types::{AllocationKey, AllocationMetadata, AllocationRecord, StoreFile, STORE_VERSION};
