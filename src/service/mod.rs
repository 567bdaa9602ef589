//! Allocation service module.
//!
//! The service is the request-facing side of the engine. It is `Send + Sync`
//! and meant to be shared behind an `Arc` by whatever transport carries
//! requests to the daemon.

pub mod allocation;
pub mod types;

// Re-export commonly used types
pub use allocation::{AllocationService, ServiceOptions, DEFAULT_PROVIDER_TIMEOUT};
pub use types::{AllocationInfo, IpamParameters, RequestContext};
