//! Shared utilities: address arithmetic, atomic file writes, name validation.

pub mod fs;
pub mod ip_utils;
pub mod validation;

pub use fs::atomic_write;
pub use ip_utils::{ip_to_u128, same_family, u128_to_ip};
pub use validation::validate_resource_name;
