use crate::service::{ServiceOptions, DEFAULT_PROVIDER_TIMEOUT};
use crate::utils::validation::validate_resource_name;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default location of the allocation store
pub const DEFAULT_STORE_PATH: &str = "/var/lib/ipam-node/store.json";

/// Default address the daemon listens on for shim requests
pub const DEFAULT_DAEMON_SOCKET: &str = "unix:///var/lib/cni/ipam-node/daemon.sock";

/// Default time the shim waits for a daemon reply
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Top-level configuration structure that mirrors the YAML configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Identity of this node
    pub node: NodeSettings,
    /// Where allocations are persisted
    #[serde(default)]
    pub store: StoreSettings,
    /// Source of pool assignments
    pub pools: PoolSettings,
    /// Values handed to the runtime shim
    #[serde(default)]
    pub shim: ShimSettings,
}

/// Node identity and daemon logging
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSettings {
    /// Name of this node as used in pool assignments
    pub name: String,
    /// (Optional) Log filter for the daemon (default: "info")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

/// Allocation store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    /// Path of the store file
    pub path: PathBuf,
}

/// Pool assignment settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSettings {
    /// YAML file with the cluster pool definitions
    pub definitions: PathBuf,
    /// How long to wait for a pool snapshot (e.g., "5s")
    #[serde(default = "default_provider_timeout", with = "humantime_serde")]
    pub provider_timeout: Duration,
    /// Let keys share the address of a /31, /32, /127 or /128 node prefix
    #[serde(default)]
    pub allow_degenerate_sharing: bool,
}

/// Settings exposed to the runtime shim
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShimSettings {
    /// Transport address of the daemon (unix:// or tcp://)
    #[serde(default = "default_daemon_socket")]
    pub daemon_socket: String,
    /// Per-call timeout applied by the shim (e.g., "5s")
    #[serde(default = "default_call_timeout", with = "humantime_serde")]
    pub call_timeout: Duration,
    /// (Optional) Log file of the shim
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<String>,
    /// (Optional) Log level of the shim
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    /// Use the pool name from the network config even when the pod asks for another
    #[serde(default)]
    pub force_pool_name: bool,
}

/// Shim configuration as written into the runtime network config
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShimConfig {
    pub daemon_socket: String,
    pub daemon_call_timeout_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    pub force_pool_name: bool,
}

fn default_provider_timeout() -> Duration {
    DEFAULT_PROVIDER_TIMEOUT
}

fn default_daemon_socket() -> String {
    DEFAULT_DAEMON_SOCKET.to_string()
}

fn default_call_timeout() -> Duration {
    DEFAULT_CALL_TIMEOUT
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_STORE_PATH),
        }
    }
}

impl Default for ShimSettings {
    fn default() -> Self {
        Self {
            daemon_socket: default_daemon_socket(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            log_file: None,
            log_level: None,
            force_pool_name: false,
        }
    }
}

/// Validation errors for configuration
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid node configuration: {0}")]
    InvalidNode(String),
    #[error("Invalid store configuration: {0}")]
    InvalidStore(String),
    #[error("Invalid pools configuration: {0}")]
    InvalidPools(String),
    #[error("Invalid shim configuration: {0}")]
    InvalidShim(String),
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_resource_name(&self.node.name).map_err(ValidationError::InvalidNode)?;

        if self.store.path.as_os_str().is_empty() {
            return Err(ValidationError::InvalidStore("store path cannot be empty".to_string()));
        }
        if self.store.path.file_name().is_none() {
            return Err(ValidationError::InvalidStore(format!(
                "store path {} must name a file",
                self.store.path.display()
            )));
        }

        if self.pools.definitions.as_os_str().is_empty() {
            return Err(ValidationError::InvalidPools(
                "pool definitions path cannot be empty".to_string(),
            ));
        }
        if self.pools.provider_timeout.is_zero() {
            return Err(ValidationError::InvalidPools(
                "provider_timeout must be greater than zero".to_string(),
            ));
        }

        let socket = &self.shim.daemon_socket;
        let has_scheme = ["unix://", "tcp://"]
            .iter()
            .any(|scheme| socket.strip_prefix(scheme).map_or(false, |rest| !rest.is_empty()));
        if !has_scheme {
            return Err(ValidationError::InvalidShim(format!(
                "daemon_socket '{}' must be a unix:// or tcp:// address",
                socket
            )));
        }
        if self.shim.call_timeout.as_secs() == 0 {
            return Err(ValidationError::InvalidShim(
                "call_timeout must be at least one second".to_string(),
            ));
        }

        Ok(())
    }

    /// Log filter for the daemon
    pub fn log_level(&self) -> &str {
        self.node.log_level.as_deref().unwrap_or("info")
    }

    /// Options for the allocation service
    pub fn service_options(&self) -> ServiceOptions {
        ServiceOptions {
            provider_timeout: self.pools.provider_timeout,
            allow_degenerate_sharing: self.pools.allow_degenerate_sharing,
        }
    }

    /// Configuration consumed by the runtime shim
    pub fn shim_config(&self) -> ShimConfig {
        ShimConfig {
            daemon_socket: self.shim.daemon_socket.clone(),
            daemon_call_timeout_seconds: self.shim.call_timeout.as_secs(),
            log_file: self.shim.log_file.clone(),
            log_level: self.shim.log_level.clone(),
            force_pool_name: self.shim.force_pool_name,
        }
    }
}
