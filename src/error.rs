//! Error taxonomy for the allocation engine.
//!
//! Each component reports its own error type; the service folds them into
//! [`IpamError`], which carries a transport-neutral [`ErrorCode`] so that any
//! request layer can map failures onto its own status codes.

use std::io;
use std::path::PathBuf;

/// Errors reported by the range and subnet allocators
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllocError {
    #[error("no free addresses left in pool {pool}")]
    PoolExhausted { pool: String },

    #[error("invalid snapshot for pool {pool}: {reason}")]
    InvalidSnapshot { pool: String, reason: String },
}

/// Errors reported by a pool snapshot provider
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("pool {pool} is not known on this node")]
    UnknownPool { pool: String },

    #[error("timed out after {timeout_ms}ms waiting for pool snapshot")]
    Timeout { timeout_ms: u128 },

    #[error("pool snapshot provider unavailable: {0}")]
    Unavailable(String),
}

/// Errors reported by the allocation store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("allocation already exists for {key}")]
    AlreadyExists { key: String },

    #[error("failed to persist store {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to serialize store: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store file {path} is corrupted: {reason}")]
    Corrupted { path: PathBuf, reason: String },

    #[error("store file {path} has version {found}, newest supported is {supported}")]
    UnsupportedVersion {
        path: PathBuf,
        found: u32,
        supported: u32,
    },
}

/// Transport-neutral classification of a service failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    NotFound,
    ResourceExhausted,
    InvalidArgument,
    Internal,
    Unavailable,
    Cancelled,
}

/// Errors returned by the allocation service
#[derive(Debug, thiserror::Error)]
pub enum IpamError {
    #[error("no allocation for pool {pool}, container {container_id}, interface {interface_name}")]
    NotFound {
        pool: String,
        container_id: String,
        interface_name: String,
    },

    #[error("no free addresses left in pool {pool}")]
    PoolExhausted { pool: String },

    #[error("unknown pool {pool}")]
    UnknownPool { pool: String },

    #[error("invalid request: {0}")]
    InvalidArgument(String),

    #[error("invalid snapshot for pool {pool}: {reason}")]
    InvalidSnapshot { pool: String, reason: String },

    #[error("allocation store consistency violation: record already exists for {key}")]
    AlreadyExists { key: String },

    #[error("allocation store persistence failed: {0}")]
    Persistence(#[source] StoreError),

    #[error("temporarily unavailable: {0}")]
    Unavailable(String),

    #[error("request cancelled")]
    Cancelled,
}

impl IpamError {
    /// Status classification for the transport layer
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::PoolExhausted { .. } => ErrorCode::ResourceExhausted,
            Self::UnknownPool { .. } | Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::InvalidSnapshot { .. } | Self::AlreadyExists { .. } | Self::Persistence(_) => {
                ErrorCode::Internal
            }
            Self::Unavailable(_) => ErrorCode::Unavailable,
            Self::Cancelled => ErrorCode::Cancelled,
        }
    }

    /// Whether the caller may safely retry the same request
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Unavailable(_) | Self::Cancelled | Self::Persistence(_)
        )
    }
}

impl From<AllocError> for IpamError {
    fn from(err: AllocError) -> Self {
        match err {
            AllocError::PoolExhausted { pool } => Self::PoolExhausted { pool },
            AllocError::InvalidSnapshot { pool, reason } => Self::InvalidSnapshot { pool, reason },
        }
    }
}

impl From<ProviderError> for IpamError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::UnknownPool { pool } => Self::UnknownPool { pool },
            other => Self::Unavailable(other.to_string()),
        }
    }
}

impl From<StoreError> for IpamError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::AlreadyExists { key } => Self::AlreadyExists { key },
            other => Self::Persistence(other),
        }
    }
}
