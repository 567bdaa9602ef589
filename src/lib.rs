//! # ipam-node - Node-local IP address management for container interfaces
//!
//! This library implements the allocation engine of a node IPAM daemon. It
//! hands out IPv4 and IPv6 addresses to container network interfaces from
//! pools that the cluster has carved up and assigned to this node.
//!
//! ## Overview
//!
//! Each node receives, per pool, either a contiguous address range (an
//! `ippool`) or a whole subnet (a `cidrpool`). A container asks for addresses
//! by naming one or more pools together with its container ID and interface
//! name. The engine answers with one address per pool and remembers the
//! answer so that repeated requests are idempotent and survive restarts.
//!
//! ## Key Features
//!
//! - **Two pool kinds**: contiguous per-node ranges and per-node subnets
//! - **Exclusions and gateways**: never handed out to a container
//! - **Lowest-first allocation**: deterministic results for a given store
//! - **All-or-nothing requests**: a failing pool rolls back the others
//! - **Crash-safe store**: atomic rename of a versioned JSON file
//! - **Reconciliation**: allocations of pools removed from the node are dropped
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - `config`: Daemon configuration structures and validation
//! - `config_loader`: Configuration loading and service bootstrap
//! - `error`: Error types and the stable error codes reported to callers
//! - `pool`: Pool snapshots, cluster pool definitions and the snapshot provider
//! - `ip`: Range and subnet allocators
//! - `store`: Persistent allocation store
//! - `service`: Allocate, deallocate and lookup operations
//! - `utils`: Utility functions and helpers
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use ipam_node::config_loader;
//! use ipam_node::service::{IpamParameters, RequestContext};
//! use std::path::Path;
//!
//! let config = config_loader::load_config(Path::new("node.yaml"))?;
//! let service = config_loader::start_service(&config)?;
//!
//! let params = IpamParameters::new(&["pool-a"], "0123456789ab", "eth0");
//! let allocations = service.allocate(&params, &RequestContext::new())?;
//! println!("{}", allocations[0].address);
//! # Ok::<(), color_eyre::eyre::Error>(())
//! ```
//!
//! ## Configuration Format
//!
//! ```yaml
//! node:
//!   name: worker-1
//!   log_level: info
//!
//! store:
//!   path: /var/lib/ipam-node/store.json
//!
//! pools:
//!   definitions: /etc/ipam-node/pools.yaml
//!   provider_timeout: 5s
//!   allow_degenerate_sharing: false
//!
//! shim:
//!   daemon_socket: unix:///var/lib/cni/ipam-node/daemon.sock
//!   call_timeout: 5s
//! ```
//!
//! ## Error Handling
//!
//! Engine components return typed errors built with `thiserror`; the service
//! folds them into [`error::IpamError`], which carries a stable
//! [`error::ErrorCode`]. Loaders and the binary use `color_eyre` for error
//! reports with context.

pub mod config;
pub mod config_loader;
pub mod error;
pub mod ip;
pub mod pool;
pub mod service;
pub mod store;
pub mod utils;
