use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use env_logger::Env;
use ipam_node::config_loader;
use ipam_node::ip::{RangeAllocator, SubnetAllocator};
use ipam_node::pool::{PoolKind, PoolType};
use ipam_node::service::{IpamParameters, RequestContext};
use ipam_node::store::AllocationMetadata;
use log::info;
use std::path::PathBuf;

/// Node-local IPAM allocation engine for container network interfaces
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the node configuration YAML file
    #[arg(short, long)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Allocate addresses for a container interface
    Allocate(RequestArgs),
    /// Release the addresses of a container interface
    Deallocate(RequestArgs),
    /// Show the existing allocations of a container interface
    IsAllocated(RequestArgs),
    /// Drop allocations of pools no longer assigned to this node
    Reconcile,
    /// List the pools assigned to this node
    Pools,
    /// Print the runtime shim configuration as JSON
    ShimConfig,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum PoolTypeArg {
    Ippool,
    Cidrpool,
}

impl From<PoolTypeArg> for PoolType {
    fn from(arg: PoolTypeArg) -> Self {
        match arg {
            PoolTypeArg::Ippool => PoolType::IpPool,
            PoolTypeArg::Cidrpool => PoolType::CidrPool,
        }
    }
}

#[derive(ClapArgs, Debug)]
struct RequestArgs {
    /// Pool to allocate from (repeat for several pools)
    #[arg(short, long = "pool", required = true)]
    pools: Vec<String>,

    /// Pool namespace
    #[arg(long, value_enum, default_value = "ippool")]
    pool_type: PoolTypeArg,

    /// Container ID
    #[arg(long)]
    container_id: String,

    /// Interface name inside the container
    #[arg(long, default_value = "eth0")]
    ifname: String,

    #[arg(long, default_value = "")]
    pod_name: String,

    #[arg(long, default_value = "")]
    pod_namespace: String,

    #[arg(long, default_value = "")]
    pod_uid: String,

    #[arg(long, default_value = "")]
    device_id: String,
}

impl RequestArgs {
    fn to_params(&self) -> IpamParameters {
        IpamParameters {
            pools: self.pools.clone(),
            pool_type: self.pool_type.into(),
            container_id: self.container_id.clone(),
            interface_name: self.ifname.clone(),
            metadata: AllocationMetadata {
                pod_name: self.pod_name.clone(),
                pod_namespace: self.pod_namespace.clone(),
                pod_uid: self.pod_uid.clone(),
                device_id: self.device_id.clone(),
            },
        }
    }
}

fn main() -> Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    // Parse command-line arguments
    let args = Args::parse();

    let config = config_loader::load_config(&args.config)?;

    // Initialize logging with the configured default filter
    env_logger::Builder::from_env(Env::default().default_filter_or(config.log_level())).init();

    info!("Starting ipam-node for node {}", config.node.name);

    match args.command {
        Command::ShimConfig => {
            let shim = serde_json::to_string_pretty(&config.shim_config())?;
            println!("{}", shim);
        }
        Command::Pools => {
            let provider = config_loader::load_provider(&config)?;
            for snapshot in provider.snapshots() {
                let (block, capacity) = match &snapshot.kind {
                    PoolKind::Range { start, end, .. } => {
                        (format!("{}-{}", start, end), RangeAllocator::capacity(&snapshot)?)
                    }
                    PoolKind::CidrSubdivision { prefix } => {
                        (prefix.to_string(), SubnetAllocator::capacity(&snapshot)?)
                    }
                };
                let gateway = snapshot.gateway.map(|gw| gw.to_string()).unwrap_or_else(|| "-".to_string());
                println!("{}\t{}\tgateway={}\tcapacity={}", snapshot.key(), block, gateway, capacity);
            }
        }
        Command::Reconcile => {
            // Starting the service already runs reconciliation.
            let service = config_loader::start_service(&config)?;
            println!("{} allocations kept", service.store().len());
        }
        Command::Allocate(request) => {
            let service = config_loader::start_service(&config)?;
            let ctx = RequestContext::with_timeout(config.shim.call_timeout);
            let allocations = service
                .allocate(&request.to_params(), &ctx)
                .wrap_err("Allocation failed")?;
            println!("{}", serde_json::to_string_pretty(&allocations)?);
        }
        Command::Deallocate(request) => {
            let service = config_loader::start_service(&config)?;
            service
                .deallocate(&request.to_params())
                .wrap_err("Deallocation failed")?;
            info!("Deallocated container {} interface {}", request.container_id, request.ifname);
        }
        Command::IsAllocated(request) => {
            let service = config_loader::start_service(&config)?;
            let allocations = service
                .is_allocated(&request.to_params())
                .wrap_err("Lookup failed")?;
            println!("{}", serde_json::to_string_pretty(&allocations)?);
        }
    }

    Ok(())
}
