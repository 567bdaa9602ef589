use crate::config::Config;
use crate::pool::{load_pool_definitions, StaticSnapshotProvider};
use crate::service::AllocationService;
use crate::store::AllocationStore;
use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use log::info;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

/// Load and parse configuration from a YAML file
pub fn load_config(config_path: &Path) -> Result<Config> {
    info!("Loading configuration from: {:?}", config_path);

    let file = File::open(config_path)
        .wrap_err_with(|| format!("Failed to open configuration '{}'", config_path.display()))?;

    let config: Config = serde_yaml::from_reader(file)
        .wrap_err_with(|| format!("Failed to parse configuration '{}'", config_path.display()))?;

    config.validate()?;

    info!("Configuration loaded for node {}", config.node.name);
    Ok(config)
}

/// Build the pool snapshot provider for this node from the configured
/// definitions file
pub fn load_provider(config: &Config) -> Result<StaticSnapshotProvider> {
    let definitions = load_pool_definitions(&config.pools.definitions)?;
    let provider = StaticSnapshotProvider::from_definitions(&definitions, &config.node.name);
    info!(
        "Node {} has {} pools assigned",
        config.node.name,
        provider.snapshots().len()
    );
    Ok(provider)
}

/// Bring up the allocation service: load the store, load the pool
/// assignments, and drop allocations of pools this node no longer has.
pub fn start_service(config: &Config) -> Result<AllocationService> {
    let store = AllocationStore::open(&config.store.path)
        .wrap_err_with(|| format!("Failed to open allocation store '{}'", config.store.path.display()))?;
    let provider = load_provider(config)?;

    let service = AllocationService::new(
        Arc::new(store),
        Arc::new(provider),
        config.service_options(),
    );
    service.reconcile().wrap_err("Failed to reconcile allocation store")?;

    Ok(service)
}
