//! carton Provisioning Daemon
//!
//! The provisioning daemon drives box lifecycle against a compute cluster.
//! It composes the cluster client, metadata store, billing event sink,
//! message bus, and router registry into a provisioner, registers it by
//! name, and serves lifecycle requests until shutdown.
//!
//! ## Architecture
//!
//! - **Cluster**: the compute-node set and its API client
//! - **Provisioner**: per-operation compensable action pipelines
//! - **Registry**: explicit name → provisioner lookup, populated here

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use carton_events::MemorySink;
use carton_provision::bus::{BusConfig, MemoryBus};
use carton_provision::compute::MockCompute;
use carton_provision::cluster::node_keys;
use carton_provision::metadata::MemoryStore;
use carton_provision::router::{MemoryRouter, RouterRegistry};
use carton_provision::{
    Cluster, ClusterProvisioner, Node, Provisioner, ProvisionerConfig, ProvisionerRegistry,
};

mod config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting carton provisioning daemon");

    // Load configuration
    let config = config::Config::from_env()?;
    info!(
        cluster_endpoint = %config.cluster_endpoint,
        default_image = %config.default_image,
        vcpu_throttle = %config.vcpu_throttle,
        "Configuration loaded"
    );

    let bus_config = BusConfig {
        endpoints: config.bus_endpoints.clone(),
    };
    info!(endpoints = ?bus_config.endpoints, "Bus configured");
    let bus = Arc::new(MemoryBus::new(bus_config));

    // Compute client and single-node cluster (mock client for now)
    let compute = Arc::new(MockCompute::new());
    let mut node_metadata = BTreeMap::new();
    node_metadata.insert(
        node_keys::ENDPOINT.to_string(),
        config.cluster_endpoint.clone(),
    );
    node_metadata.insert(node_keys::TEMPLATE.to_string(), config.vm_template.clone());
    node_metadata.insert(node_keys::ZONE.to_string(), config.zone.clone());
    let cluster = Cluster::new(
        compute,
        vec![Node::new(config.cluster_endpoint.clone(), node_metadata)],
    )?;

    // Collaborators (in-memory for now)
    let metadata = Arc::new(MemoryStore::new());
    let events = Arc::new(MemorySink::new());

    let mut routers = RouterRegistry::new();
    routers.register("route53", Arc::new(MemoryRouter::new()));

    let provisioner = Arc::new(ClusterProvisioner::new(
        ProvisionerConfig {
            default_image: config.default_image.clone(),
            vcpu_throttle: config.vcpu_throttle.clone(),
            poll: config.poll,
        },
        cluster,
        metadata,
        events,
        bus,
        Arc::new(routers),
    ));

    info!("{}", provisioner.startup_message());

    let mut registry = ProvisionerRegistry::new();
    registry.register("cluster", provisioner);
    info!(provisioner = "cluster", "Provisioner registered");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");

    info!("Provisioning daemon shutdown complete");
    Ok(())
}
