//! Configuration for the provisioning daemon.

use std::time::Duration;

use anyhow::Result;
use carton_provision::PollConfig;

/// Provisioning daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Compute cluster RPC endpoint.
    pub cluster_endpoint: String,

    /// Platform default image, used unless a box's repository is one-click.
    pub default_image: String,

    /// Per-image vCPU throttle factor. Validated at machine-create time.
    pub vcpu_throttle: String,

    /// VM template name on the compute cluster.
    pub vm_template: String,

    /// Availability zone tag for the cluster node.
    pub zone: String,

    /// Message bus broker endpoints.
    pub bus_endpoints: Vec<String>,

    /// Network-endpoint polling knobs.
    pub poll: PollConfig,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let cluster_endpoint = std::env::var("CARTON_CLUSTER_ENDPOINT")
            .unwrap_or_else(|_| "http://localhost:2633/RPC2".to_string());

        let default_image = std::env::var("CARTON_DEFAULT_IMAGE")
            .unwrap_or_else(|_| "megam-ubuntu-24.04".to_string());

        let vcpu_throttle =
            std::env::var("CARTON_VCPU_THROTTLE").unwrap_or_else(|_| "4".to_string());

        let vm_template =
            std::env::var("CARTON_VM_TEMPLATE").unwrap_or_else(|_| "megam".to_string());

        let zone = std::env::var("CARTON_ZONE").unwrap_or_else(|_| "zone-1".to_string());

        let bus_endpoints = std::env::var("CARTON_BUS_ENDPOINTS")
            .unwrap_or_else(|_| "localhost:4150".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let poll_interval_ms = std::env::var("CARTON_POLL_INTERVAL_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(500);

        let poll_deadline_secs = std::env::var("CARTON_POLL_DEADLINE_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(25);

        let log_level = std::env::var("CARTON_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            cluster_endpoint,
            default_image,
            vcpu_throttle,
            vm_template,
            zone,
            bus_endpoints,
            poll: PollConfig {
                interval: Duration::from_millis(poll_interval_ms),
                deadline: Duration::from_secs(poll_deadline_secs),
            },
            log_level,
        })
    }
}
