//! Cluster: the set of compute nodes a provisioner can target.
//!
//! Single-node today; `node_for` is the selection point future multi-node
//! placement will grow behind without changing call sites. All operations
//! are single-attempt passthroughs to the compute API. Retry policy
//! belongs to callers, because only they know the acceptable staleness
//! window.

use std::collections::BTreeMap;
use std::sync::Arc;

use carton_id::VmId;
use thiserror::Error;
use tracing::debug;

use crate::compute::{ComputeApi, ComputeError, LifecycleAction, UsageRecord, VmSpec};

/// Errors from cluster construction. Operating on an uninitialized cluster
/// is a programming error, so the constructor refuses to build one.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClusterError {
    #[error("cluster has no registered nodes")]
    NoNodes,
}

/// Keys commonly present in a node's metadata map.
pub mod node_keys {
    pub const ENDPOINT: &str = "endpoint";
    pub const TEMPLATE: &str = "template";
    pub const ZONE: &str = "zone";
    pub const IMAGE: &str = "image";
}

/// One compute node: an endpoint address plus opaque metadata
/// (credentials, template, zone).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub address: String,
    pub metadata: BTreeMap<String, String>,
}

impl Node {
    pub fn new(address: impl Into<String>, metadata: BTreeMap<String, String>) -> Self {
        Self {
            address: address.into(),
            metadata,
        }
    }
}

/// An ordered, non-empty set of compute nodes sharing one API client.
///
/// Configured once at provisioner initialization and read-only afterwards;
/// concurrent lifecycle calls share it freely.
pub struct Cluster {
    nodes: Vec<Node>,
    client: Arc<dyn ComputeApi>,
}

impl std::fmt::Debug for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cluster")
            .field("nodes", &self.nodes)
            .finish_non_exhaustive()
    }
}

impl Cluster {
    /// Builds a cluster over a non-empty node set.
    pub fn new(client: Arc<dyn ComputeApi>, nodes: Vec<Node>) -> Result<Self, ClusterError> {
        if nodes.is_empty() {
            return Err(ClusterError::NoNodes);
        }
        Ok(Self { nodes, client })
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// The node responsible for an operation. Single-node registration
    /// today, so the first node handles everything.
    pub fn node_for(&self) -> &Node {
        &self.nodes[0]
    }

    pub async fn create_vm(&self, spec: &VmSpec) -> Result<VmId, ComputeError> {
        debug!(node = %self.node_for().address, name = %spec.name, "cluster create vm");
        self.client.create_vm(spec).await
    }

    pub async fn destroy_vm(&self, name: &str) -> Result<(), ComputeError> {
        debug!(node = %self.node_for().address, name = %name, "cluster destroy vm");
        self.client.destroy_vm(name).await
    }

    /// Forward a named lifecycle action. "Not found" is surfaced to the
    /// caller, which decides whether already-gone is acceptable.
    pub async fn vm_action(&self, name: &str, action: LifecycleAction) -> Result<(), ComputeError> {
        debug!(node = %self.node_for().address, name = %name, action = %action, "cluster vm action");
        self.client.lifecycle_action(name, action).await
    }

    /// Current network endpoint for a VM. Empty host/port while the VM is
    /// still booting is not an error.
    pub async fn ip_port(&self, vm_id: &VmId) -> Result<(String, String), ComputeError> {
        self.client.network_endpoint(vm_id).await
    }

    /// Usage records bounded by a time window. Empty means no usage.
    pub async fn showback(&self, start: i64, end: i64) -> Result<Vec<UsageRecord>, ComputeError> {
        self.client.usage_report(start, end).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::MockCompute;

    fn one_node() -> Vec<Node> {
        vec![Node::new("http://localhost:2633/RPC2", BTreeMap::new())]
    }

    #[test]
    fn empty_cluster_is_refused() {
        let client = Arc::new(MockCompute::new());
        let err = Cluster::new(client, vec![]).unwrap_err();
        assert_eq!(err, ClusterError::NoNodes);
    }

    #[test]
    fn first_node_handles_operations() {
        let client = Arc::new(MockCompute::new());
        let nodes = vec![
            Node::new("http://a:2633", BTreeMap::new()),
            Node::new("http://b:2633", BTreeMap::new()),
        ];
        let cluster = Cluster::new(client, nodes).unwrap();
        assert_eq!(cluster.node_for().address, "http://a:2633");
        assert_eq!(cluster.nodes().len(), 2);
    }

    #[tokio::test]
    async fn operations_pass_through() {
        let client = Arc::new(MockCompute::new());
        let cluster = Cluster::new(client.clone(), one_node()).unwrap();

        cluster.destroy_vm("blog.example.io").await.unwrap();
        cluster
            .vm_action("blog.example.io", LifecycleAction::Stop)
            .await
            .unwrap();

        assert_eq!(client.destroyed().await, vec!["blog.example.io"]);
        assert_eq!(
            client.actions().await,
            vec![("blog.example.io".to_string(), LifecycleAction::Stop)]
        );
    }
}
