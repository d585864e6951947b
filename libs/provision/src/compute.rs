//! Compute API client interface and mock implementation.
//!
//! The compute API is an external collaborator; this module owns only the
//! call surface the cluster needs: create, destroy, generic lifecycle
//! actions, network-endpoint lookup, and usage reporting. A mock
//! implementation is provided for tests and development.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;
use carton_id::VmId;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

/// Errors from the compute API.
#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("compute API error: {0}")]
    Api(String),

    #[error("VM not found: {0}")]
    NotFound(String),

    #[error("compute transport error: {0}")]
    Transport(String),
}

/// Keys tagged onto the VM's context map at create time.
pub mod context_keys {
    pub const ASSEMBLY_ID: &str = "assembly_id";
    pub const ASSEMBLIES_ID: &str = "assemblies_id";
}

/// A compute-create request. CPU, memory, and disk travel as formatted
/// strings because the cluster's native API is string-typed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmSpec {
    pub name: String,
    pub image: String,

    /// Effective vCPU value, fixed-precision decimal.
    pub cpu: String,

    /// Memory in megabytes.
    pub memory: String,

    /// Disk in megabytes.
    pub disk: String,

    /// Opaque tags (owning assembly ids) attached to the VM.
    pub context: BTreeMap<String, String>,
}

/// A generic lifecycle action forwarded to the compute API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleAction {
    Start,
    Stop,
    Restart,
    Reboot,
    Suspend,
    Resume,
}

impl LifecycleAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleAction::Start => "start",
            LifecycleAction::Stop => "stop",
            LifecycleAction::Restart => "restart",
            LifecycleAction::Reboot => "reboot",
            LifecycleAction::Suspend => "suspend",
            LifecycleAction::Resume => "resume",
        }
    }
}

impl std::fmt::Display for LifecycleAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of a usage/metering query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub vm_name: String,
    pub cpu_hours: f64,
    pub memory_mb_hours: f64,
    pub window_start: i64,
    pub window_end: i64,
}

/// Compute API client interface.
///
/// All calls are single attempts; retry policy belongs to callers. The
/// endpoint lookup may legitimately return empty host/port while the VM is
/// still booting.
#[async_trait]
pub trait ComputeApi: Send + Sync {
    /// Submit a create request; returns the cluster-assigned VM id.
    async fn create_vm(&self, spec: &VmSpec) -> Result<VmId, ComputeError>;

    /// Destroy a VM by name. "Not found" is an error; the caller decides
    /// whether already-gone is acceptable.
    async fn destroy_vm(&self, name: &str) -> Result<(), ComputeError>;

    /// Forward a lifecycle action (start/stop/restart/...) to a VM.
    async fn lifecycle_action(&self, name: &str, action: LifecycleAction)
        -> Result<(), ComputeError>;

    /// Current network endpoint of a VM; `("", "")` while booting.
    async fn network_endpoint(&self, vm_id: &VmId) -> Result<(String, String), ComputeError>;

    /// Usage records within a time window. Empty means "no usage".
    async fn usage_report(&self, start: i64, end: i64) -> Result<Vec<UsageRecord>, ComputeError>;
}

/// Mock compute API for tests and development.
pub struct MockCompute {
    /// Counter for assigning VM ids.
    next_vm: AtomicU64,

    /// Create requests received, in order.
    created: Mutex<Vec<VmSpec>>,

    /// VM names destroyed, in order.
    destroyed: Mutex<Vec<String>>,

    /// Lifecycle actions received as (name, action).
    actions: Mutex<Vec<(String, LifecycleAction)>>,

    /// Endpoint polls remaining before the endpoint reads as assigned.
    /// `u32::MAX` means the endpoint never becomes ready.
    endpoint_after: AtomicU32,

    endpoint: (String, String),

    fail_create: bool,
    fail_destroy: bool,
}

impl MockCompute {
    pub fn new() -> Self {
        Self {
            next_vm: AtomicU64::new(1000),
            created: Mutex::new(Vec::new()),
            destroyed: Mutex::new(Vec::new()),
            actions: Mutex::new(Vec::new()),
            endpoint_after: AtomicU32::new(0),
            endpoint: ("10.0.0.5".to_string(), "5900".to_string()),
            fail_create: false,
            fail_destroy: false,
        }
    }

    /// A compute API that rejects create requests.
    pub fn failing_create() -> Self {
        Self {
            fail_create: true,
            ..Self::new()
        }
    }

    /// A compute API that rejects destroy requests.
    pub fn failing_destroy() -> Self {
        Self {
            fail_destroy: true,
            ..Self::new()
        }
    }

    /// Report an empty endpoint for the first `polls` lookups.
    pub fn endpoint_ready_after(self, polls: u32) -> Self {
        self.endpoint_after.store(polls, Ordering::SeqCst);
        self
    }

    /// Never report an assigned endpoint.
    pub fn endpoint_never_ready(self) -> Self {
        self.endpoint_after.store(u32::MAX, Ordering::SeqCst);
        self
    }

    pub async fn created(&self) -> Vec<VmSpec> {
        self.created.lock().await.clone()
    }

    pub async fn destroyed(&self) -> Vec<String> {
        self.destroyed.lock().await.clone()
    }

    pub async fn actions(&self) -> Vec<(String, LifecycleAction)> {
        self.actions.lock().await.clone()
    }
}

impl Default for MockCompute {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ComputeApi for MockCompute {
    async fn create_vm(&self, spec: &VmSpec) -> Result<VmId, ComputeError> {
        if self.fail_create {
            return Err(ComputeError::Api("create rejected".to_string()));
        }
        let n = self.next_vm.fetch_add(1, Ordering::SeqCst);
        self.created.lock().await.push(spec.clone());
        let vm_id = VmId::parse(&n.to_string()).map_err(|e| ComputeError::Api(e.to_string()))?;
        debug!(name = %spec.name, vm_id = %vm_id, "[MOCK] VM created");
        Ok(vm_id)
    }

    async fn destroy_vm(&self, name: &str) -> Result<(), ComputeError> {
        if self.fail_destroy {
            return Err(ComputeError::Api("destroy rejected".to_string()));
        }
        self.destroyed.lock().await.push(name.to_string());
        debug!(name = %name, "[MOCK] VM destroyed");
        Ok(())
    }

    async fn lifecycle_action(
        &self,
        name: &str,
        action: LifecycleAction,
    ) -> Result<(), ComputeError> {
        self.actions.lock().await.push((name.to_string(), action));
        debug!(name = %name, action = %action, "[MOCK] lifecycle action");
        Ok(())
    }

    async fn network_endpoint(&self, _vm_id: &VmId) -> Result<(String, String), ComputeError> {
        let remaining = self.endpoint_after.load(Ordering::SeqCst);
        if remaining == 0 {
            return Ok(self.endpoint.clone());
        }
        if remaining != u32::MAX {
            self.endpoint_after.fetch_sub(1, Ordering::SeqCst);
        }
        Ok((String::new(), String::new()))
    }

    async fn usage_report(&self, start: i64, end: i64) -> Result<Vec<UsageRecord>, ComputeError> {
        let created = self.created.lock().await;
        Ok(created
            .iter()
            .map(|spec| UsageRecord {
                vm_name: spec.name.clone(),
                cpu_hours: 1.0,
                memory_mb_hours: 512.0,
                window_start: start,
                window_end: end,
            })
            .collect())
    }
}
