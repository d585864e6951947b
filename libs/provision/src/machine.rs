//! Machine: the in-memory handle for one VM.
//!
//! A machine is created fresh per lifecycle operation from a box; durable
//! state lives in the external metadata store, addressed by assembly id.
//! The machine issues cluster operations, polls for the network endpoint,
//! writes results back to the metadata store, emits billing events, and
//! publishes state-change notifications.

use std::collections::BTreeMap;
use std::time::Duration;

use carton_events::{
    data_keys, Event, EventAction, EventType, Multi, CONSUMED_UNIT, EventSink,
};
use carton_id::{AccountId, AssemblyId, ComponentId, VmId};
use chrono::Utc;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::boxes::{BoxLevel, BoxSpec};
use crate::bus::{BusError, MessageBus, StateRequest};
use crate::cluster::Cluster;
use crate::compute::{context_keys, ComputeError, LifecycleAction, VmSpec};
use crate::metadata::{output_keys, Assembly, Component, MetadataError, MetadataStore, Notify};
use crate::progress::Progress;
use crate::status::Status;

/// Errors from machine operations.
#[derive(Debug, Error)]
pub enum MachineError {
    /// The configured vCPU throttle factor is zero, negative, or not a
    /// number. Rejected before any compute call is made.
    #[error("invalid vcpu throttle factor '{value}'")]
    BadThrottleFactor { value: String },

    /// The operation needs a VM id but the machine was never created.
    #[error("machine '{name}' has no VM id")]
    NoVmId { name: String },

    /// `create` was called on a handle that already owns a VM id.
    #[error("machine '{name}' already created as VM {vm_id}")]
    AlreadyCreated { name: String, vm_id: VmId },

    /// The box is an assembly member but carries no component id.
    #[error("assembly member '{name}' has no component id")]
    MissingComponentId { name: String },

    /// The VM exists in the compute cluster but could not be recorded in
    /// the metadata store. Operators must reconcile the orphan; do not
    /// collapse this into a plain create failure.
    #[error("VM {vm_id} created but not recorded: {source}")]
    Orphaned {
        vm_id: VmId,
        #[source]
        source: MetadataError,
    },

    /// The network endpoint was still unassigned when the polling deadline
    /// elapsed. Not an error before the deadline.
    #[error("network endpoint not ready after {waited:?}")]
    EndpointNotReady { waited: Duration },

    #[error(transparent)]
    Compute(#[from] ComputeError),

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Events(#[from] carton_events::EventError),

    #[error("payload serialization: {0}")]
    Serialization(String),
}

/// Interval and deadline for the network-endpoint polling loop.
#[derive(Debug, Clone, Copy)]
pub struct PollConfig {
    pub interval: Duration,
    pub deadline: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            deadline: Duration::from_secs(25),
        }
    }
}

/// Capability surface a machine needs from its owning provisioner.
pub trait MachineEnv: Send + Sync {
    fn cluster(&self) -> &Cluster;
    fn metadata(&self) -> &dyn MetadataStore;
    fn event_sink(&self) -> &dyn EventSink;
    fn bus(&self) -> &dyn MessageBus;
    fn poll(&self) -> PollConfig;
}

/// One VM instance bound to exactly one box.
#[derive(Debug, Clone)]
pub struct Machine {
    /// VM name; also the bus topic for state changes.
    pub name: String,

    /// Set when the box is a member of a multi-component assembly.
    pub component_id: Option<ComponentId>,

    pub assembly_id: AssemblyId,
    pub assemblies_id: String,
    pub account_id: AccountId,
    pub level: BoxLevel,

    /// Image reference resolved by the provisioner.
    pub image: String,

    /// Per-image throttle factor dividing the logical CPU share into the
    /// cluster's native vCPU count. Validated at create time.
    pub vcpu_throttle: String,

    /// Cluster-assigned id; `None` until `create` succeeds, immutable
    /// afterwards.
    pub vm_id: Option<VmId>,

    pub vnc_host: Option<String>,
    pub vnc_port: Option<String>,

    /// Pure function of the last-observed IP string.
    pub routable: bool,

    pub status: Status,
}

impl Machine {
    /// Builds a fresh machine handle for one operation on a box.
    pub fn from_box(spec: &BoxSpec, image: String, vcpu_throttle: String, status: Status) -> Self {
        Self {
            name: spec.full_name.clone(),
            component_id: spec.component_id.clone(),
            assembly_id: spec.assembly_id.clone(),
            assemblies_id: spec.assemblies_id.clone(),
            account_id: spec.account_id.clone(),
            level: spec.level,
            image,
            vcpu_throttle,
            vm_id: None,
            vnc_host: None,
            vnc_port: None,
            routable: false,
            status,
        }
    }

    /// The effective vCPU value sent to the compute API:
    /// `share / throttle`, fixed six-decimal precision. A zero, negative,
    /// or non-numeric throttle factor is a configuration error rejected
    /// here, before any external call.
    pub fn effective_vcpu(cpushare: u32, throttle: &str) -> Result<String, MachineError> {
        let factor: f64 = throttle.trim().parse().map_err(|_| {
            MachineError::BadThrottleFactor {
                value: throttle.to_string(),
            }
        })?;
        if !factor.is_finite() || factor <= 0.0 {
            return Err(MachineError::BadThrottleFactor {
                value: throttle.to_string(),
            });
        }
        Ok(format!("{:.6}", f64::from(cpushare) / factor))
    }

    /// Submits the compute-create request and records the returned VM id
    /// in the metadata store, keyed by assembly id. The VM id is immutable
    /// once set; a second create on the same handle is rejected.
    ///
    /// A create failure aborts without writing partial state. A metadata
    /// failure after a successful create is reported as
    /// [`MachineError::Orphaned`] so operators can reconcile the VM that
    /// now exists but is unrecorded.
    pub async fn create(&mut self, spec: &BoxSpec, env: &dyn MachineEnv) -> Result<(), MachineError> {
        if let Some(vm_id) = &self.vm_id {
            return Err(MachineError::AlreadyCreated {
                name: self.name.clone(),
                vm_id: vm_id.clone(),
            });
        }
        info!(name = %self.name, image = %self.image, "creating machine");

        let cpu = Self::effective_vcpu(spec.compute.cpushare, &self.vcpu_throttle)?;

        let mut context = BTreeMap::new();
        context.insert(
            context_keys::ASSEMBLY_ID.to_string(),
            self.assembly_id.as_str().to_string(),
        );
        context.insert(
            context_keys::ASSEMBLIES_ID.to_string(),
            self.assemblies_id.clone(),
        );

        let vm_spec = VmSpec {
            name: self.name.clone(),
            image: self.image.clone(),
            cpu,
            memory: spec.compute.memory_mb.to_string(),
            disk: spec.compute.disk_mb.to_string(),
            context,
        };

        let vm_id = env.cluster().create_vm(&vm_spec).await?;
        self.vm_id = Some(vm_id.clone());

        let mut outputs = BTreeMap::new();
        outputs.insert(
            output_keys::VM_ID.to_string(),
            vec![vm_id.as_str().to_string()],
        );
        Assembly::new(self.assembly_id.clone(), env.metadata())
            .nuke_and_set_outputs(outputs)
            .await
            .map_err(|source| MachineError::Orphaned {
                vm_id: vm_id.clone(),
                source,
            })?;

        info!(name = %self.name, vm_id = %vm_id, "machine created and recorded");
        Ok(())
    }

    /// Polls the cluster until the VM's network endpoint is assigned or
    /// the deadline elapses.
    ///
    /// Single timer-driven loop: one poll per interval tick, bounded by
    /// the configured deadline, cancellable by dropping the future. On
    /// expiry this returns the distinct
    /// [`MachineError::EndpointNotReady`] so the orchestration layer can
    /// decide whether the box failed or stays launching for a later retry.
    pub async fn resolve_network_endpoint(
        &mut self,
        env: &dyn MachineEnv,
    ) -> Result<(), MachineError> {
        let vm_id = self.vm_id.clone().ok_or_else(|| MachineError::NoVmId {
            name: self.name.clone(),
        })?;

        let cfg = env.poll();
        let start = Instant::now();
        let mut ticker = tokio::time::interval(cfg.interval);

        loop {
            ticker.tick().await;

            let (host, port) = env.cluster().ip_port(&vm_id).await?;
            if !host.trim().is_empty() && !port.trim().is_empty() {
                debug!(name = %self.name, host = %host, port = %port, "endpoint assigned");
                self.set_routable(&host);
                self.vnc_host = Some(host);
                self.vnc_port = Some(port);
                return Ok(());
            }

            let waited = start.elapsed();
            if waited >= cfg.deadline {
                return Err(MachineError::EndpointNotReady { waited });
            }
        }
    }

    /// Records the resolved VNC host as an assembly output. Idempotent and
    /// safe to retry independently of the port write.
    pub async fn update_vnc_host(&self, env: &dyn MachineEnv) -> Result<(), MachineError> {
        let Some(host) = self.vnc_host.clone() else {
            debug!(name = %self.name, "no vnc host resolved, skipping write");
            return Ok(());
        };
        let mut outputs = BTreeMap::new();
        outputs.insert(output_keys::VNC_HOST.to_string(), vec![host]);
        Assembly::new(self.assembly_id.clone(), env.metadata())
            .nuke_and_set_outputs(outputs)
            .await?;
        Ok(())
    }

    /// Records the resolved VNC port as an assembly output.
    pub async fn update_vnc_port(&self, env: &dyn MachineEnv) -> Result<(), MachineError> {
        let Some(port) = self.vnc_port.clone() else {
            debug!(name = %self.name, "no vnc port resolved, skipping write");
            return Ok(());
        };
        let mut outputs = BTreeMap::new();
        outputs.insert(output_keys::VNC_PORT.to_string(), vec![port]);
        Assembly::new(self.assembly_id.clone(), env.metadata())
            .nuke_and_set_outputs(outputs)
            .await?;
        Ok(())
    }

    /// Destroys the VM. No compensating metadata write; destruction is
    /// terminal.
    pub async fn remove(&self, env: &dyn MachineEnv) -> Result<(), MachineError> {
        debug!(name = %self.name, "removing machine");
        env.cluster().destroy_vm(&self.name).await?;
        Ok(())
    }

    /// Emits the billing pair: one deduct and one transaction event
    /// sharing a single metric snapshot, written atomically.
    pub async fn deduct(&self, env: &dyn MachineEnv) -> Result<(), MachineError> {
        let now = Utc::now().to_rfc3339();
        let mut metrics = BTreeMap::new();
        metrics.insert(
            data_keys::ACCOUNT_ID.to_string(),
            self.account_id.as_str().to_string(),
        );
        metrics.insert(
            data_keys::ASSEMBLY_ID.to_string(),
            self.assembly_id.as_str().to_string(),
        );
        metrics.insert(data_keys::ASSEMBLY_NAME.to_string(), self.name.clone());
        metrics.insert(data_keys::CONSUMED.to_string(), CONSUMED_UNIT.to_string());
        metrics.insert(data_keys::START_TIME.to_string(), now.clone());
        metrics.insert(data_keys::END_TIME.to_string(), now);

        let multi = Multi::new(vec![
            Event::new(
                self.account_id.clone(),
                EventAction::Deduct,
                EventType::Bill,
                metrics.clone(),
            ),
            Event::new(
                self.account_id.clone(),
                EventAction::Transaction,
                EventType::Bill,
                metrics,
            ),
        ]);
        multi.write(env.event_sink()).await?;
        Ok(())
    }

    /// Forwards a named lifecycle action to the cluster.
    pub async fn lifecycle(
        &self,
        env: &dyn MachineEnv,
        action: LifecycleAction,
    ) -> Result<(), MachineError> {
        debug!(name = %self.name, action = %action, "machine lifecycle action");
        env.cluster().vm_action(&self.name, action).await?;
        Ok(())
    }

    /// Writes the status to the owning assembly record, and, only for a
    /// member of a multi-component assembly, to the owning component's
    /// record as well. A standalone box's status and its sole component's
    /// status are the same value and must not be written twice.
    pub async fn set_status(
        &self,
        env: &dyn MachineEnv,
        status: Status,
    ) -> Result<(), MachineError> {
        debug!(name = %self.name, status = %status, "set machine status");

        Assembly::new(self.assembly_id.clone(), env.metadata())
            .apply_status(status)
            .await?;

        if self.level == BoxLevel::AssemblyMember {
            let component_id =
                self.component_id
                    .clone()
                    .ok_or_else(|| MachineError::MissingComponentId {
                        name: self.name.clone(),
                    })?;
            Component::new(component_id, env.metadata())
                .apply_status(status)
                .await?;
        }
        Ok(())
    }

    /// Publishes a state-change request on the bus, keyed by the machine
    /// name. The connection is acquired, used for exactly one publish, and
    /// released inside the bus implementation; publish failure is
    /// surfaced.
    pub async fn publish_state_change(
        &self,
        env: &dyn MachineEnv,
        status: Status,
    ) -> Result<(), MachineError> {
        let request = StateRequest::new(self.assembly_id.clone(), status.as_str());
        let payload =
            serde_json::to_vec(&request).map_err(|e| MachineError::Serialization(e.to_string()))?;

        debug!(name = %self.name, status = %status, "publishing state change");
        env.bus().publish(&self.name, &payload).await?;
        Ok(())
    }

    /// Routability is a pure function of the last-observed IP string.
    pub fn set_routable(&mut self, ip: &str) {
        self.routable = !ip.trim().is_empty();
    }

    /// Placeholder until remote log streaming lands; narrates and returns.
    pub fn logs(&self, progress: &dyn Progress) -> Result<(), MachineError> {
        progress.say(&format!("--- logs for machine ({}) pending", self.name));
        Ok(())
    }

    /// Placeholder for remote command execution.
    pub fn run_command(&self, _cmd: &str, _args: &[String]) -> Result<(), MachineError> {
        warn!(name = %self.name, "remote exec not implemented");
        Ok(())
    }
}
