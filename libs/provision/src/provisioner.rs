//! The provisioning orchestration facade.
//!
//! Each lifecycle call builds one operation context and runs one fixed,
//! compensable action sequence. Calls execute synchronously to completion
//! on the calling task; the provisioner never retries internally. Retry
//! and backoff, if desired, belong to the caller.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use carton_events::{data_keys, Event, EventAction, EventSink, EventType, Multi};
use tracing::{error, info};

use crate::actions::{
    AddRoute, ChangeMachineState, CreateMachine, DeductConsumption, DestroyMachine, DestroyRoute,
    FollowLogs, RestartMachine, StartMachine, StopMachine, UpdateStatus,
};
use crate::boxes::{BoxSpec, Repo};
use crate::bus::MessageBus;
use crate::cluster::Cluster;
use crate::compute::UsageRecord;
use crate::error::ProvisionError;
use crate::machine::{Machine, MachineEnv, PollConfig};
use crate::metadata::MetadataStore;
use crate::pipeline::{Action, Pipeline};
use crate::progress::Progress;
use crate::router::RouterRegistry;
use crate::status::Status;

/// Per-invocation argument bundle shared by the steps of one pipeline
/// execution. Owned exclusively by that execution; steps observe each
/// other's writes in program order.
pub struct OpContext {
    pub box_spec: BoxSpec,
    pub image_id: String,
    pub progress: Arc<dyn Progress>,
    pub is_deploy: bool,
    pub target_status: Status,
    pub provisioner: Arc<ClusterProvisioner>,

    /// Set by `create-machine`; later steps reuse it for VM state.
    pub machine: Option<Machine>,
}

/// Provisioner interface: one implementation is selected by name from the
/// registry at composition time.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Human-readable readiness line for the daemon's startup message.
    fn startup_message(&self) -> String;

    /// Deploy from a repository: derives the image, then runs the deploy
    /// pipeline. Returns the image id on success.
    async fn git_deploy(
        self: Arc<Self>,
        spec: &BoxSpec,
        w: Arc<dyn Progress>,
    ) -> Result<String, ProvisionError>;

    /// Deploy a prebuilt image. An unusable image id falls back to the
    /// derived build image before the pipeline runs.
    async fn image_deploy(
        self: Arc<Self>,
        spec: &BoxSpec,
        image_id: &str,
        w: Arc<dyn Progress>,
    ) -> Result<String, ProvisionError>;

    async fn destroy(
        self: Arc<Self>,
        spec: &BoxSpec,
        w: Arc<dyn Progress>,
    ) -> Result<(), ProvisionError>;

    async fn set_state(
        self: Arc<Self>,
        spec: &BoxSpec,
        w: Arc<dyn Progress>,
        changeto: Status,
    ) -> Result<(), ProvisionError>;

    async fn start(
        self: Arc<Self>,
        spec: &BoxSpec,
        w: Arc<dyn Progress>,
    ) -> Result<(), ProvisionError>;

    async fn stop(
        self: Arc<Self>,
        spec: &BoxSpec,
        w: Arc<dyn Progress>,
    ) -> Result<(), ProvisionError>;

    async fn restart(
        self: Arc<Self>,
        spec: &BoxSpec,
        w: Arc<dyn Progress>,
    ) -> Result<(), ProvisionError>;

    async fn set_box_status(
        self: Arc<Self>,
        spec: &BoxSpec,
        w: Arc<dyn Progress>,
        status: Status,
    ) -> Result<(), ProvisionError>;

    /// The advertised address for a box, resolved through its router.
    async fn addr(&self, spec: &BoxSpec) -> Result<String, ProvisionError>;

    async fn set_cname(&self, spec: &BoxSpec, cname: &str) -> Result<(), ProvisionError>;

    async fn unset_cname(&self, spec: &BoxSpec, cname: &str) -> Result<(), ProvisionError>;

    /// Usage records within a time window; empty means no usage.
    async fn usage(
        &self,
        start: i64,
        end: i64,
        w: Arc<dyn Progress>,
    ) -> Result<Vec<UsageRecord>, ProvisionError>;
}

impl std::fmt::Debug for dyn Provisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn Provisioner")
    }
}

/// Explicit name → provisioner registry, populated at startup. Replaces
/// registration through import-time side effects.
#[derive(Default)]
pub struct ProvisionerRegistry {
    provisioners: HashMap<String, Arc<dyn Provisioner>>,
}

impl ProvisionerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, provisioner: Arc<dyn Provisioner>) {
        self.provisioners.insert(name.into(), provisioner);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Provisioner>, ProvisionError> {
        self.provisioners
            .get(name)
            .cloned()
            .ok_or_else(|| ProvisionError::UnknownProvisioner(name.to_string()))
    }
}

/// Configuration for the cluster provisioner.
#[derive(Debug, Clone)]
pub struct ProvisionerConfig {
    /// Platform default image, used unless the box's repository is
    /// one-click.
    pub default_image: String,

    /// Per-image vCPU throttle factor.
    pub vcpu_throttle: String,

    pub poll: PollConfig,
}

/// The cluster-backed provisioner implementation.
///
/// The cluster is a required constructor argument, so an initialized
/// provisioner can never hold an empty one. Collaborators are injected
/// explicitly so tests can hand in fakes.
pub struct ClusterProvisioner {
    config: ProvisionerConfig,
    cluster: Cluster,
    metadata: Arc<dyn MetadataStore>,
    events: Arc<dyn EventSink>,
    bus: Arc<dyn MessageBus>,
    routers: Arc<RouterRegistry>,
}

impl ClusterProvisioner {
    pub fn new(
        config: ProvisionerConfig,
        cluster: Cluster,
        metadata: Arc<dyn MetadataStore>,
        events: Arc<dyn EventSink>,
        bus: Arc<dyn MessageBus>,
        routers: Arc<RouterRegistry>,
    ) -> Self {
        Self {
            config,
            cluster,
            metadata,
            events,
            bus,
            routers,
        }
    }

    pub fn vcpu_throttle(&self) -> &str {
        &self.config.vcpu_throttle
    }

    pub fn routers(&self) -> &RouterRegistry {
        &self.routers
    }

    /// Chooses between the platform default image and the repository's
    /// own: a one-click repository ships a ready-to-run image, everything
    /// else uses the platform default.
    pub fn build_image(&self, repo: &Repo) -> String {
        if repo.one_click {
            repo.image_url()
        } else {
            self.config.default_image.clone()
        }
    }

    fn is_valid_box_image(&self, image_id: &str) -> bool {
        !image_id.trim().is_empty()
    }

    fn op_context(
        self: &Arc<Self>,
        spec: &BoxSpec,
        image_id: String,
        w: Arc<dyn Progress>,
        is_deploy: bool,
        target_status: Status,
    ) -> OpContext {
        OpContext {
            box_spec: spec.clone(),
            image_id,
            progress: w,
            is_deploy,
            target_status,
            provisioner: self.clone(),
            machine: None,
        }
    }

    async fn deploy_pipeline(
        self: Arc<Self>,
        spec: &BoxSpec,
        image_id: String,
        w: Arc<dyn Progress>,
    ) -> Result<String, ProvisionError> {
        w.say(&format!(
            "--- deploy box ({}, image:{})",
            spec.full_name, image_id
        ));

        let actions: Vec<Arc<dyn Action<OpContext>>> = vec![
            Arc::new(UpdateStatus),
            Arc::new(CreateMachine),
            Arc::new(UpdateStatus),
            Arc::new(DeductConsumption),
            Arc::new(FollowLogs),
        ];
        let mut ctx = self.op_context(spec, image_id.clone(), w.clone(), true, Status::Launching);

        if let Err(err) = Pipeline::new(actions).execute(&mut ctx).await {
            w.say(&format!(
                "--- deploy box ({}, image:{}) failed: {err}",
                spec.full_name, image_id
            ));
            return Err(err);
        }
        w.say(&format!(
            "--- deploy box ({}, image:{}) OK",
            spec.full_name, image_id
        ));
        Ok(image_id)
    }

    async fn run_status_pipeline(
        self: Arc<Self>,
        op: &str,
        spec: &BoxSpec,
        w: Arc<dyn Progress>,
        effectful: Arc<dyn Action<OpContext>>,
        target_status: Status,
    ) -> Result<(), ProvisionError> {
        w.say(&format!("--- {op} box ({})", spec.full_name));

        let actions: Vec<Arc<dyn Action<OpContext>>> =
            vec![Arc::new(UpdateStatus), effectful, Arc::new(UpdateStatus)];
        let mut ctx = self.op_context(spec, String::new(), w.clone(), false, target_status);

        if let Err(err) = Pipeline::new(actions).execute(&mut ctx).await {
            w.say(&format!("--- {op} box ({}) failed: {err}", spec.full_name));
            return Err(err);
        }
        w.say(&format!("--- {op} box ({}) OK", spec.full_name));
        Ok(())
    }

    /// Fires the done-notification event after a successful destroy or
    /// state change. Distinct from the per-step status writes.
    async fn done_notify(
        &self,
        spec: &BoxSpec,
        w: &dyn Progress,
        action: EventAction,
    ) -> Result<(), ProvisionError> {
        w.say(&format!("--- done box ({})", spec.full_name));

        let mut data = BTreeMap::new();
        data.insert(data_keys::BOX_NAME.to_string(), spec.full_name.clone());
        data.insert(data_keys::BOX_KIND.to_string(), spec.kind.clone());

        Multi::new(vec![Event::new(
            spec.account_id.clone(),
            action,
            EventType::User,
            data,
        )])
        .write(self.events.as_ref())
        .await?;

        w.say(&format!("--- done box ({}) OK", spec.full_name));
        Ok(())
    }
}

impl MachineEnv for ClusterProvisioner {
    fn cluster(&self) -> &Cluster {
        &self.cluster
    }

    fn metadata(&self) -> &dyn MetadataStore {
        self.metadata.as_ref()
    }

    fn event_sink(&self) -> &dyn EventSink {
        self.events.as_ref()
    }

    fn bus(&self) -> &dyn MessageBus {
        self.bus.as_ref()
    }

    fn poll(&self) -> PollConfig {
        self.config.poll
    }
}

#[async_trait]
impl Provisioner for ClusterProvisioner {
    fn startup_message(&self) -> String {
        format!("  > cluster {} ready", self.cluster.node_for().address)
    }

    async fn git_deploy(
        self: Arc<Self>,
        spec: &BoxSpec,
        w: Arc<dyn Progress>,
    ) -> Result<String, ProvisionError> {
        w.say(&format!(
            "--- git deploy for box (git:{})",
            spec.repo.source
        ));
        let image_id = self.build_image(&spec.repo);
        self.deploy_pipeline(spec, image_id, w).await
    }

    async fn image_deploy(
        self: Arc<Self>,
        spec: &BoxSpec,
        image_id: &str,
        w: Arc<dyn Progress>,
    ) -> Result<String, ProvisionError> {
        w.say(&format!(
            "--- image deploy for box ({}, image:{image_id})",
            spec.full_name
        ));
        let image_id = if self.is_valid_box_image(image_id) {
            image_id.to_string()
        } else {
            self.build_image(&spec.repo)
        };
        self.deploy_pipeline(spec, image_id, w).await
    }

    async fn destroy(
        self: Arc<Self>,
        spec: &BoxSpec,
        w: Arc<dyn Progress>,
    ) -> Result<(), ProvisionError> {
        w.say(&format!("--- destroying box ({})", spec.full_name));

        let actions: Vec<Arc<dyn Action<OpContext>>> = vec![
            // Status is written once, before the destructive step: the
            // record itself is being torn down, and the DESTROYED
            // done-event is the terminal observable.
            Arc::new(UpdateStatus),
            Arc::new(DestroyMachine),
            Arc::new(DestroyRoute),
        ];
        let mut ctx = self.op_context(spec, String::new(), w.clone(), false, Status::Destroying);

        if let Err(err) = Pipeline::new(actions).execute(&mut ctx).await {
            w.say(&format!(
                "--- destroying box ({}) failed: {err}",
                spec.full_name
            ));
            return Err(err);
        }
        w.say(&format!("--- destroying box ({}) OK", spec.full_name));

        self.done_notify(spec, w.as_ref(), EventAction::Destroyed)
            .await
    }

    async fn set_state(
        self: Arc<Self>,
        spec: &BoxSpec,
        w: Arc<dyn Progress>,
        changeto: Status,
    ) -> Result<(), ProvisionError> {
        w.say(&format!(
            "--- state to {changeto} for box ({})",
            spec.full_name
        ));

        let actions: Vec<Arc<dyn Action<OpContext>>> =
            vec![Arc::new(ChangeMachineState), Arc::new(AddRoute)];
        let mut ctx = self.op_context(spec, String::new(), w.clone(), false, changeto);

        if let Err(err) = Pipeline::new(actions).execute(&mut ctx).await {
            w.say(&format!(
                "--- state to {changeto} for box ({}) failed: {err}",
                spec.full_name
            ));
            return Err(err);
        }
        w.say(&format!(
            "--- state to {changeto} for box ({}) OK",
            spec.full_name
        ));

        self.done_notify(spec, w.as_ref(), EventAction::Launched)
            .await
    }

    async fn start(
        self: Arc<Self>,
        spec: &BoxSpec,
        w: Arc<dyn Progress>,
    ) -> Result<(), ProvisionError> {
        self.run_status_pipeline("starting", spec, w, Arc::new(StartMachine), Status::Starting)
            .await
    }

    async fn stop(
        self: Arc<Self>,
        spec: &BoxSpec,
        w: Arc<dyn Progress>,
    ) -> Result<(), ProvisionError> {
        self.run_status_pipeline("stopping", spec, w, Arc::new(StopMachine), Status::Stopping)
            .await
    }

    async fn restart(
        self: Arc<Self>,
        spec: &BoxSpec,
        w: Arc<dyn Progress>,
    ) -> Result<(), ProvisionError> {
        self.run_status_pipeline(
            "restarting",
            spec,
            w,
            Arc::new(RestartMachine),
            Status::Bootstrapped,
        )
        .await
    }

    async fn set_box_status(
        self: Arc<Self>,
        spec: &BoxSpec,
        w: Arc<dyn Progress>,
        status: Status,
    ) -> Result<(), ProvisionError> {
        w.say(&format!("--- status {status} box ({})", spec.full_name));

        let actions: Vec<Arc<dyn Action<OpContext>>> = vec![Arc::new(UpdateStatus)];
        let mut ctx = self.op_context(spec, String::new(), w.clone(), false, status);

        if let Err(err) = Pipeline::new(actions).execute(&mut ctx).await {
            error!(name = %spec.full_name, error = %err, "status pipeline failed");
            w.say(&format!(
                "--- status {status} box ({}) failed: {err}",
                spec.full_name
            ));
            return Err(err);
        }
        w.say(&format!("--- status {status} box ({}) OK", spec.full_name));
        Ok(())
    }

    async fn addr(&self, spec: &BoxSpec) -> Result<String, ProvisionError> {
        let router = self.routers.get(&spec.router)?;
        let addr = router.addr(&spec.full_name).await.map_err(|err| {
            error!(name = %spec.full_name, error = %err, "failed to obtain box address");
            err
        })?;
        Ok(addr)
    }

    async fn set_cname(&self, spec: &BoxSpec, cname: &str) -> Result<(), ProvisionError> {
        let router = self.routers.get(&spec.router)?;
        router.set_cname(cname, &spec.full_name).await?;
        Ok(())
    }

    async fn unset_cname(&self, spec: &BoxSpec, cname: &str) -> Result<(), ProvisionError> {
        let router = self.routers.get(&spec.router)?;
        router.unset_cname(cname, &spec.full_name).await?;
        Ok(())
    }

    async fn usage(
        &self,
        start: i64,
        end: i64,
        w: Arc<dyn Progress>,
    ) -> Result<Vec<UsageRecord>, ProvisionError> {
        w.say(&format!("--- pull usage for the window ({start}, {end})"));
        let records = self.cluster.showback(start, end).await.map_err(|err| {
            w.say(&format!(
                "--- pull usage for the window ({start}, {end}) failed: {err}"
            ));
            err
        })?;
        info!(count = records.len(), "usage records pulled");
        w.say(&format!(
            "--- pull usage for the window ({start}, {end}) OK"
        ));
        Ok(records)
    }
}
