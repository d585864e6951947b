//! Named pipeline steps for the lifecycle operations.
//!
//! Each step mutates or reads the shared operation context and calls into
//! the machine or cluster. Compensations are best-effort cleanup: they log
//! failures but never mask the error that triggered the unwind.

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::compute::LifecycleAction;
use crate::error::ProvisionError;
use crate::machine::{Machine, MachineError};
use crate::pipeline::Action;
use crate::provisioner::OpContext;

/// The machine handle for a step: the one produced by `create-machine`
/// earlier in the pipeline, or a transient handle built from the box.
fn machine_for(ctx: &OpContext) -> Machine {
    ctx.machine.clone().unwrap_or_else(|| {
        Machine::from_box(
            &ctx.box_spec,
            ctx.image_id.clone(),
            ctx.provisioner.vcpu_throttle().to_string(),
            ctx.target_status,
        )
    })
}

/// Writes the context's target status to the metadata store. Runs before
/// and after every effectful step so observers never see a stale status
/// persist past the attempt boundary. Observational, so no compensation.
pub struct UpdateStatus;

#[async_trait]
impl Action<OpContext> for UpdateStatus {
    fn name(&self) -> &'static str {
        "update-status"
    }

    async fn forward(&self, ctx: &mut OpContext) -> Result<(), ProvisionError> {
        let p = ctx.provisioner.clone();
        machine_for(ctx).set_status(&*p, ctx.target_status).await?;
        Ok(())
    }
}

/// Creates the VM, records its id, and resolves the network endpoint.
///
/// An endpoint that is still unassigned at the polling deadline does not
/// fail the deploy: the box stays launching without VNC outputs and the
/// narrative records the condition for a later retry. The compensation
/// removes the VM created by this step.
pub struct CreateMachine;

#[async_trait]
impl Action<OpContext> for CreateMachine {
    fn name(&self) -> &'static str {
        "create-machine"
    }

    async fn forward(&self, ctx: &mut OpContext) -> Result<(), ProvisionError> {
        let p = ctx.provisioner.clone();
        let mut machine = machine_for(ctx);

        machine.create(&ctx.box_spec, &*p).await?;
        ctx.progress.say(&format!(
            "--- machine created ({}, vm:{})",
            machine.name,
            machine.vm_id.as_ref().map(|v| v.as_str()).unwrap_or("?"),
        ));

        match machine.resolve_network_endpoint(&*p).await {
            Ok(()) => {
                machine.update_vnc_host(&*p).await?;
                machine.update_vnc_port(&*p).await?;
            }
            Err(MachineError::EndpointNotReady { waited }) => {
                warn!(name = %machine.name, ?waited, "endpoint not ready, box stays launching");
                ctx.progress.say(&format!(
                    "--- endpoint for ({}) not ready after {:.0?}",
                    machine.name, waited,
                ));
            }
            Err(err) => return Err(err.into()),
        }

        ctx.machine = Some(machine);
        Ok(())
    }

    async fn backward(&self, ctx: &mut OpContext) {
        let p = ctx.provisioner.clone();
        if let Some(machine) = ctx.machine.take() {
            if let Err(err) = machine.remove(&*p).await {
                warn!(name = %machine.name, error = %err, "compensating VM removal failed");
            }
        }
    }
}

/// Emits the billing pair for the freshly deployed machine.
pub struct DeductConsumption;

#[async_trait]
impl Action<OpContext> for DeductConsumption {
    fn name(&self) -> &'static str {
        "deduct-consumption"
    }

    async fn forward(&self, ctx: &mut OpContext) -> Result<(), ProvisionError> {
        let p = ctx.provisioner.clone();
        machine_for(ctx).deduct(&*p).await?;
        Ok(())
    }
}

/// Narrates where the machine's logs will appear.
pub struct FollowLogs;

#[async_trait]
impl Action<OpContext> for FollowLogs {
    fn name(&self) -> &'static str {
        "follow-logs"
    }

    async fn forward(&self, ctx: &mut OpContext) -> Result<(), ProvisionError> {
        machine_for(ctx).logs(ctx.progress.as_ref())?;
        Ok(())
    }
}

/// Destroys the VM. Terminal, so no compensation.
pub struct DestroyMachine;

#[async_trait]
impl Action<OpContext> for DestroyMachine {
    fn name(&self) -> &'static str {
        "destroy-machine"
    }

    async fn forward(&self, ctx: &mut OpContext) -> Result<(), ProvisionError> {
        let p = ctx.provisioner.clone();
        machine_for(ctx).remove(&*p).await?;
        Ok(())
    }
}

/// Removes the box's routing entry after its VM is gone.
pub struct DestroyRoute;

#[async_trait]
impl Action<OpContext> for DestroyRoute {
    fn name(&self) -> &'static str {
        "destroy-route"
    }

    async fn forward(&self, ctx: &mut OpContext) -> Result<(), ProvisionError> {
        let router = ctx.provisioner.routers().get(&ctx.box_spec.router)?;
        router.remove_route(&ctx.box_spec.full_name).await?;
        debug!(name = %ctx.box_spec.full_name, "route removed");
        Ok(())
    }
}

/// Publishes the state-change request on the bus.
pub struct ChangeMachineState;

#[async_trait]
impl Action<OpContext> for ChangeMachineState {
    fn name(&self) -> &'static str {
        "change-machine-state"
    }

    async fn forward(&self, ctx: &mut OpContext) -> Result<(), ProvisionError> {
        let p = ctx.provisioner.clone();
        machine_for(ctx)
            .publish_state_change(&*p, ctx.target_status)
            .await?;
        Ok(())
    }
}

/// Registers the box's routing entry. Always the last step of its
/// sequence, so it carries no compensation.
pub struct AddRoute;

#[async_trait]
impl Action<OpContext> for AddRoute {
    fn name(&self) -> &'static str {
        "add-route"
    }

    async fn forward(&self, ctx: &mut OpContext) -> Result<(), ProvisionError> {
        let router = ctx.provisioner.routers().get(&ctx.box_spec.router)?;
        router.add_route(&ctx.box_spec.full_name).await?;
        debug!(name = %ctx.box_spec.full_name, "route added");
        Ok(())
    }
}

/// Forwards `start` to the VM.
pub struct StartMachine;

#[async_trait]
impl Action<OpContext> for StartMachine {
    fn name(&self) -> &'static str {
        "start-machine"
    }

    async fn forward(&self, ctx: &mut OpContext) -> Result<(), ProvisionError> {
        let p = ctx.provisioner.clone();
        machine_for(ctx).lifecycle(&*p, LifecycleAction::Start).await?;
        Ok(())
    }
}

/// Forwards `stop` to the VM.
pub struct StopMachine;

#[async_trait]
impl Action<OpContext> for StopMachine {
    fn name(&self) -> &'static str {
        "stop-machine"
    }

    async fn forward(&self, ctx: &mut OpContext) -> Result<(), ProvisionError> {
        let p = ctx.provisioner.clone();
        machine_for(ctx).lifecycle(&*p, LifecycleAction::Stop).await?;
        Ok(())
    }
}

/// Forwards `restart` to the VM.
pub struct RestartMachine;

#[async_trait]
impl Action<OpContext> for RestartMachine {
    fn name(&self) -> &'static str {
        "restart-machine"
    }

    async fn forward(&self, ctx: &mut OpContext) -> Result<(), ProvisionError> {
        let p = ctx.provisioner.clone();
        machine_for(ctx)
            .lifecycle(&*p, LifecycleAction::Restart)
            .await?;
        Ok(())
    }
}
