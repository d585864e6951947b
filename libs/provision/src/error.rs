//! The crate-wide error umbrella.
//!
//! Collaborator modules own their error enums; this type is what lifecycle
//! entry points return. The taxonomy distinctions matter to callers:
//! configuration errors abort before any external call, partial-consistency
//! errors (an orphaned VM) must stay distinguishable from plain failures so
//! operators can reconcile, and not-ready conditions carry their own
//! variant rather than collapsing into a generic timeout.

use thiserror::Error;

use crate::bus::BusError;
use crate::cluster::ClusterError;
use crate::compute::ComputeError;
use crate::machine::MachineError;
use crate::metadata::MetadataError;
use crate::router::RouterError;
use carton_events::EventError;

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error(transparent)]
    Compute(#[from] ComputeError),

    #[error(transparent)]
    Machine(#[from] MachineError),

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Router(#[from] RouterError),

    #[error(transparent)]
    Events(#[from] EventError),

    #[error("no provisioner registered under '{0}'")]
    UnknownProvisioner(String),
}
