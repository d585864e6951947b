//! # carton-provision
//!
//! The compute-provisioning core of the carton platform. Given a declarative
//! box (a deployable unit of an application assembly), this crate drives the
//! full lifecycle of the virtual machine that backs it against an external
//! compute cluster, while keeping the metadata store, the billing event
//! pipeline, and the routing layer consistent with the VM's real state.
//!
//! ## Architecture
//!
//! - **Cluster**: resolves which compute node handles an operation and
//!   passes compute-API calls through, single attempt, no retries.
//! - **Machine**: an in-memory handle for one VM. Issues cluster operations,
//!   polls for the network endpoint, writes results back to the metadata
//!   store, emits billing events, and publishes state-change notifications.
//! - **Provisioner**: the orchestration facade. Builds a per-operation
//!   context and runs an ordered, compensable action pipeline for each
//!   lifecycle operation (deploy, destroy, start, stop, restart, set-state,
//!   set-status).
//! - **Pipeline**: the sequencing primitive. Runs steps in order against a
//!   shared context; on the first failure it unwinds by compensating the
//!   steps that already completed, in reverse.
//!
//! External collaborators (compute API, metadata store, message bus, event
//! sink, router) are async traits with in-memory implementations for tests.

pub mod actions;
pub mod boxes;
pub mod bus;
pub mod cluster;
pub mod compute;
pub mod error;
pub mod machine;
pub mod metadata;
pub mod pipeline;
pub mod progress;
pub mod provisioner;
pub mod router;
pub mod status;

// Re-export commonly used types
pub use boxes::{BoxLevel, BoxSpec, ComputeRequest, Repo};
pub use cluster::{Cluster, Node};
pub use error::ProvisionError;
pub use machine::{Machine, MachineEnv, PollConfig};
pub use provisioner::{ClusterProvisioner, Provisioner, ProvisionerConfig, ProvisionerRegistry};
pub use status::Status;
