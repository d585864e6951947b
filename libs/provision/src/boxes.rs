//! The box: the declarative unit of provisioning intent.
//!
//! Boxes are owned by the assembly layer and consumed read-only here. A box
//! carries everything the provisioner needs: identity, resource requests,
//! the repository or image it runs, and its router name.

use carton_id::{AccountId, AssemblyId, ComponentId};
use serde::{Deserialize, Serialize};

/// Whether a box stands alone or is one member of a multi-component
/// assembly. A standalone box's status and its sole component's status are
/// the same value, so only the assembly record is written for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoxLevel {
    Standalone,
    AssemblyMember,
}

/// Resource request for the VM backing a box.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeRequest {
    /// Logical CPU share. Divided by the configured throttle factor to get
    /// the compute cluster's native vCPU value.
    pub cpushare: u32,

    /// Memory in megabytes.
    pub memory_mb: u64,

    /// Disk in megabytes.
    pub disk_mb: u64,
}

/// Repository or image reference for a box.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repo {
    /// Source URL of the repository.
    pub source: String,

    /// A one-click repository ships a ready-to-run image; the platform
    /// default image is bypassed for it.
    pub one_click: bool,
}

impl Repo {
    /// The image reference derived from the repository source.
    pub fn image_url(&self) -> String {
        self.source.clone()
    }
}

/// A deployable unit belonging to an application assembly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoxSpec {
    /// Globally unique name, also used as the VM name and bus topic.
    pub full_name: String,

    pub account_id: AccountId,

    /// The owning assembly.
    pub assembly_id: AssemblyId,

    /// The owning assemblies collection, tagged onto the VM context.
    pub assemblies_id: String,

    /// Set when the box is a member of a multi-component assembly.
    pub component_id: Option<ComponentId>,

    pub level: BoxLevel,

    pub repo: Repo,

    /// Version label for repository-derived images.
    pub image_version: String,

    pub compute: ComputeRequest,

    /// Name of the router responsible for this box's network identity.
    pub router: String,

    /// Kind label for the box (carried on done-notification events).
    pub kind: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repo_image_url() {
        let repo = Repo {
            source: "github.com/acme/blog.git".to_string(),
            one_click: false,
        };
        assert_eq!(repo.image_url(), "github.com/acme/blog.git");
    }

    #[test]
    fn level_serializes_snake_case() {
        let json = serde_json::to_string(&BoxLevel::AssemblyMember).unwrap();
        assert_eq!(json, "\"assembly_member\"");
    }
}
