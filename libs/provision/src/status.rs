//! Lifecycle status values mirrored into the metadata store.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a box and the machine backing it.
///
/// The provisioner writes the target status before and after each effectful
/// pipeline step; the value here is whatever external observers see in the
/// metadata store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Launching,
    Bootstrapped,
    Starting,
    Running,
    Stopping,
    Stopped,
    Destroying,
    Destroyed,
    Error,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Launching => "launching",
            Status::Bootstrapped => "bootstrapped",
            Status::Starting => "starting",
            Status::Running => "running",
            Status::Stopping => "stopping",
            Status::Stopped => "stopped",
            Status::Destroying => "destroying",
            Status::Destroyed => "destroyed",
            Status::Error => "error",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
