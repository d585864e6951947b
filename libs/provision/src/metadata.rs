//! Metadata store interface, addressed by assembly id.
//!
//! Durable machine state lives here, not in-process: the VM id and VNC
//! endpoint are written as assembly outputs, and lifecycle status is
//! mirrored onto the assembly record (and, for multi-component assemblies,
//! onto the owning component's record too).

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use carton_id::{AssemblyId, ComponentId};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::status::Status;

/// Errors from the metadata store.
#[derive(Debug, Error, Clone)]
pub enum MetadataError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("metadata store error: {0}")]
    Store(String),
}

/// Output keys written against an assembly record.
pub mod output_keys {
    pub const VM_ID: &str = "vmid";
    pub const VNC_HOST: &str = "vnchost";
    pub const VNC_PORT: &str = "vncport";
}

/// Metadata store client interface.
///
/// The store serializes its own writes per key; each call here is one
/// idempotent write that is safe to retry individually.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Replace the named output keys of an assembly with the given values.
    async fn nuke_and_set_outputs(
        &self,
        assembly: &AssemblyId,
        outputs: BTreeMap<String, Vec<String>>,
    ) -> Result<(), MetadataError>;

    async fn set_status(&self, assembly: &AssemblyId, status: Status) -> Result<(), MetadataError>;

    async fn set_component_status(
        &self,
        component: &ComponentId,
        status: Status,
    ) -> Result<(), MetadataError>;
}

/// Capability to receive a status write. Implemented by both the assembly
/// and component handles so callers can treat either as a status receiver.
#[async_trait]
pub trait Notify: Send + Sync {
    async fn apply_status(&self, status: Status) -> Result<(), MetadataError>;
}

/// Handle to one assembly record in the metadata store.
pub struct Assembly<'a> {
    id: AssemblyId,
    store: &'a dyn MetadataStore,
}

impl<'a> Assembly<'a> {
    pub fn new(id: AssemblyId, store: &'a dyn MetadataStore) -> Self {
        Self { id, store }
    }

    pub async fn nuke_and_set_outputs(
        &self,
        outputs: BTreeMap<String, Vec<String>>,
    ) -> Result<(), MetadataError> {
        self.store.nuke_and_set_outputs(&self.id, outputs).await
    }
}

#[async_trait]
impl Notify for Assembly<'_> {
    async fn apply_status(&self, status: Status) -> Result<(), MetadataError> {
        self.store.set_status(&self.id, status).await
    }
}

/// Handle to one component record in the metadata store.
pub struct Component<'a> {
    id: ComponentId,
    store: &'a dyn MetadataStore,
}

impl<'a> Component<'a> {
    pub fn new(id: ComponentId, store: &'a dyn MetadataStore) -> Self {
        Self { id, store }
    }
}

#[async_trait]
impl Notify for Component<'_> {
    async fn apply_status(&self, status: Status) -> Result<(), MetadataError> {
        self.store.set_component_status(&self.id, status).await
    }
}

/// In-memory metadata store for tests and development.
#[derive(Default)]
pub struct MemoryStore {
    outputs: Mutex<HashMap<String, BTreeMap<String, Vec<String>>>>,
    assembly_statuses: Mutex<HashMap<String, Vec<Status>>>,
    component_statuses: Mutex<HashMap<String, Vec<Status>>>,

    /// When set, output writes fail. Used to exercise the orphaned-VM
    /// reporting path.
    fail_outputs: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that rejects output writes but accepts status writes.
    pub fn failing_outputs() -> Self {
        Self {
            fail_outputs: true,
            ..Self::default()
        }
    }

    /// Current outputs of an assembly.
    pub async fn outputs(&self, assembly: &AssemblyId) -> BTreeMap<String, Vec<String>> {
        self.outputs
            .lock()
            .await
            .get(assembly.as_str())
            .cloned()
            .unwrap_or_default()
    }

    /// Every status written for an assembly, in write order.
    pub async fn assembly_status_history(&self, assembly: &AssemblyId) -> Vec<Status> {
        self.assembly_statuses
            .lock()
            .await
            .get(assembly.as_str())
            .cloned()
            .unwrap_or_default()
    }

    /// Every status written for a component, in write order.
    pub async fn component_status_history(&self, component: &ComponentId) -> Vec<Status> {
        self.component_statuses
            .lock()
            .await
            .get(component.as_str())
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl MetadataStore for MemoryStore {
    async fn nuke_and_set_outputs(
        &self,
        assembly: &AssemblyId,
        outputs: BTreeMap<String, Vec<String>>,
    ) -> Result<(), MetadataError> {
        if self.fail_outputs {
            return Err(MetadataError::Store("output write rejected".to_string()));
        }
        let mut all = self.outputs.lock().await;
        let record = all.entry(assembly.as_str().to_string()).or_default();
        for (key, values) in outputs {
            record.insert(key, values);
        }
        Ok(())
    }

    async fn set_status(&self, assembly: &AssemblyId, status: Status) -> Result<(), MetadataError> {
        self.assembly_statuses
            .lock()
            .await
            .entry(assembly.as_str().to_string())
            .or_default()
            .push(status);
        Ok(())
    }

    async fn set_component_status(
        &self,
        component: &ComponentId,
        status: Status,
    ) -> Result<(), MetadataError> {
        self.component_statuses
            .lock()
            .await
            .entry(component.as_str().to_string())
            .or_default()
            .push(status);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asm() -> AssemblyId {
        AssemblyId::parse("ASM-1").unwrap()
    }

    #[tokio::test]
    async fn outputs_overwrite_per_key() {
        let store = MemoryStore::new();
        let assembly = asm();

        let mut first = BTreeMap::new();
        first.insert(output_keys::VM_ID.to_string(), vec!["1000".to_string()]);
        store
            .nuke_and_set_outputs(&assembly, first)
            .await
            .unwrap();

        let mut second = BTreeMap::new();
        second.insert(output_keys::VM_ID.to_string(), vec!["2000".to_string()]);
        store
            .nuke_and_set_outputs(&assembly, second)
            .await
            .unwrap();

        let outputs = store.outputs(&assembly).await;
        assert_eq!(outputs.get(output_keys::VM_ID), Some(&vec!["2000".to_string()]));
    }

    #[tokio::test]
    async fn independent_keys_survive() {
        let store = MemoryStore::new();
        let assembly = asm();

        let mut host = BTreeMap::new();
        host.insert(output_keys::VNC_HOST.to_string(), vec!["10.0.0.5".to_string()]);
        store.nuke_and_set_outputs(&assembly, host).await.unwrap();

        let mut port = BTreeMap::new();
        port.insert(output_keys::VNC_PORT.to_string(), vec!["5900".to_string()]);
        store.nuke_and_set_outputs(&assembly, port).await.unwrap();

        let outputs = store.outputs(&assembly).await;
        assert_eq!(
            outputs.get(output_keys::VNC_HOST),
            Some(&vec!["10.0.0.5".to_string()])
        );
        assert_eq!(
            outputs.get(output_keys::VNC_PORT),
            Some(&vec!["5900".to_string()])
        );
    }

    #[tokio::test]
    async fn notify_capability_reaches_both_records() {
        let store = MemoryStore::new();
        let assembly = asm();
        let component = ComponentId::parse("COMP-1").unwrap();

        Assembly::new(assembly.clone(), &store)
            .apply_status(Status::Starting)
            .await
            .unwrap();
        Component::new(component.clone(), &store)
            .apply_status(Status::Starting)
            .await
            .unwrap();

        assert_eq!(
            store.assembly_status_history(&assembly).await,
            vec![Status::Starting]
        );
        assert_eq!(
            store.component_status_history(&component).await,
            vec![Status::Starting]
        );
    }

    #[tokio::test]
    async fn failing_outputs_store() {
        let store = MemoryStore::failing_outputs();
        let assembly = asm();

        let mut outputs = BTreeMap::new();
        outputs.insert(output_keys::VM_ID.to_string(), vec!["1".to_string()]);
        let err = store.nuke_and_set_outputs(&assembly, outputs).await.unwrap_err();
        assert!(matches!(err, MetadataError::Store(_)));

        // Status writes still work.
        store.set_status(&assembly, Status::Launching).await.unwrap();
    }
}
