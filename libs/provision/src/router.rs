//! Router interface and the pluggable name → router registry.
//!
//! A box names the router responsible for its network identity; the
//! registry resolves that name to an implementation. Registration is an
//! explicit call made at process startup, with no import-time side effects,
//! and an unknown name is a propagated error, never a silent no-op.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

/// Errors from router resolution and operations.
#[derive(Debug, Error, Clone)]
pub enum RouterError {
    #[error("no router registered under '{0}'")]
    Unknown(String),

    #[error("no route for '{0}'")]
    NoRoute(String),

    #[error("router backend error: {0}")]
    Backend(String),
}

/// DNS/router client interface.
#[async_trait]
pub trait Router: Send + Sync {
    /// The advertised address for a routed name.
    async fn addr(&self, name: &str) -> Result<String, RouterError>;

    /// Register a routing entry for a box.
    async fn add_route(&self, name: &str) -> Result<(), RouterError>;

    /// Remove a box's routing entry.
    async fn remove_route(&self, name: &str) -> Result<(), RouterError>;

    async fn set_cname(&self, cname: &str, name: &str) -> Result<(), RouterError>;

    async fn unset_cname(&self, cname: &str, name: &str) -> Result<(), RouterError>;
}

impl std::fmt::Debug for dyn Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn Router")
    }
}

/// Explicit name → router registry, populated at startup and passed by
/// reference into whatever composes the service.
#[derive(Default)]
pub struct RouterRegistry {
    routers: HashMap<String, Arc<dyn Router>>,
}

impl RouterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, router: Arc<dyn Router>) {
        self.routers.insert(name.into(), router);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Router>, RouterError> {
        self.routers
            .get(name)
            .cloned()
            .ok_or_else(|| RouterError::Unknown(name.to_string()))
    }
}

/// In-memory router for tests and development. Routes resolve to a
/// synthetic load-balancer address.
#[derive(Default)]
pub struct MemoryRouter {
    routes: Mutex<HashMap<String, String>>,
    cnames: Mutex<HashMap<String, String>>,
}

impl MemoryRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn has_route(&self, name: &str) -> bool {
        self.routes.lock().await.contains_key(name)
    }

    pub async fn cname_target(&self, cname: &str) -> Option<String> {
        self.cnames.lock().await.get(cname).cloned()
    }
}

#[async_trait]
impl Router for MemoryRouter {
    async fn addr(&self, name: &str) -> Result<String, RouterError> {
        self.routes
            .lock()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| RouterError::NoRoute(name.to_string()))
    }

    async fn add_route(&self, name: &str) -> Result<(), RouterError> {
        self.routes
            .lock()
            .await
            .insert(name.to_string(), format!("{name}.lb.local"));
        Ok(())
    }

    async fn remove_route(&self, name: &str) -> Result<(), RouterError> {
        self.routes.lock().await.remove(name);
        Ok(())
    }

    async fn set_cname(&self, cname: &str, name: &str) -> Result<(), RouterError> {
        self.cnames
            .lock()
            .await
            .insert(cname.to_string(), name.to_string());
        Ok(())
    }

    async fn unset_cname(&self, cname: &str, _name: &str) -> Result<(), RouterError> {
        self.cnames.lock().await.remove(cname);
        Ok(())
    }
}
