//! Message bus interface and state-change payloads.
//!
//! The broker endpoints are explicit configuration injected at
//! construction, never process-wide state, so tests can hand the machine a
//! fake bus. A publish acquires a connection, performs exactly one write,
//! and releases the connection on every exit path; that scoping lives
//! inside each implementation.

use async_trait::async_trait;
use carton_id::AssemblyId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

/// Errors from the message bus.
#[derive(Debug, Error, Clone)]
pub enum BusError {
    #[error("no bus endpoints configured")]
    NoEndpoints,

    #[error("bus connect failed: {0}")]
    Connect(String),

    #[error("bus publish failed: {0}")]
    Publish(String),
}

/// Broker endpoints for the bus. Passed into whoever publishes; there is
/// no global bus configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusConfig {
    pub endpoints: Vec<String>,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            endpoints: vec!["localhost:4150".to_string()],
        }
    }
}

/// Category tag on state-change requests.
pub const CATEGORY_STATE: &str = "state";

/// The payload published when a machine's state changes. Keyed on the bus
/// by the machine's name as topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateRequest {
    pub cat_id: AssemblyId,
    pub action: String,
    pub category: String,
    pub created_at: DateTime<Utc>,
}

impl StateRequest {
    pub fn new(cat_id: AssemblyId, action: impl Into<String>) -> Self {
        Self {
            cat_id,
            action: action.into(),
            category: CATEGORY_STATE.to_string(),
            created_at: Utc::now(),
        }
    }
}

/// Message bus client interface.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish one payload under a topic. Connection acquisition and
    /// release are scoped inside the call; failure is surfaced, never
    /// swallowed.
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BusError>;
}

/// In-memory bus for tests and development. Holds the injected broker
/// configuration like a real client would; a publish with no configured
/// endpoints fails the same way a connect would.
pub struct MemoryBus {
    config: BusConfig,
    published: Mutex<Vec<(String, Vec<u8>)>>,
    fail: bool,
}

impl MemoryBus {
    pub fn new(config: BusConfig) -> Self {
        Self {
            config,
            published: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    /// A bus that rejects every publish.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(BusConfig::default())
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Everything published so far as (topic, payload) pairs.
    pub async fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.published.lock().await.clone()
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BusError> {
        if self.config.endpoints.is_empty() {
            return Err(BusError::NoEndpoints);
        }
        if self.fail {
            return Err(BusError::Publish("bus unavailable".to_string()));
        }
        self.published
            .lock()
            .await
            .push((topic.to_string(), payload.to_vec()));
        Ok(())
    }
}
