//! Atomic multi-event batches and the sink contract.

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{Event, EventError};

/// Destination for event batches.
///
/// `write_multi` is atomic over the batch: implementations must persist
/// either every event or none. Callers rely on this to keep paired billing
/// records (deduct + transaction) consistent.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn write_multi(&self, events: &[Event]) -> Result<(), EventError>;
}

/// A batch of events written together.
#[derive(Debug, Clone)]
pub struct Multi {
    events: Vec<Event>,
}

impl Multi {
    pub fn new(events: Vec<Event>) -> Self {
        Self { events }
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Writes the whole batch through the sink. An empty batch is a no-op.
    pub async fn write(&self, sink: &dyn EventSink) -> Result<(), EventError> {
        if self.events.is_empty() {
            return Ok(());
        }
        sink.write_multi(&self.events).await
    }
}

/// In-memory sink for tests and development.
///
/// Batches are staged and committed in one step, so a configured failure
/// leaves no partial batch visible.
pub struct MemorySink {
    written: Mutex<Vec<Event>>,

    /// Simulate a sink that falls over after accepting this many events of
    /// a batch. The batch still commits all-or-nothing.
    fail_after: Option<usize>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self {
            written: Mutex::new(Vec::new()),
            fail_after: None,
        }
    }

    /// A sink that fails any batch longer than `n` events.
    pub fn failing_after(n: usize) -> Self {
        Self {
            written: Mutex::new(Vec::new()),
            fail_after: Some(n),
        }
    }

    /// Snapshot of everything committed so far.
    pub async fn written(&self) -> Vec<Event> {
        self.written.lock().await.clone()
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventSink for MemorySink {
    async fn write_multi(&self, events: &[Event]) -> Result<(), EventError> {
        if let Some(limit) = self.fail_after {
            if events.len() > limit {
                return Err(EventError::Rejected {
                    count: events.len(),
                    reason: format!("sink failed after {limit} events"),
                });
            }
        }

        let mut written = self.written.lock().await;
        written.extend_from_slice(events);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use carton_id::AccountId;

    use super::*;
    use crate::{data_keys, EventAction, EventType, CONSUMED_UNIT};

    fn billing_pair() -> Multi {
        let account = AccountId::parse("acct-1").unwrap();
        let mut data = BTreeMap::new();
        data.insert(data_keys::ACCOUNT_ID.to_string(), "acct-1".to_string());
        data.insert(data_keys::CONSUMED.to_string(), CONSUMED_UNIT.to_string());

        Multi::new(vec![
            Event::new(
                account.clone(),
                EventAction::Deduct,
                EventType::Bill,
                data.clone(),
            ),
            Event::new(account, EventAction::Transaction, EventType::Bill, data),
        ])
    }

    #[tokio::test]
    async fn write_commits_whole_batch() {
        let sink = MemorySink::new();
        let multi = billing_pair();

        multi.write(&sink).await.unwrap();

        let written = sink.written().await;
        assert_eq!(written.len(), 2);
        assert_eq!(written[0].action, EventAction::Deduct);
        assert_eq!(written[1].action, EventAction::Transaction);
        // Both halves of the pair share the metric snapshot.
        assert_eq!(written[0].data, written[1].data);
    }

    #[tokio::test]
    async fn failed_write_leaves_no_partial_batch() {
        let sink = MemorySink::failing_after(1);
        let multi = billing_pair();

        let err = multi.write(&sink).await.unwrap_err();
        assert!(matches!(err, EventError::Rejected { count: 2, .. }));
        assert!(sink.written().await.is_empty());
    }

    #[tokio::test]
    async fn empty_batch_is_noop() {
        let sink = MemorySink::failing_after(0);
        Multi::new(vec![]).write(&sink).await.unwrap();
        assert!(sink.written().await.is_empty());
    }
}
