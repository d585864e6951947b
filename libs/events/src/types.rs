//! Event record definitions.

use std::collections::BTreeMap;

use carton_id::{AccountId, EventId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Keys used in event data maps.
pub mod data_keys {
    // Metric snapshot (billing pair)
    pub const ACCOUNT_ID: &str = "AccountId";
    pub const ASSEMBLY_ID: &str = "AssemblyId";
    pub const ASSEMBLY_NAME: &str = "AssemblyName";
    pub const CONSUMED: &str = "Consumed";
    pub const START_TIME: &str = "StartTime";
    pub const END_TIME: &str = "EndTime";

    // Done-notification (lifecycle completion)
    pub const BOX_NAME: &str = "BoxName";
    pub const BOX_KIND: &str = "BoxKind";
}

/// Fixed consumption unit recorded per billing interval.
pub const CONSUMED_UNIT: &str = "0.1";

/// What happened. Billing pairs always carry one `Deduct` and one
/// `Transaction` action over the same metric snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventAction {
    Deduct,
    Transaction,
    Launched,
    Destroyed,
}

impl EventAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventAction::Deduct => "deduct",
            EventAction::Transaction => "transaction",
            EventAction::Launched => "launched",
            EventAction::Destroyed => "destroyed",
        }
    }
}

impl std::fmt::Display for EventAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which ledger the event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Billing ledger entries.
    Bill,
    /// User-visible notifications.
    User,
}

/// An immutable event record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub account_id: AccountId,
    pub action: EventAction,
    pub event_type: EventType,
    pub data: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Creates an event stamped with a fresh id and the current time.
    pub fn new(
        account_id: AccountId,
        action: EventAction,
        event_type: EventType,
        data: BTreeMap<String, String>,
    ) -> Self {
        Self {
            id: EventId::new(),
            account_id,
            action,
            event_type,
            data,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(EventAction::Deduct, "deduct")]
    #[case(EventAction::Transaction, "transaction")]
    #[case(EventAction::Launched, "launched")]
    #[case(EventAction::Destroyed, "destroyed")]
    fn action_names(#[case] action: EventAction, #[case] expected: &str) {
        assert_eq!(action.as_str(), expected);
        assert_eq!(action.to_string(), expected);
    }

    #[test]
    fn event_serde_roundtrip() {
        let mut data = BTreeMap::new();
        data.insert(data_keys::CONSUMED.to_string(), CONSUMED_UNIT.to_string());

        let event = Event::new(
            AccountId::parse("acct-1").unwrap(),
            EventAction::Deduct,
            EventType::Bill,
            data,
        );

        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn action_serializes_snake_case() {
        let json = serde_json::to_string(&EventAction::Transaction).unwrap();
        assert_eq!(json, "\"transaction\"");
        assert_eq!(serde_json::to_string(&EventType::Bill).unwrap(), "\"bill\"");
    }
}
