//! # carton-events
//!
//! Billing and audit event records for the carton platform.
//!
//! ## Design Principles
//!
//! - Events are immutable records; once constructed they are never mutated.
//! - Related events travel together as a [`Multi`] batch and are written
//!   atomically: either every event in the batch is persisted or none is.
//!   Partial delivery (a billing deduct persisted without its paired
//!   transaction record) is a correctness violation the sink must prevent.
//! - Event payloads are keyed string maps; the ledger's wire format belongs
//!   to the sink, not to this crate.
//!
//! ## Event Kinds
//!
//! - Billing (`deduct`, `transaction`): always written as a pair sharing
//!   one metric snapshot.
//! - User notifications (`launched`, `destroyed`): the done-events fired
//!   when a lifecycle pipeline completes.

mod error;
mod multi;
mod types;

pub use error::EventError;
pub use multi::{EventSink, MemorySink, Multi};
pub use types::*;
