//! # carton-id
//!
//! Identifier types for the carton platform.
//!
//! ## Design Principles
//!
//! - Identifiers minted by this system (event ids) are ULID-based and
//!   time-sortable, with a canonical `{prefix}_{ulid}` representation.
//! - Identifiers assigned by external systems are opaque strings: the
//!   metadata store owns account, assembly, and component ids, and the
//!   compute cluster owns VM ids. We validate shape (non-empty, trimmed)
//!   but never invent one ourselves.
//! - All identifiers are typed to prevent mixing resource kinds.
//!
//! ## Examples
//!
//! - `evt_01HV4Z2WQXKJNM8GPQY6VBKC3D` (an event id minted here)
//! - `ASM118767707591745536` (an assembly id from the metadata store)
//! - `4217` (a VM id from the compute cluster)

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;
