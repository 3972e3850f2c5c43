//! `rolegate-core`: shared primitives for the access-control core.
//!
//! This crate contains **pure** building blocks (no storage, no transport).

pub mod clock;
pub mod error;
pub mod id;
pub mod version;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{DomainError, DomainResult};
pub use id::{AccountId, AuditEntryId, ProfileId, ResetRequestId};
pub use version::{ExpectedVersion, Versioned};
