//! Safety and cleanup
//!
//! Single-owner control of the engine and idempotent release of everything a
//! session allocated in the target.

pub mod cleanup;
pub mod ownership;

pub use cleanup::{AllocationLedger, ReleaseReport};
pub use ownership::{ControlLock, OwnershipToken, SessionId};
