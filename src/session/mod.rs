//! Session lifecycle
//!
//! Exclusive control of one target program, calls into it, and capture of
//! the state it was in when a signal stopped it.

pub mod crash;
pub mod lifecycle;

pub use crash::CrashReport;
pub use lifecycle::{CallArg, Session};
