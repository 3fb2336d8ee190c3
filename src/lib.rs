//! cprobe: typed value marshalling and call interception for native programs
//! running under a process-control engine.
//!
//! # Architecture
//!
//! ## Target Model ([`target`])
//! - [`target::types`]: structural type descriptions and function signatures
//! - [`target::control`]: interfaces consumed from the process-control engine
//! - [`target::catalog`]: declarative LP64 type catalog
//! - [`target::process`]: remote memory and process waiting over `nix`
//!
//! ## Value Marshalling ([`values`])
//! - [`values::template`]: caller-built value templates
//! - [`values::encoder`]: side-effect-free encoding plans
//! - [`values::marshaller`]: emission into target memory with allocation tracking
//! - [`values::encoded`]: ABI bytes tagged with their type, plus readback helpers
//!
//! ## Interception ([`intercept`])
//! - [`intercept::registry`]: per-location watch/fail scopes and breakpoint ownership
//! - [`intercept::protocol`]: the stop protocol and heap liveness
//! - [`intercept::failure`]: failure specifications and `when` selection
//! - [`intercept::stats`]: per-function call records
//!
//! ## Session ([`session`])
//! - [`session::lifecycle`]: start, calls, scopes and teardown
//! - [`session::crash`]: state of a target stopped by a signal
//!
//! ## Safety & Cleanup ([`safety`])
//! - [`safety::ownership`]: single-owner control lock
//! - [`safety::cleanup`]: idempotent allocation ledger
//!
//! ## Observability ([`observability`])
//! - [`observability::audit`]: structured audit events
//!
//! ## Configuration ([`config`])
//! - [`config::types`]: error taxonomy and session configuration
//! - [`config::config`]: JSON loading
//! - [`config::validator`]: startup validation
//!
//! ## Testing Infrastructure ([`testing`])
//! - [`testing::sim`]: in-memory process-control engine

// Target Model
pub mod target;

// Value Marshalling
pub mod values;

// Interception
pub mod intercept;

// Session
pub mod session;

// Safety & Cleanup
pub mod safety;

// Observability
pub mod observability;

// Configuration
pub mod config;

// Testing Infrastructure
pub mod testing;

// CLI entrypoint for the cprobe binary.
pub mod cli;

// Re-export commonly used types for convenience
pub use config::types::*;
pub use intercept::{EntryState, FailureSpec, InterceptScope};
pub use session::{CallArg, CrashReport, Session};
pub use values::{EncodedValue, ValueTemplate};
