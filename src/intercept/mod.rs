//! Call interception and fault injection
//!
//! Breakpoint-driven observation of target calls (`watch`) and substitution
//! of their outcome (`fail`), composed per location through scopes.

pub mod failure;
pub mod protocol;
pub mod registry;
pub mod stats;

pub use failure::{ArgOverride, FailureSpec};
pub use protocol::{HeapTracker, Interceptor};
pub use registry::{EntryState, InterceptScope, InterceptionRegistry};
pub use stats::{ArgSnapshot, FuncStats, StatsMap};
