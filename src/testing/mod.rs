//! Testing infrastructure
//!
//! A simulated process-control engine for exercising sessions without a
//! debugger or a compiled target.

pub mod sim;

pub use sim::{SimContext, SimFault, SimInferior, SimResult};
