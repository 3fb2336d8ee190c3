//! Target process model
//!
//! Type descriptions, the interfaces consumed from the process-control
//! engine, and the Linux primitives shared by real engines.

pub mod catalog;
pub mod control;
pub mod process;
pub mod types;
