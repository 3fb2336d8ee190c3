//! Observability
//!
//! Structured audit events for every run-altering decision.

pub mod audit;
