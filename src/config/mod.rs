//! Configuration
//!
//! Session settings, the error taxonomy, file loading and startup validation.

pub mod config;
pub mod types;
pub mod validator;
