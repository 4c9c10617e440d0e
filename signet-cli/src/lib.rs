//! Signet CLI Library
//!
//! Configuration, wiring and rendering used by the `signet` binary, exposed
//! for testing.

pub mod config;
pub mod report;
pub mod services;
pub mod signature_file;

pub use config::{load_config, SignetConfig};
