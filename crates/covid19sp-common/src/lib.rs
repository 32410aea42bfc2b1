//! # Covid19-SP Common
//!
//! Logging configuration shared by the offline cache crates and the command-line host.

pub mod logging;

pub use logging::{init_logging, LogConfig, LogFormat};
