//! Platform E2E Common Library
//!
//! Environment configuration for the E2E harness: the named settings a test
//! group may depend on, layered loading of those settings, and the gating
//! decision that turns missing settings into a skip instead of a failure.

pub mod config;
pub mod error;

pub use config::{ConfigKey, Configuration, EnvironmentSource, Resolution, Unconfigured};
pub use error::{Error, Result};

/// Harness version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment used when neither `--env` nor `E2E_ENV` is given
pub const DEFAULT_ENVIRONMENT: &str = "local";
