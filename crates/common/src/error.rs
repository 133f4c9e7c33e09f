//! Error types for configuration loading

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using the configuration Error
pub type Result<T> = std::result::Result<T, Error>;

/// Configuration loading errors.
///
/// Absence of a setting is never an error here; it is reported through
/// [`crate::Resolution::Unconfigured`]. These variants cover settings that are
/// present but unusable, and sources that exist but cannot be read.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse profile {path}: {source}")]
    Profile {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to read dotenv file {path}: {source}")]
    Dotenv {
        path: PathBuf,
        #[source]
        source: dotenvy::Error,
    },

    #[error("Invalid configuration: {key} = {value:?}: {reason}")]
    InvalidConfig {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Unknown environment '{0}' in profile")]
    UnknownEnvironment(String),
}
