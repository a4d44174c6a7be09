// error.rs - Error types for the policy subsystem.
//
// Malformed policy *text* never produces a PolicyError: the parser and
// validator report problems as diagnostics. These variants cover the
// environment around the engine (disk, config files, the file watcher)
// and the one fatal case, an unusable built-in default.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during policy operations.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// A file read, write, or rename failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to serialize a report or history record.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The watch configuration file is not valid TOML.
    #[error("failed to parse config at {path}: {source}")]
    Config {
        path: PathBuf,
        source: toml::de::Error,
    },

    /// The default policy handed to the resolver does not validate.
    /// This is a broken deployment, not a bad runtime config.
    #[error("default policy is invalid: {}", codes.join(","))]
    InvalidDefault { codes: Vec<String> },

    /// Only valid policies can be recorded as accepted.
    #[error("policy {hash} has error diagnostics and cannot be recorded")]
    NotAccepted { hash: String },

    /// The filesystem watcher could not be created or attached.
    #[error("file watcher error: {0}")]
    Watch(#[from] notify::Error),
}

impl PolicyError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PolicyError::Io {
            path: path.into(),
            source,
        }
    }
}
