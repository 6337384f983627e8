//! CLI error type.

use std::path::PathBuf;

use mediabundle::BundleError;
use thiserror::Error;

/// Errors reported by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Bundle(#[from] BundleError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Bundle is already locked: {}", .0.display())]
    AlreadyLocked(PathBuf),
}

impl CliError {
    /// Process exit code for this error.
    ///
    /// Integrity failures and lock contention get their own codes so scripts
    /// can react to them.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Bundle(BundleError::IntegrityError { .. }) => 2,
            CliError::Bundle(BundleError::LockUnavailable(_)) | CliError::AlreadyLocked(_) => 3,
            CliError::Bundle(BundleError::MergeConflict(_)) => 4,
            _ => 1,
        }
    }
}
