//! Error types for bundle operations.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for bundle operations.
pub type BundleResult<T> = Result<T, BundleError>;

/// Errors that can occur while working with bundles, manifests and elements.
#[derive(Debug, Error)]
pub enum BundleError {
    /// A flavor string could not be parsed into `type/subtype`.
    #[error("malformed flavor '{0}'")]
    MalformedFlavor(String),

    /// The mime type of a file could not be determined.
    #[error("unknown file type: {}", .0.display())]
    UnknownFileType(PathBuf),

    /// A mime type string could not be parsed.
    #[error("malformed mime type '{0}'")]
    MalformedMimeType(String),

    /// A checksum value does not match its algorithm.
    #[error("malformed checksum: {0}")]
    MalformedChecksum(String),

    /// A reference string could not be parsed.
    #[error("malformed reference '{0}'")]
    MalformedReference(String),

    /// The backing file of an element no longer matches its stored checksum.
    #[error("checksum mismatch for {}: expected {expected}, got {actual}", path.display())]
    IntegrityError {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// A manifest or backing file is missing.
    #[error("not found: {}", .0.display())]
    NotFound(PathBuf),

    /// An element is not part of the bundle.
    #[error("element '{0}' not found")]
    ElementNotFound(String),

    /// A destination path is already occupied.
    #[error("already exists: {}", .0.display())]
    AlreadyExists(PathBuf),

    /// A relocation target lies inside the bundle being relocated.
    #[error("destination {} lies inside the bundle", .0.display())]
    InvalidDestination(PathBuf),

    /// An explicit element identifier collides with an existing one.
    #[error("duplicate element identifier '{0}'")]
    DuplicateIdentifier(String),

    /// An element identifier cannot name a directory inside the bundle.
    #[error("invalid element identifier '{0}'")]
    InvalidIdentifier(String),

    /// The element cannot be handled by this bundle or the element registry.
    #[error("unsupported element: {0}")]
    UnsupportedElement(String),

    /// The bundle is locked by someone else.
    #[error("bundle at {} is locked", .0.display())]
    LockUnavailable(PathBuf),

    /// Merging found an identifier present in both bundles.
    #[error("merge conflict: target already contains element '{0}'")]
    MergeConflict(String),

    /// The manifest document is malformed.
    #[error("invalid manifest {}: {reason}", path.display())]
    Manifest { path: PathBuf, reason: String },

    /// Packing or unpacking an archive failed.
    #[error("archive failed: {0}")]
    Archive(String),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Failed to read a file or directory.
    #[error("failed to read {}: {source}", path.display())]
    ReadFailed { path: PathBuf, source: io::Error },

    /// Failed to write, copy or delete a file.
    #[error("failed to write {}: {source}", path.display())]
    WriteFailed { path: PathBuf, source: io::Error },

    /// Failed to create a directory.
    #[error("failed to create directory {}: {source}", path.display())]
    CreateDirFailed { path: PathBuf, source: io::Error },
}

impl BundleError {
    /// Build a [`BundleError::ReadFailed`] for `path`.
    pub(crate) fn read(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::ReadFailed {
            path: path.into(),
            source,
        }
    }

    /// Build a [`BundleError::WriteFailed`] for `path`.
    pub(crate) fn write(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::WriteFailed {
            path: path.into(),
            source,
        }
    }

    /// Build a [`BundleError::CreateDirFailed`] for `path`.
    pub(crate) fn create_dir(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::CreateDirFailed {
            path: path.into(),
            source,
        }
    }
}
