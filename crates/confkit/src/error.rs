//! Error types for artifact operations.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while materializing or removing an artifact.
#[derive(Debug, Error)]
pub enum Error {
    /// Reading the current artifact content failed
    #[error("failed to read {path}: {source}")]
    Read {
        /// The artifact path
        path: PathBuf,
        /// Underlying IO error
        source: std::io::Error,
    },

    /// Copying the previous version to its backup path failed
    #[error("failed to back up {path} to {backup}: {source}")]
    Backup {
        /// The artifact path
        path: PathBuf,
        /// The intended backup path
        backup: PathBuf,
        /// Underlying IO error
        source: std::io::Error,
    },

    /// Writing the new content failed
    #[error("failed to write {path}: {source}")]
    Write {
        /// The artifact path
        path: PathBuf,
        /// Underlying IO error
        source: std::io::Error,
    },

    /// Removing the artifact failed
    #[error("failed to remove {path}: {source}")]
    Remove {
        /// The artifact path
        path: PathBuf,
        /// Underlying IO error
        source: std::io::Error,
    },
}

/// Result type for artifact operations.
pub type Result<T> = std::result::Result<T, Error>;
