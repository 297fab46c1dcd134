//! Structural error types for the entry tree model.

use thiserror::Error;

/// Errors that can occur when validating paths or mutating an entry tree.
///
/// Structural errors always fail the single operation that raised them and
/// are never retried.
#[derive(Debug, Error)]
pub enum StructuralError {
    /// The tree is read-only.
    #[error("Archive file system is read-only")]
    ReadOnly,

    /// The root entry cannot be linked or unlinked.
    #[error("Root entry cannot be modified")]
    IsRoot,

    /// No entry exists at the path.
    #[error("Entry not found: {path}")]
    NotFound {
        /// The path that was not found.
        path: String,
    },

    /// The entry at the path is not a directory.
    #[error("Not a directory: {path}")]
    NotADirectory {
        /// The offending path.
        path: String,
    },

    /// The entry at the path is not a file.
    #[error("Not a file: {path}")]
    NotAFile {
        /// The offending path.
        path: String,
    },

    /// An entry already exists and must not be replaced.
    #[error("Entry already exists: {path}")]
    EntryExists {
        /// The occupied path.
        path: String,
    },

    /// A directory with children cannot be unlinked.
    #[error("Directory not empty: {path}")]
    DirectoryNotEmpty {
        /// The directory path.
        path: String,
    },

    /// The parent of the path does not exist.
    #[error("Missing parent directory for: {path}")]
    MissingParent {
        /// The path whose parent is missing.
        path: String,
    },

    /// The path is not in legal normal form.
    #[error("Invalid path {path:?}: {reason}")]
    InvalidPath {
        /// The rejected path.
        path: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// The tree violated one of its own invariants.
    ///
    /// This indicates a bug in the federation layer, not bad input.
    #[error("Entry tree corrupted at {path}: {detail}")]
    Corrupt {
        /// Path at which the inconsistency was detected.
        path: String,
        /// What was inconsistent.
        detail: &'static str,
    },
}

impl StructuralError {
    /// Create a `NotFound` error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    /// Create an `InvalidPath` error.
    pub fn invalid_path(path: impl Into<String>, reason: &'static str) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason,
        }
    }
}
