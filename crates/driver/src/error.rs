//! Driver error types.

use thiserror::Error;

/// Errors raised by an archive driver or host file system adapter.
///
/// The mount-state machine classifies these into *persistent* failures,
/// which it caches as false positives, and *transient* ones, which may
/// resolve themselves and are retried on every call.
#[derive(Debug, Error)]
pub enum DriverError {
    /// The bytes at the mount point are not a valid archive.
    #[error("Not an archive: {mount_point}")]
    NotAnArchive {
        /// The probed mount point.
        mount_point: String,
    },

    /// Nothing exists at the mount point.
    #[error("No such archive: {mount_point}")]
    NotFound {
        /// The probed mount point.
        mount_point: String,
    },

    /// The container changed underneath a concurrent reader.
    ///
    /// Transient: the condition may not recur, so it must never be cached.
    #[error("Concurrent modification of {mount_point}")]
    ConcurrentModification {
        /// The affected mount point.
        mount_point: String,
    },

    /// The target is not writable.
    #[error("Read-only target: {mount_point}")]
    ReadOnlyTarget {
        /// The affected mount point.
        mount_point: String,
    },

    /// No entry with the path exists in the container.
    #[error("No entry in container: {path}")]
    NoSuchEntry {
        /// The missing entry path.
        path: String,
    },

    /// Container encoding or decoding failed.
    #[error("Malformed container at {mount_point}: {detail}")]
    Malformed {
        /// The affected mount point.
        mount_point: String,
        /// What was wrong.
        detail: String,
    },

    /// IO error from the byte layer.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DriverError {
    /// Whether this failure class may resolve itself.
    ///
    /// Transient failures are retried on every mount probe; persistent ones
    /// are cached by the mount-state machine until an explicit reset.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ConcurrentModification { .. })
    }
}
