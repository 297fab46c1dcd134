//! Error types for the federation core.
//!
//! Taxonomy:
//! - structural errors ([`arcmount_model::StructuralError`]) fail the single
//!   operation immediately and are never retried;
//! - `Busy` is recoverable: the caller may wait for or force-close streams;
//! - `NeedsWriteLock` is an internal guard signal consumed by the locking
//!   controller's upgrade logic, never by end users;
//! - false positives are not errors at all — they travel as
//!   [`Routed::Reroute`](crate::controller::Routed) values and only surface
//!   as `NotMountable` when a host-rooted mount has no enclosing archive to
//!   reroute to.

use std::sync::Arc;

use thiserror::Error;

use arcmount_driver::DriverError;
use arcmount_model::StructuralError;

/// Errors surfaced by federation operations.
#[derive(Debug, Error)]
pub enum FsError {
    /// Illegal path, type conflict, missing parent, read-only violation.
    #[error(transparent)]
    Structural(#[from] StructuralError),

    /// Error from the archive driver or the host adapter.
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// Open streams prevent a requested sync.
    #[error("Archive busy: {streams} open stream(s) at {mount_point}")]
    Busy {
        /// The mount point that could not be synchronized.
        mount_point: String,
        /// Number of streams still open in other threads.
        streams: usize,
    },

    /// Code that assumes write-lock possession was invoked without it.
    ///
    /// Caught by the locking controller, which upgrades the lock and re-runs
    /// the operation. Callers outside the controller chain never see it.
    #[error("Write lock required")]
    NeedsWriteLock,

    /// Invalid combination of sync option flags.
    #[error("Illegal sync options: {reason}")]
    IllegalSyncOptions {
        /// Which constraint was violated.
        reason: &'static str,
    },

    /// A host-rooted mount point turned out not to be an archive.
    ///
    /// This is what a persistent false positive degrades to when there is no
    /// enclosing archive left to reroute to. The cause is shared so that
    /// repeated probes return the same cached exception.
    #[error("Not mountable: {mount_point}: {cause}")]
    NotMountable {
        /// The probed mount point.
        mount_point: String,
        /// The cached mount failure.
        cause: Arc<FsError>,
    },

    /// The stream was force-closed by a sync operation.
    #[error("Stream revoked by forced sync")]
    StreamRevoked,
}

impl FsError {
    /// Whether this failure class may resolve itself without intervention.
    ///
    /// Transient mount failures are never cached by the mount-state machine.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Driver(e) => e.is_transient(),
            Self::Busy { .. } | Self::NeedsWriteLock => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let transient: FsError = DriverError::ConcurrentModification {
            mount_point: "mem:/a/".to_string(),
        }
        .into();
        assert!(transient.is_transient());

        let persistent: FsError = DriverError::NotAnArchive {
            mount_point: "mem:/a/".to_string(),
        }
        .into();
        assert!(!persistent.is_transient());

        let structural: FsError = StructuralError::ReadOnly.into();
        assert!(!structural.is_transient());
    }
}
