//! Synchronization option flags.

use std::time::Duration;

use crate::error::FsError;

/// Options controlling a sync operation.
///
/// The busy-stream wait timeout is a tuned parameter, not a derived constant,
/// so it is configurable here rather than hard-wired. `Duration::MAX` waits
/// unconditionally.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Wait for input streams opened by other threads to close.
    pub wait_close_input: bool,
    /// Force-close input streams still open after any wait.
    pub force_close_input: bool,
    /// Wait for output streams opened by other threads to close.
    pub wait_close_output: bool,
    /// Force-close output streams still open after any wait.
    pub force_close_output: bool,
    /// Discard all pending changes instead of flushing them.
    pub abort_changes: bool,
    /// Write a nested archive's updated bytes into its enclosing archive.
    ///
    /// When unset, a touched nested archive keeps its changes in memory and
    /// stays mounted.
    pub reassemble: bool,
    /// Upper bound for each busy-stream wait.
    pub wait_timeout: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            wait_close_input: false,
            force_close_input: false,
            wait_close_output: false,
            force_close_output: false,
            abort_changes: false,
            reassemble: true,
            wait_timeout: Duration::from_millis(50),
        }
    }
}

impl SyncOptions {
    /// Plain flush: no waiting, no forcing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Unmount-style sync: force-close everything, then flush.
    pub fn umount() -> Self {
        Self {
            wait_close_input: true,
            force_close_input: true,
            wait_close_output: true,
            force_close_output: true,
            ..Self::default()
        }
    }

    /// Set the busy-stream wait timeout.
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    /// Validate flag combinations before any work starts.
    ///
    /// `force_close_output` without `force_close_input` would close the
    /// write side of an archive while readers could still be streaming from
    /// the input side of the same rewrite.
    pub fn validate(&self) -> Result<(), FsError> {
        if self.force_close_output && !self.force_close_input {
            return Err(FsError::IllegalSyncOptions {
                reason: "FORCE_CLOSE_OUTPUT requires FORCE_CLOSE_INPUT",
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_force_close_output_requires_input() {
        let options: SyncOptions = SyncOptions {
            force_close_output: true,
            ..SyncOptions::default()
        };
        assert!(matches!(
            options.validate(),
            Err(FsError::IllegalSyncOptions { .. })
        ));

        let options: SyncOptions = SyncOptions {
            force_close_input: true,
            force_close_output: true,
            ..SyncOptions::default()
        };
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_umount_options_are_legal() {
        assert!(SyncOptions::umount().validate().is_ok());
    }
}
