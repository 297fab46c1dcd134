//! Per-archive mutable record: the archive model.

use std::sync::atomic::{AtomicBool, Ordering};

use arcmount_model::MountPoint;

use crate::error::FsError;
use crate::lock::ReentrantRwLock;

/// Mutable record of one live mount point.
///
/// Owned exclusively by its controller chain; the registry guarantees at most
/// one instance per mount point. The `touched` flag mirrors whether the
/// mounted tree differs from its last-synchronized state and drives the
/// registry's pinned/collectible ownership switch. The enclosing archive is
/// not stored here; it is resolved through the registry from the mount
/// point's nesting, so a collected and rebuilt parent chain can never leave a
/// dangling model behind.
#[derive(Debug)]
pub struct ArchiveModel {
    mount_point: MountPoint,
    lock: ReentrantRwLock,
    touched: AtomicBool,
}

impl ArchiveModel {
    /// Create the model for a mount point.
    ///
    /// # Arguments
    /// * `mount_point` - Canonical identity of the archive
    pub fn new(mount_point: MountPoint) -> Self {
        Self {
            mount_point,
            lock: ReentrantRwLock::new(),
            touched: AtomicBool::new(false),
        }
    }

    /// The mount point this model belongs to.
    pub fn mount_point(&self) -> &MountPoint {
        &self.mount_point
    }

    /// The reentrant read/write lock pair of this archive.
    pub fn lock(&self) -> &ReentrantRwLock {
        &self.lock
    }

    /// Whether the mounted tree differs from its last-synchronized state.
    pub fn is_touched(&self) -> bool {
        self.touched.load(Ordering::Acquire)
    }

    /// Record whether the archive holds un-synchronized changes.
    pub fn set_touched(&self, touched: bool) {
        self.touched.store(touched, Ordering::Release);
    }

    /// Guard operation: signal `NeedsWriteLock` when code that assumes write
    /// lock possession runs without it.
    ///
    /// The locking controller catches the signal and performs the upgrade
    /// dance; end users never observe it.
    pub fn assert_write_locked(&self) -> Result<(), FsError> {
        if self.lock.write_held() {
            Ok(())
        } else {
            Err(FsError::NeedsWriteLock)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_signals_without_write_lock() {
        let mp: MountPoint = MountPoint::rooted("mem:/a.zip").unwrap();
        let model: ArchiveModel = ArchiveModel::new(mp);
        assert!(matches!(
            model.assert_write_locked(),
            Err(FsError::NeedsWriteLock)
        ));

        model.lock().lock_write();
        assert!(model.assert_write_locked().is_ok());
        model.lock().unlock_write();
    }

    #[test]
    fn test_touched_flag() {
        let mp: MountPoint = MountPoint::rooted("mem:/a.zip").unwrap();
        let model: ArchiveModel = ArchiveModel::new(mp);
        assert!(!model.is_touched());
        model.set_touched(true);
        assert!(model.is_touched());
    }
}
