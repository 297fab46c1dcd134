//! Lock-enforcing controller layer.
//!
//! Every operation runs under the archive's reentrant read-write lock. Read
//! operations take the shared side first; when a layer below signals that it
//! needs the exclusive side, the holder's shared acquisitions are released,
//! the exclusive side is taken, the shared acquisitions are restored, and the
//! operation runs again. The released window means another thread may have
//! mutated the archive in between, so the rerun re-validates from scratch.

use std::sync::Arc;

use arcmount_model::{EntryPath, EntryType, Mtime};

use crate::controller::{ArchiveController, Routed, Stat, SyncWarning};
use crate::error::FsError;
use crate::model::ArchiveModel;
use crate::options::SyncOptions;
use crate::stream::StreamTicket;

pub struct LockController {
    inner: Box<dyn ArchiveController>,
    model: Arc<ArchiveModel>,
}

impl LockController {
    pub fn new(inner: Box<dyn ArchiveController>) -> Self {
        let model: Arc<ArchiveModel> = Arc::clone(inner.model());
        Self { inner, model }
    }

    /// Run an operation under the shared lock, upgrading on demand.
    fn read_op<R>(
        &self,
        op: impl Fn(&dyn ArchiveController) -> Result<R, FsError>,
    ) -> Result<R, FsError> {
        let lock = self.model.lock();
        lock.lock_read();
        let result: Result<R, FsError> = op(self.inner.as_ref());
        lock.unlock_read();
        match result {
            Err(FsError::NeedsWriteLock) => self.upgrade_op(op),
            other => other,
        }
    }

    /// The upgrade dance: drop every shared hold of this thread, take the
    /// exclusive lock, restore the holds, and rerun the operation.
    fn upgrade_op<R>(
        &self,
        op: impl Fn(&dyn ArchiveController) -> Result<R, FsError>,
    ) -> Result<R, FsError> {
        let lock = self.model.lock();
        let holds: usize = lock.read_holds();
        for _ in 0..holds {
            lock.unlock_read();
        }
        lock.lock_write();
        for _ in 0..holds {
            lock.lock_read();
        }
        let result: Result<R, FsError> = op(self.inner.as_ref());
        lock.unlock_write();
        result
    }

    /// Run an operation under the exclusive lock.
    fn write_op<R>(
        &self,
        op: impl FnOnce(&dyn ArchiveController) -> Result<R, FsError>,
    ) -> Result<R, FsError> {
        let lock = self.model.lock();
        lock.lock_write();
        let result: Result<R, FsError> = op(self.inner.as_ref());
        lock.unlock_write();
        result
    }
}

impl ArchiveController for LockController {
    fn model(&self) -> &Arc<ArchiveModel> {
        &self.model
    }

    fn stat(&self, path: &EntryPath) -> Result<Routed<Option<Stat>>, FsError> {
        self.read_op(|inner| inner.stat(path))
    }

    fn list(&self, path: &EntryPath) -> Result<Routed<Vec<String>>, FsError> {
        self.read_op(|inner| inner.list(path))
    }

    fn mknod(
        &self,
        path: &EntryPath,
        kind: EntryType,
        create_parents: bool,
    ) -> Result<Routed<()>, FsError> {
        self.write_op(|inner| inner.mknod(path, kind, create_parents))
    }

    fn unlink(&self, path: &EntryPath) -> Result<Routed<()>, FsError> {
        self.write_op(|inner| inner.unlink(path))
    }

    fn set_mtime(&self, path: &EntryPath, mtime: Mtime) -> Result<Routed<()>, FsError> {
        self.write_op(|inner| inner.set_mtime(path, mtime))
    }

    fn read(&self, path: &EntryPath) -> Result<Routed<Arc<Vec<u8>>>, FsError> {
        self.read_op(|inner| inner.read(path))
    }

    fn write(&self, path: &EntryPath, data: Arc<Vec<u8>>) -> Result<Routed<()>, FsError> {
        self.write_op(|inner| inner.write(path, Arc::clone(&data)))
    }

    fn open_input(
        &self,
        path: &EntryPath,
    ) -> Result<Routed<(Arc<Vec<u8>>, StreamTicket)>, FsError> {
        self.read_op(|inner| inner.open_input(path))
    }

    fn open_output(&self, path: &EntryPath) -> Result<Routed<StreamTicket>, FsError> {
        self.write_op(|inner| inner.open_output(path))
    }

    fn sync(&self, options: &SyncOptions) -> Result<Vec<SyncWarning>, FsError> {
        self.write_op(|inner| inner.sync(options))
    }
}
