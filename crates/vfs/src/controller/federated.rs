//! Outermost controller layer: false-positive rerouting.
//!
//! The only layer that consumes [`Routed::Reroute`]. A rerouted operation is
//! re-addressed to the enclosing archive's controller under the member path
//! of the false positive, so `a.zip/inner.zip/x` transparently degrades to
//! the plain entry `inner.zip/x` of `a.zip` when `inner.zip` turns out not
//! to be an archive. Host-rooted mounts have nowhere to reroute to; there
//! the original mount failure surfaces.

use std::sync::Arc;

use tracing::debug;

use arcmount_model::{EntryPath, EntryType, Mtime};

use crate::controller::{ArchiveController, FalsePositive, Routed, Stat, SyncWarning};
use crate::error::FsError;
use crate::federation::FsContext;
use crate::model::ArchiveModel;
use crate::options::SyncOptions;
use crate::stream::StreamTicket;

pub struct FederatedController {
    ctx: Arc<FsContext>,
    model: Arc<ArchiveModel>,
    inner: Box<dyn ArchiveController>,
}

impl FederatedController {
    pub fn new(ctx: Arc<FsContext>, inner: Box<dyn ArchiveController>) -> Self {
        let model: Arc<ArchiveModel> = Arc::clone(inner.model());
        Self { ctx, model, inner }
    }

    /// The archive model shared by the whole chain.
    pub fn model(&self) -> &Arc<ArchiveModel> {
        &self.model
    }

    /// Resolve a reroute signal: retry against the enclosing archive, or
    /// surface the mount failure when there is none.
    fn reroute<T>(
        &self,
        fp: FalsePositive,
        op: impl FnOnce(&FederatedController, &EntryPath) -> Result<T, FsError>,
        path: &EntryPath,
    ) -> Result<T, FsError> {
        match self.model.mount_point().nesting() {
            Some(nesting) => {
                let parent: Arc<FederatedController> = self.ctx.controller(&nesting.parent);
                let outer: EntryPath = nesting.entry.concat(path);
                debug!(
                    mount_point = %self.model.mount_point(),
                    outer = %outer,
                    "rerouting false positive to enclosing archive"
                );
                op(parent.as_ref(), &outer)
            }
            None => Err(FsError::NotMountable {
                mount_point: self.model.mount_point().uri().to_string(),
                cause: fp.cause,
            }),
        }
    }

    /// Look up type, size and mtime of an entry. `None` when absent.
    pub fn stat(&self, path: &EntryPath) -> Result<Option<Stat>, FsError> {
        match self.inner.stat(path)? {
            Routed::Done(stat) => Ok(stat),
            Routed::Reroute(fp) => self.reroute(fp, |c, p| c.stat(p), path),
        }
    }

    /// List child names of a directory in insertion order.
    pub fn list(&self, path: &EntryPath) -> Result<Vec<String>, FsError> {
        match self.inner.list(path)? {
            Routed::Done(names) => Ok(names),
            Routed::Reroute(fp) => self.reroute(fp, |c, p| c.list(p), path),
        }
    }

    /// Create a file or directory entry.
    pub fn mknod(
        &self,
        path: &EntryPath,
        kind: EntryType,
        create_parents: bool,
    ) -> Result<(), FsError> {
        match self.inner.mknod(path, kind, create_parents)? {
            Routed::Done(()) => Ok(()),
            Routed::Reroute(fp) => {
                self.reroute(fp, |c, p| c.mknod(p, kind, create_parents), path)
            }
        }
    }

    /// Remove an entry.
    pub fn unlink(&self, path: &EntryPath) -> Result<(), FsError> {
        match self.inner.unlink(path)? {
            Routed::Done(()) => Ok(()),
            Routed::Reroute(fp) => self.reroute(fp, |c, p| c.unlink(p), path),
        }
    }

    /// Set the modification time of an entry.
    pub fn set_mtime(&self, path: &EntryPath, mtime: Mtime) -> Result<(), FsError> {
        match self.inner.set_mtime(path, mtime)? {
            Routed::Done(()) => Ok(()),
            Routed::Reroute(fp) => self.reroute(fp, |c, p| c.set_mtime(p, mtime), path),
        }
    }

    /// Read the complete data of a file entry.
    pub fn read(&self, path: &EntryPath) -> Result<Arc<Vec<u8>>, FsError> {
        match self.inner.read(path)? {
            Routed::Done(data) => Ok(data),
            Routed::Reroute(fp) => self.reroute(fp, |c, p| c.read(p), path),
        }
    }

    /// Create or replace a file entry with the given data.
    pub fn write(&self, path: &EntryPath, data: Arc<Vec<u8>>) -> Result<(), FsError> {
        match self.inner.write(path, Arc::clone(&data))? {
            Routed::Done(()) => Ok(()),
            Routed::Reroute(fp) => self.reroute(fp, |c, p| c.write(p, data), path),
        }
    }

    /// Open a tracked input stream over a file entry's data.
    pub fn open_input(
        &self,
        path: &EntryPath,
    ) -> Result<(Arc<Vec<u8>>, StreamTicket), FsError> {
        match self.inner.open_input(path)? {
            Routed::Done(opened) => Ok(opened),
            Routed::Reroute(fp) => self.reroute(fp, |c, p| c.open_input(p), path),
        }
    }

    /// Register a tracked output stream for a file entry.
    pub fn open_output(&self, path: &EntryPath) -> Result<StreamTicket, FsError> {
        match self.inner.open_output(path)? {
            Routed::Done(ticket) => Ok(ticket),
            Routed::Reroute(fp) => self.reroute(fp, |c, p| c.open_output(p), path),
        }
    }

    /// Flush all pending changes back to the underlying container.
    ///
    /// Never reroutes; an unmounted or false-positive archive has nothing
    /// to flush.
    pub fn sync(&self, options: &SyncOptions) -> Result<Vec<SyncWarning>, FsError> {
        self.inner.sync(options)
    }
}
