//! The federation facade and its shared context.

use std::io::{self, Read, Write};
use std::num::NonZeroUsize;
use std::sync::Arc;

use tracing::warn;

use arcmount_driver::{ArchiveDriver, HostFileSystem};
use arcmount_model::{EntryPath, EntryType, MountPoint, Mtime};

use crate::controller::{
    CacheController, FederatedController, LockController, Stat, UpdateController,
};
use crate::error::FsError;
use crate::model::ArchiveModel;
use crate::options::SyncOptions;
use crate::registry::ControllerRegistry;
use crate::stream::StreamTicket;
use crate::sync::{sync_scope, SyncReport};

const DEFAULT_CACHE_CAPACITY: usize = 64;

/// Shared state behind every controller chain: the registry, the archive
/// driver, and the host file-system adapter.
pub struct FsContext {
    registry: ControllerRegistry,
    driver: Arc<dyn ArchiveDriver>,
    host: Arc<dyn HostFileSystem>,
    cache_capacity: NonZeroUsize,
}

impl FsContext {
    pub(crate) fn registry(&self) -> &ControllerRegistry {
        &self.registry
    }

    pub(crate) fn driver(&self) -> &dyn ArchiveDriver {
        self.driver.as_ref()
    }

    pub(crate) fn host(&self) -> &dyn HostFileSystem {
        self.host.as_ref()
    }

    /// Resolve the controller chain of a mount point, building it on first
    /// use.
    ///
    /// The enclosing archive's chain is not built here; controllers resolve
    /// their parent through this method when an operation actually crosses
    /// the boundary. A lost race against a concurrent build returns the
    /// winner's chain; the registry keeps at most one live chain per mount
    /// point.
    pub(crate) fn controller(
        self: &Arc<Self>,
        mount_point: &MountPoint,
    ) -> Arc<FederatedController> {
        if let Some(existing) = self.registry.get(mount_point) {
            return existing;
        }
        let model: Arc<ArchiveModel> = Arc::new(ArchiveModel::new(mount_point.clone()));
        let update = UpdateController::new(Arc::clone(self), model);
        let lock = LockController::new(Box::new(update));
        let cache = CacheController::new(Box::new(lock), self.cache_capacity);
        let federated: Arc<FederatedController> =
            Arc::new(FederatedController::new(Arc::clone(self), Box::new(cache)));
        self.registry.insert_if_absent(mount_point, federated)
    }
}

/// Entry point of the archive federation.
///
/// Presents archive files as directory trees through a per-path convenience
/// API. All operations address one mount point plus a path relative to it;
/// nested mount points federate transparently, including the false-positive
/// fallback to the enclosing archive's plain entries.
pub struct Federation {
    ctx: Arc<FsContext>,
}

impl Federation {
    /// Create a federation over a driver and a host adapter.
    pub fn new(driver: Arc<dyn ArchiveDriver>, host: Arc<dyn HostFileSystem>) -> Self {
        Self::with_cache_capacity(driver, host, DEFAULT_CACHE_CAPACITY)
    }

    /// Create a federation with an explicit per-archive data-cache capacity.
    ///
    /// # Arguments
    /// * `cache_capacity` - Entries per archive; clamped to at least 1
    pub fn with_cache_capacity(
        driver: Arc<dyn ArchiveDriver>,
        host: Arc<dyn HostFileSystem>,
        cache_capacity: usize,
    ) -> Self {
        let cache_capacity: NonZeroUsize =
            NonZeroUsize::new(cache_capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            ctx: Arc::new(FsContext {
                registry: ControllerRegistry::new(),
                driver,
                host,
                cache_capacity,
            }),
        }
    }

    /// Resolve the controller chain of a mount point.
    pub fn controller(&self, mount_point: &MountPoint) -> Arc<FederatedController> {
        self.ctx.controller(mount_point)
    }

    /// Look up type, size and mtime of an entry. `None` when absent.
    pub fn stat(
        &self,
        mount_point: &MountPoint,
        path: &EntryPath,
    ) -> Result<Option<Stat>, FsError> {
        self.controller(mount_point).stat(path)
    }

    /// Whether an entry exists.
    ///
    /// A host-rooted path that is not an archive at all answers `false`
    /// rather than failing.
    pub fn exists(&self, mount_point: &MountPoint, path: &EntryPath) -> Result<bool, FsError> {
        match self.stat(mount_point, path) {
            Ok(stat) => Ok(stat.is_some()),
            Err(FsError::NotMountable { .. }) => Ok(false),
            Err(cause) => Err(cause),
        }
    }

    /// Whether an entry exists and is a file.
    pub fn is_file(&self, mount_point: &MountPoint, path: &EntryPath) -> Result<bool, FsError> {
        match self.stat(mount_point, path) {
            Ok(stat) => Ok(matches!(
                stat,
                Some(Stat {
                    kind: EntryType::File,
                    ..
                })
            )),
            Err(FsError::NotMountable { .. }) => Ok(false),
            Err(cause) => Err(cause),
        }
    }

    /// Whether an entry exists and is a directory.
    pub fn is_directory(
        &self,
        mount_point: &MountPoint,
        path: &EntryPath,
    ) -> Result<bool, FsError> {
        match self.stat(mount_point, path) {
            Ok(stat) => Ok(matches!(
                stat,
                Some(Stat {
                    kind: EntryType::Directory,
                    ..
                })
            )),
            Err(FsError::NotMountable { .. }) => Ok(false),
            Err(cause) => Err(cause),
        }
    }

    /// Size of a file entry in bytes.
    pub fn length(&self, mount_point: &MountPoint, path: &EntryPath) -> Result<u64, FsError> {
        match self.stat(mount_point, path)? {
            Some(stat) => Ok(stat.size),
            None => Err(self.not_found(path)),
        }
    }

    /// Modification time of an entry.
    pub fn last_modified(
        &self,
        mount_point: &MountPoint,
        path: &EntryPath,
    ) -> Result<Mtime, FsError> {
        match self.stat(mount_point, path)? {
            Some(stat) => Ok(stat.mtime),
            None => Err(self.not_found(path)),
        }
    }

    /// List child names of a directory in insertion order.
    pub fn list(
        &self,
        mount_point: &MountPoint,
        path: &EntryPath,
    ) -> Result<Vec<String>, FsError> {
        self.controller(mount_point).list(path)
    }

    /// Set the modification time of an entry.
    pub fn set_last_modified(
        &self,
        mount_point: &MountPoint,
        path: &EntryPath,
        mtime: Mtime,
    ) -> Result<(), FsError> {
        self.controller(mount_point).set_mtime(path, mtime)
    }

    /// Create an empty file entry. The parent directory must exist.
    pub fn create_file(
        &self,
        mount_point: &MountPoint,
        path: &EntryPath,
    ) -> Result<(), FsError> {
        self.controller(mount_point)
            .mknod(path, EntryType::File, false)
    }

    /// Create a directory entry.
    ///
    /// # Arguments
    /// * `create_parents` - Create missing ancestor directories as well
    pub fn mkdir(
        &self,
        mount_point: &MountPoint,
        path: &EntryPath,
        create_parents: bool,
    ) -> Result<(), FsError> {
        self.controller(mount_point)
            .mknod(path, EntryType::Directory, create_parents)
    }

    /// Remove a file or an empty directory.
    pub fn delete(&self, mount_point: &MountPoint, path: &EntryPath) -> Result<(), FsError> {
        self.controller(mount_point).unlink(path)
    }

    /// Read the complete data of a file entry.
    pub fn read(
        &self,
        mount_point: &MountPoint,
        path: &EntryPath,
    ) -> Result<Arc<Vec<u8>>, FsError> {
        self.controller(mount_point).read(path)
    }

    /// Create or replace a file entry with the given data, creating missing
    /// parent directories.
    pub fn write(
        &self,
        mount_point: &MountPoint,
        path: &EntryPath,
        data: Vec<u8>,
    ) -> Result<(), FsError> {
        self.controller(mount_point).write(path, Arc::new(data))
    }

    /// Open a tracked read stream over a file entry.
    pub fn new_input_stream(
        &self,
        mount_point: &MountPoint,
        path: &EntryPath,
    ) -> Result<InputStream, FsError> {
        let (data, ticket) = self.controller(mount_point).open_input(path)?;
        Ok(InputStream {
            data,
            pos: 0,
            ticket,
        })
    }

    /// Open a tracked write stream for a file entry.
    ///
    /// The data is committed when the stream is [closed](OutputStream::close);
    /// a dropped stream discards its buffer.
    pub fn new_output_stream(
        &self,
        mount_point: &MountPoint,
        path: &EntryPath,
    ) -> Result<OutputStream, FsError> {
        let controller: Arc<FederatedController> = self.controller(mount_point);
        let ticket: StreamTicket = controller.open_output(path)?;
        Ok(OutputStream {
            controller,
            path: path.clone(),
            buf: Vec::new(),
            ticket,
            committed: false,
        })
    }

    /// Synchronize every live mount point under a URI prefix, children
    /// first.
    pub fn sync(&self, prefix: &str, options: &SyncOptions) -> Result<SyncReport, FsError> {
        sync_scope(&self.ctx, prefix, options)
    }

    /// Synchronize every live mount point.
    pub fn sync_all(&self, options: &SyncOptions) -> Result<SyncReport, FsError> {
        self.sync("", options)
    }

    fn not_found(&self, path: &EntryPath) -> FsError {
        arcmount_model::StructuralError::not_found(path.as_str()).into()
    }
}

/// Tracked read stream over an entry's data snapshot.
///
/// The snapshot is immutable; a concurrent sync that force-closes stranger
/// streams revokes the ticket, after which reads fail.
pub struct InputStream {
    data: Arc<Vec<u8>>,
    pos: usize,
    ticket: StreamTicket,
}

impl Read for InputStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.ticket.is_revoked() {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "stream force-closed by sync",
            ));
        }
        let remaining: &[u8] = &self.data[self.pos..];
        let n: usize = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.pos += n;
        Ok(n)
    }
}

/// Tracked write stream buffering entry data until closed.
pub struct OutputStream {
    controller: Arc<FederatedController>,
    path: EntryPath,
    buf: Vec<u8>,
    ticket: StreamTicket,
    committed: bool,
}

impl OutputStream {
    /// Commit the buffered data as the entry's new content.
    pub fn close(mut self) -> Result<(), FsError> {
        if self.ticket.is_revoked() {
            return Err(FsError::StreamRevoked);
        }
        self.committed = true;
        let data: Vec<u8> = std::mem::take(&mut self.buf);
        self.controller.write(&self.path, Arc::new(data))
    }
}

impl Write for OutputStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.ticket.is_revoked() {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "stream force-closed by sync",
            ));
        }
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for OutputStream {
    fn drop(&mut self) {
        if !self.committed && !self.buf.is_empty() {
            warn!(path = %self.path, "output stream dropped without close; data discarded");
        }
    }
}
