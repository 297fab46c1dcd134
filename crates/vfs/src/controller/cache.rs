//! LRU data-cache controller layer.
//!
//! Buffers the data of recently read file entries so repeated reads of the
//! same entry skip the container. Any mutation invalidates: writes and
//! unlinks evict the affected path, sync drops the whole cache.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::trace;

use arcmount_model::{EntryPath, EntryType, Mtime};

use crate::controller::{ArchiveController, Routed, Stat, SyncWarning};
use crate::error::FsError;
use crate::model::ArchiveModel;
use crate::options::SyncOptions;
use crate::stream::StreamTicket;

pub struct CacheController {
    inner: Box<dyn ArchiveController>,
    model: Arc<ArchiveModel>,
    cache: Mutex<LruCache<EntryPath, Arc<Vec<u8>>>>,
    /// Bumped after every mutation completes. A read records the generation
    /// before going to the inner layer and only inserts the result if no
    /// mutation finished while the fill was in flight, so a buffer read under
    /// a read lock that a writer was waiting on is never re-inserted over the
    /// writer's data.
    generation: AtomicU64,
}

impl CacheController {
    /// # Arguments
    /// * `inner` - Next layer of the chain
    /// * `capacity` - Maximum number of cached entry buffers
    pub fn new(inner: Box<dyn ArchiveController>, capacity: NonZeroUsize) -> Self {
        let model: Arc<ArchiveModel> = Arc::clone(inner.model());
        Self {
            inner,
            model,
            cache: Mutex::new(LruCache::new(capacity)),
            generation: AtomicU64::new(0),
        }
    }

    fn invalidate(&self, path: &EntryPath) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.cache.lock().pop(path);
    }

    fn invalidate_all(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.cache.lock().clear();
    }
}

impl ArchiveController for CacheController {
    fn model(&self) -> &Arc<ArchiveModel> {
        &self.model
    }

    fn stat(&self, path: &EntryPath) -> Result<Routed<Option<Stat>>, FsError> {
        self.inner.stat(path)
    }

    fn list(&self, path: &EntryPath) -> Result<Routed<Vec<String>>, FsError> {
        self.inner.list(path)
    }

    fn mknod(
        &self,
        path: &EntryPath,
        kind: EntryType,
        create_parents: bool,
    ) -> Result<Routed<()>, FsError> {
        let routed: Routed<()> = self.inner.mknod(path, kind, create_parents)?;
        self.invalidate(path);
        Ok(routed)
    }

    fn unlink(&self, path: &EntryPath) -> Result<Routed<()>, FsError> {
        let routed: Routed<()> = self.inner.unlink(path)?;
        self.invalidate(path);
        Ok(routed)
    }

    fn set_mtime(&self, path: &EntryPath, mtime: Mtime) -> Result<Routed<()>, FsError> {
        self.inner.set_mtime(path, mtime)
    }

    fn read(&self, path: &EntryPath) -> Result<Routed<Arc<Vec<u8>>>, FsError> {
        if let Some(data) = self.cache.lock().get(path) {
            trace!(path = %path, "data cache hit");
            return Ok(Routed::Done(Arc::clone(data)));
        }
        let before: u64 = self.generation.load(Ordering::Acquire);
        let routed: Routed<Arc<Vec<u8>>> = self.inner.read(path)?;
        if let Routed::Done(data) = &routed {
            if self.generation.load(Ordering::Acquire) == before {
                self.cache.lock().put(path.clone(), Arc::clone(data));
            }
        }
        Ok(routed)
    }

    fn write(&self, path: &EntryPath, data: Arc<Vec<u8>>) -> Result<Routed<()>, FsError> {
        // Evict only after the inner layer has applied the mutation. Evicting
        // first opens a window where a racing read refills the old bytes at
        // an unchanged generation and the stale buffer survives the write.
        let routed: Routed<()> = self.inner.write(path, data)?;
        self.invalidate(path);
        Ok(routed)
    }

    fn open_input(
        &self,
        path: &EntryPath,
    ) -> Result<Routed<(Arc<Vec<u8>>, StreamTicket)>, FsError> {
        self.inner.open_input(path)
    }

    fn open_output(&self, path: &EntryPath) -> Result<Routed<StreamTicket>, FsError> {
        let routed: Routed<StreamTicket> = self.inner.open_output(path)?;
        self.invalidate(path);
        Ok(routed)
    }

    fn sync(&self, options: &SyncOptions) -> Result<Vec<SyncWarning>, FsError> {
        let warnings: Vec<SyncWarning> = self.inner.sync(options)?;
        self.invalidate_all();
        Ok(warnings)
    }
}
