//! Innermost controller: mount strategy, tree mutations, and sync.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use arcmount_driver::{ByteSink, ByteSource, DriverError, OutputContainer};
use arcmount_model::{Entry, EntryPath, EntryTree, EntryType, Mtime, StructuralError};

use crate::controller::{ArchiveController, Routed, Stat, SyncWarning};
use crate::error::FsError;
use crate::federation::FsContext;
use crate::model::ArchiveModel;
use crate::mount::{MountStateMachine, MountedState};
use crate::options::SyncOptions;
use crate::stream::{StreamKind, StreamPool, StreamTicket};

/// Byte source over an already-materialized buffer.
///
/// Used when a nested archive's bytes come out of the enclosing controller
/// rather than the host adapter.
struct BufferSource(Arc<Vec<u8>>);

impl ByteSource for BufferSource {
    fn read(&self) -> Result<Vec<u8>, DriverError> {
        Ok(self.0.as_ref().clone())
    }
}

/// Byte sink collecting the encoded container image in memory.
///
/// Sync always assembles into a buffer first and delivers the bytes in a
/// second step, so a delivery failure leaves the tree mounted and touched.
#[derive(Clone, Default)]
struct BufferSink {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl ByteSink for BufferSink {
    fn write(&self, data: &[u8]) -> Result<(), DriverError> {
        *self.buf.lock() = data.to_vec();
        Ok(())
    }
}

/// The innermost layer of the controller chain.
///
/// Owns the archive model, the mount-state machine, the staged entry data of
/// pending writes, and the open-stream pool. Every mutation asserts write
/// lock possession through the model's guard operation; the locking
/// controller above consumes the resulting signal.
pub struct UpdateController {
    ctx: Arc<FsContext>,
    model: Arc<ArchiveModel>,
    mount: MountStateMachine,
    /// Data of new or modified file entries, keyed by path, held until sync.
    staged: Mutex<HashMap<EntryPath, Arc<Vec<u8>>>>,
    pool: StreamPool,
}

impl UpdateController {
    /// Create the controller for a mount point.
    pub fn new(ctx: Arc<FsContext>, model: Arc<ArchiveModel>) -> Self {
        Self {
            ctx,
            model,
            mount: MountStateMachine::new(),
            staged: Mutex::new(HashMap::new()),
            pool: StreamPool::new(),
        }
    }

    /// Mount if necessary, materializing through the host or the enclosing
    /// controller.
    fn auto_mount(&self, auto_create: bool) -> Result<Routed<()>, FsError> {
        self.mount
            .auto_mount(&self.model, auto_create, || self.materialize())
    }

    /// Open the input container for this mount point and scan its tree.
    fn materialize(&self) -> Result<MountedState, FsError> {
        let mp = self.model.mount_point().clone();
        match mp.nesting() {
            None => {
                let source: Box<dyn ByteSource> = self.ctx.host().source(&mp)?;
                let input = self.ctx.driver().new_input_container(&mp, source.as_ref())?;
                let read_only: bool = !self.ctx.host().is_writable(&mp);
                let tree: EntryTree = EntryTree::from_scan(input.entries(), read_only);
                Ok(MountedState {
                    tree,
                    input: Some(input),
                })
            }
            Some(nesting) => {
                // The enclosing controller serves the archive's bytes; its
                // errors classify the false positive (missing entry and
                // wrong-kind entries are persistent, busy is transient).
                let parent = self.ctx.controller(&nesting.parent);
                let data: Arc<Vec<u8>> = parent.read(&nesting.entry)?;
                let source: BufferSource = BufferSource(data);
                let input = self.ctx.driver().new_input_container(&mp, &source)?;
                let tree: EntryTree = EntryTree::from_scan(input.entries(), false);
                Ok(MountedState {
                    tree,
                    input: Some(input),
                })
            }
        }
    }

    /// Run a closure against the mounted tree after a successful auto-mount.
    fn with_tree<R>(&self, f: impl FnOnce(&EntryTree) -> R) -> Result<R, FsError> {
        self.mount.with_tree(f).ok_or_else(|| {
            StructuralError::Corrupt {
                path: String::new(),
                detail: "tree unmounted after successful auto-mount",
            }
            .into()
        })
    }

    /// Run a closure against the mounted state after a successful auto-mount.
    fn with_mounted<R>(&self, f: impl FnOnce(&mut MountedState) -> R) -> Result<R, FsError> {
        self.mount.with_mounted_mut(f).ok_or_else(|| {
            StructuralError::Corrupt {
                path: String::new(),
                detail: "tree unmounted after successful auto-mount",
            }
            .into()
        })
    }

    /// Flip the touched flag on and pin this controller in the registry.
    fn mark_touched(&self) {
        if !self.model.is_touched() {
            self.model.set_touched(true);
            self.ctx
                .registry()
                .set_touched(self.model.mount_point(), true);
        }
    }

    /// Flip the touched flag off and make this controller collectible.
    fn clear_touched(&self) {
        self.model.set_touched(false);
        self.ctx
            .registry()
            .set_touched(self.model.mount_point(), false);
    }

    /// Resolve the data of a file entry: staged bytes win, then the input
    /// container, then empty (a file linked but never written).
    fn entry_data(&self, path: &EntryPath) -> Result<Arc<Vec<u8>>, FsError> {
        if let Some(data) = self.staged.lock().get(path) {
            return Ok(Arc::clone(data));
        }
        self.with_mounted(|mounted| {
            match mounted.tree.get(path) {
                None => Err(StructuralError::not_found(path.as_str()).into()),
                Some(entry) if entry.is_directory() => {
                    Err(StructuralError::NotAFile {
                        path: path.as_str().to_string(),
                    }
                    .into())
                }
                Some(_) => match &mounted.input {
                    Some(input) => match input.data(path) {
                        Ok(data) => Ok(Arc::new(data)),
                        Err(DriverError::NoSuchEntry { .. }) => Ok(Arc::new(Vec::new())),
                        Err(e) => Err(e.into()),
                    },
                    None => Ok(Arc::new(Vec::new())),
                },
            }
        })?
    }

    /// Apply the busy-stream policy of one stream direction.
    fn settle_streams(
        &self,
        kind: StreamKind,
        wait: bool,
        force: bool,
        options: &SyncOptions,
        warnings: &mut Vec<SyncWarning>,
    ) -> Result<(), FsError> {
        let remaining: usize = if wait {
            self.pool.wait_for_strangers(kind, options.wait_timeout)
        } else {
            self.pool.strangers(kind)
        };
        if remaining == 0 {
            return Ok(());
        }
        if force {
            let revoked: usize = self.pool.revoke_strangers(kind);
            warnings.push(SyncWarning {
                detail: format!("force-closed {revoked} open {kind:?} stream(s)"),
            });
            Ok(())
        } else {
            Err(FsError::Busy {
                mount_point: self.model.mount_point().uri().to_string(),
                streams: remaining,
            })
        }
    }

    /// Encode the current tree into a fresh container image.
    ///
    /// Ghost directories are skipped; entries already present verbatim in
    /// the output container are left untouched; file data comes from the
    /// staging area or is streamed through from the input container.
    fn assemble(&self, mounted: &mut MountedState) -> Result<Vec<u8>, FsError> {
        let mp = self.model.mount_point().clone();
        let sink: BufferSink = BufferSink::default();
        let mut out: Box<dyn OutputContainer> = self.ctx.driver().new_output_container(
            &mp,
            Box::new(sink.clone()),
            mounted.input.as_deref(),
        )?;

        let staged = self.staged.lock();
        for entry in mounted.tree.entries_sorted() {
            if entry.path().is_root() || entry.is_ghost() {
                continue;
            }
            if out.contains(entry.path()) {
                continue;
            }
            if entry.is_directory() {
                out.put(entry, None)?;
                continue;
            }
            let data: Vec<u8> = match staged.get(entry.path()) {
                Some(data) => data.as_ref().clone(),
                None => match &mounted.input {
                    Some(input) => match input.data(entry.path()) {
                        Ok(data) => data,
                        Err(DriverError::NoSuchEntry { .. }) => Vec::new(),
                        Err(e) => return Err(e.into()),
                    },
                    None => Vec::new(),
                },
            };
            out.put(entry, Some(&data))?;
        }
        drop(staged);

        out.finish()?;
        let bytes: Vec<u8> = std::mem::take(&mut *sink.buf.lock());
        Ok(bytes)
    }

    /// Deliver an assembled image to the host or the enclosing archive.
    fn deliver(&self, bytes: Vec<u8>) -> Result<(), FsError> {
        let mp = self.model.mount_point().clone();
        match mp.nesting() {
            None => {
                let sink: Box<dyn ByteSink> = self.ctx.host().sink(&mp)?;
                sink.write(&bytes)?;
                Ok(())
            }
            Some(nesting) => {
                // Staging the fresh image into the enclosing archive touches
                // it, so a full-scope sync flushes the parent afterwards.
                let parent = self.ctx.controller(&nesting.parent);
                parent.write(&nesting.entry, Arc::new(bytes))
            }
        }
    }
}

impl ArchiveController for UpdateController {
    fn model(&self) -> &Arc<ArchiveModel> {
        &self.model
    }

    fn stat(&self, path: &EntryPath) -> Result<Routed<Option<Stat>>, FsError> {
        if let Routed::Reroute(fp) = self.auto_mount(false)? {
            return Ok(Routed::Reroute(fp));
        }
        let stat: Option<Stat> = self.with_tree(|tree| {
            tree.get(path).map(|entry| Stat {
                kind: entry.kind(),
                size: entry.size(),
                mtime: entry.mtime(),
            })
        })?;
        Ok(Routed::Done(stat))
    }

    fn list(&self, path: &EntryPath) -> Result<Routed<Vec<String>>, FsError> {
        if let Routed::Reroute(fp) = self.auto_mount(false)? {
            return Ok(Routed::Reroute(fp));
        }
        let names: Vec<String> = self.with_tree(|tree| tree.list(path))??;
        Ok(Routed::Done(names))
    }

    fn mknod(
        &self,
        path: &EntryPath,
        kind: EntryType,
        create_parents: bool,
    ) -> Result<Routed<()>, FsError> {
        self.model.assert_write_locked()?;
        if let Routed::Reroute(fp) = self.auto_mount(true)? {
            return Ok(Routed::Reroute(fp));
        }
        let template: Entry = self.ctx.driver().new_entry(path.clone(), kind, None);
        self.with_tree_mut_link(path, kind, create_parents, &template)?;
        if kind == EntryType::File {
            // A file link starts empty even when it replaced an existing
            // file; the old container data must not shine through.
            self.staged.lock().insert(path.clone(), Arc::new(Vec::new()));
        }
        self.mark_touched();
        Ok(Routed::Done(()))
    }

    fn unlink(&self, path: &EntryPath) -> Result<Routed<()>, FsError> {
        self.model.assert_write_locked()?;
        if let Routed::Reroute(fp) = self.auto_mount(false)? {
            return Ok(Routed::Reroute(fp));
        }
        self.with_mounted(|mounted| mounted.tree.unlink(path))??;
        self.staged.lock().remove(path);
        self.mark_touched();
        Ok(Routed::Done(()))
    }

    fn set_mtime(&self, path: &EntryPath, mtime: Mtime) -> Result<Routed<()>, FsError> {
        self.model.assert_write_locked()?;
        if let Routed::Reroute(fp) = self.auto_mount(false)? {
            return Ok(Routed::Reroute(fp));
        }
        self.with_mounted(|mounted| mounted.tree.set_mtime(path, mtime))??;
        self.mark_touched();
        Ok(Routed::Done(()))
    }

    fn read(&self, path: &EntryPath) -> Result<Routed<Arc<Vec<u8>>>, FsError> {
        if let Routed::Reroute(fp) = self.auto_mount(false)? {
            return Ok(Routed::Reroute(fp));
        }
        trace!(path = %path, "reading entry data");
        Ok(Routed::Done(self.entry_data(path)?))
    }

    fn write(&self, path: &EntryPath, data: Arc<Vec<u8>>) -> Result<Routed<()>, FsError> {
        self.model.assert_write_locked()?;
        if let Routed::Reroute(fp) = self.auto_mount(true)? {
            return Ok(Routed::Reroute(fp));
        }
        let mut template: Entry =
            self.ctx
                .driver()
                .new_entry(path.clone(), EntryType::File, None);
        template.set_size(data.len() as u64);
        self.with_tree_mut_link(path, EntryType::File, true, &template)?;
        self.staged.lock().insert(path.clone(), data);
        self.mark_touched();
        Ok(Routed::Done(()))
    }

    fn open_input(
        &self,
        path: &EntryPath,
    ) -> Result<Routed<(Arc<Vec<u8>>, StreamTicket)>, FsError> {
        if let Routed::Reroute(fp) = self.auto_mount(false)? {
            return Ok(Routed::Reroute(fp));
        }
        let data: Arc<Vec<u8>> = self.entry_data(path)?;
        let ticket: StreamTicket = self.pool.register(StreamKind::Input);
        Ok(Routed::Done((data, ticket)))
    }

    fn open_output(&self, path: &EntryPath) -> Result<Routed<StreamTicket>, FsError> {
        self.model.assert_write_locked()?;
        if let Routed::Reroute(fp) = self.auto_mount(true)? {
            return Ok(Routed::Reroute(fp));
        }
        // Reject opening over a directory up front; the data commit happens
        // when the stream is closed.
        if let Some(existing) = self.with_tree(|tree| tree.get(path).cloned())? {
            if existing.is_directory() {
                return Err(StructuralError::NotAFile {
                    path: path.as_str().to_string(),
                }
                .into());
            }
        }
        Ok(Routed::Done(self.pool.register(StreamKind::Output)))
    }

    fn sync(&self, options: &SyncOptions) -> Result<Vec<SyncWarning>, FsError> {
        self.model.assert_write_locked()?;
        let mut warnings: Vec<SyncWarning> = Vec::new();

        self.settle_streams(
            StreamKind::Input,
            options.wait_close_input,
            options.force_close_input,
            options,
            &mut warnings,
        )?;
        self.settle_streams(
            StreamKind::Output,
            options.wait_close_output,
            options.force_close_output,
            options,
            &mut warnings,
        )?;

        if options.abort_changes {
            debug!(mount_point = %self.model.mount_point(), "aborting pending changes");
            self.mount.reset();
            self.staged.lock().clear();
            self.clear_touched();
            return Ok(warnings);
        }

        if !self.model.is_touched() {
            // Nothing to flush; still release the mounted tree.
            self.mount.reset();
            return Ok(warnings);
        }

        if !options.reassemble && self.model.mount_point().nesting().is_some() {
            warn!(
                mount_point = %self.model.mount_point(),
                "nested archive not reassembled; changes retained in memory"
            );
            warnings.push(SyncWarning {
                detail: "nested archive not reassembled; changes retained in memory"
                    .to_string(),
            });
            return Ok(warnings);
        }

        let bytes: Vec<u8> = self.with_mounted(|mounted| self.assemble(mounted))??;
        self.deliver(bytes)?;

        debug!(mount_point = %self.model.mount_point(), "synchronized");
        self.mount.reset();
        self.staged.lock().clear();
        self.clear_touched();
        Ok(warnings)
    }
}

impl UpdateController {
    /// Link an entry under the mounted tree.
    fn with_tree_mut_link(
        &self,
        path: &EntryPath,
        kind: EntryType,
        create_parents: bool,
        template: &Entry,
    ) -> Result<(), FsError> {
        self.with_mounted(|mounted| {
            mounted
                .tree
                .link(path, kind, create_parents, Some(template))
        })??;
        Ok(())
    }
}
