//! The controller chain.
//!
//! Each concern is one small decorator around a common contract, composed by
//! ordinary construction rather than subclassing:
//!
//! ```text
//! FederatedController      false-positive rerouting, public facade
//!   └─ CacheController     entry data buffering (LRU)
//!        └─ LockController read/write lock enforcement, upgrade dance
//!             └─ UpdateController  mount state, tree mutations, sync
//! ```
//!
//! Inner layers signal a false positive as a first-class [`Routed::Reroute`]
//! value instead of exception-driven control flow; only the outermost layer
//! consumes it, by re-addressing the same logical path against the enclosing
//! archive's controller.

mod cache;
mod federated;
mod lockctl;
mod update;

pub use cache::CacheController;
pub use federated::FederatedController;
pub use lockctl::LockController;
pub use update::UpdateController;

use std::sync::Arc;

use arcmount_model::{EntryPath, EntryType, Mtime};

use crate::error::FsError;
use crate::model::ArchiveModel;
use crate::options::SyncOptions;
use crate::stream::StreamTicket;

/// A false-positive routing signal.
///
/// Not an error to the caller: the path merely turned out not to be (or not
/// yet to be) a valid archive, and the operation must be re-resolved against
/// the enclosing archive. Only persistent signals are cached by the
/// mount-state machine; transient ones are re-probed on every call.
#[derive(Debug, Clone)]
pub struct FalsePositive {
    /// The mount failure that triggered the reroute. Shared so repeated
    /// probes of a cached false positive return the same exception.
    pub cause: Arc<FsError>,
    /// Whether the failure class is definitive.
    pub persistent: bool,
}

/// Outcome of an inner controller operation: either a result, or an
/// instruction to reroute the call to the enclosing archive.
pub enum Routed<T> {
    /// The operation completed against this archive.
    Done(T),
    /// The path is a false positive; re-resolve against the enclosing
    /// archive.
    Reroute(FalsePositive),
}

impl<T> Routed<T> {
    /// Map the success value.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Routed<U> {
        match self {
            Routed::Done(value) => Routed::Done(f(value)),
            Routed::Reroute(fp) => Routed::Reroute(fp),
        }
    }
}

/// Result of a stat query.
#[derive(Debug, Clone, Copy)]
pub struct Stat {
    /// Entry type.
    pub kind: EntryType,
    /// Size in bytes, 0 for directories.
    pub size: u64,
    /// Modification time.
    pub mtime: Mtime,
}

/// A benign, data-preserving constraint violation recorded during sync.
#[derive(Debug, Clone)]
pub struct SyncWarning {
    /// Human-readable description of what was compromised.
    pub detail: String,
}

/// The common contract of every layer in the controller chain.
///
/// Path arguments are normalized paths relative to this archive's mount
/// point. All operations may reroute; `sync` never does (an unmounted or
/// false-positive archive simply has nothing to flush).
pub trait ArchiveController: Send + Sync {
    /// The archive model shared by the whole chain.
    fn model(&self) -> &Arc<ArchiveModel>;

    /// Look up type, size and mtime of an entry. `None` when absent.
    fn stat(&self, path: &EntryPath) -> Result<Routed<Option<Stat>>, FsError>;

    /// List child names of a directory in insertion order.
    fn list(&self, path: &EntryPath) -> Result<Routed<Vec<String>>, FsError>;

    /// Create a file or directory entry.
    fn mknod(
        &self,
        path: &EntryPath,
        kind: EntryType,
        create_parents: bool,
    ) -> Result<Routed<()>, FsError>;

    /// Remove an entry.
    fn unlink(&self, path: &EntryPath) -> Result<Routed<()>, FsError>;

    /// Set the modification time of an entry.
    fn set_mtime(&self, path: &EntryPath, mtime: Mtime) -> Result<Routed<()>, FsError>;

    /// Read the complete data of a file entry.
    fn read(&self, path: &EntryPath) -> Result<Routed<Arc<Vec<u8>>>, FsError>;

    /// Create or replace a file entry with the given data.
    fn write(&self, path: &EntryPath, data: Arc<Vec<u8>>) -> Result<Routed<()>, FsError>;

    /// Open a tracked input stream over a file entry's data.
    fn open_input(
        &self,
        path: &EntryPath,
    ) -> Result<Routed<(Arc<Vec<u8>>, StreamTicket)>, FsError>;

    /// Register a tracked output stream for a file entry.
    fn open_output(&self, path: &EntryPath) -> Result<Routed<StreamTicket>, FsError>;

    /// Flush all pending changes back to the underlying container.
    ///
    /// # Returns
    /// Benign warnings; hard failures are returned as errors.
    fn sync(&self, options: &SyncOptions) -> Result<Vec<SyncWarning>, FsError>;
}
