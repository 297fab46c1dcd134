//! Container and byte-level interfaces consumed by the federation core.

use arcmount_model::{Entry, EntryPath};

use crate::error::DriverError;

/// Read side of one archive file's raw bytes.
pub trait ByteSource: Send + Sync {
    /// Read the complete byte image of the archive file.
    fn read(&self) -> Result<Vec<u8>, DriverError>;
}

/// Write side of one archive file's raw bytes.
pub trait ByteSink: Send + Sync {
    /// Replace the complete byte image of the archive file.
    fn write(&self, data: &[u8]) -> Result<(), DriverError>;
}

/// A decoded archive opened for reading.
///
/// The federation core never interprets archive bytes itself; it enumerates
/// entries to build the entry tree and streams per-entry data on demand.
pub trait InputContainer: Send + Sync {
    /// Enumerate all entries in container order.
    fn entries(&self) -> Vec<Entry>;

    /// Whether an entry with the path exists.
    fn contains(&self, path: &EntryPath) -> bool;

    /// Read the data of one entry.
    ///
    /// # Arguments
    /// * `path` - Entry path within the archive
    fn data(&self, path: &EntryPath) -> Result<Vec<u8>, DriverError>;
}

/// An archive being assembled for writing.
///
/// Entries are put in any order; `finish` encodes the container and commits
/// it to the sink exactly once.
pub trait OutputContainer: Send {
    /// Add one entry, with data for files.
    ///
    /// # Arguments
    /// * `entry` - Entry metadata to record
    /// * `data` - File data, `None` for directories
    fn put(&mut self, entry: &Entry, data: Option<&[u8]>) -> Result<(), DriverError>;

    /// Whether an entry with the path has already been put.
    fn contains(&self, path: &EntryPath) -> bool;

    /// Encode and commit the container to its sink.
    fn finish(&mut self) -> Result<(), DriverError>;
}
