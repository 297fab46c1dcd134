//! The archive driver contract.

use arcmount_model::{Entry, EntryPath, EntryType, MountPoint};

use crate::container::{ByteSink, ByteSource, InputContainer, OutputContainer};
use crate::error::DriverError;

/// Codec collaborator that knows how to read and write one archive format.
///
/// The federation core is format-agnostic: it materializes containers through
/// this trait and never touches archive bytes directly. Icon and UI metadata
/// hooks of the original driver contract are intentionally absent.
pub trait ArchiveDriver: Send + Sync {
    /// Open the bytes at a mount point as an input container.
    ///
    /// # Arguments
    /// * `mount_point` - Identity of the archive being mounted
    /// * `source` - Raw bytes of the archive file
    ///
    /// # Errors
    /// `NotAnArchive` when the bytes are not in this driver's format;
    /// `ConcurrentModification` when the source changed mid-read.
    fn new_input_container(
        &self,
        mount_point: &MountPoint,
        source: &dyn ByteSource,
    ) -> Result<Box<dyn InputContainer>, DriverError>;

    /// Start assembling an output container for a mount point.
    ///
    /// # Arguments
    /// * `mount_point` - Identity of the archive being written
    /// * `sink` - Destination for the encoded bytes
    /// * `source` - The current input container, when re-writing an existing
    ///   archive; entries can be streamed through from it unchanged
    fn new_output_container(
        &self,
        mount_point: &MountPoint,
        sink: Box<dyn ByteSink>,
        source: Option<&dyn InputContainer>,
    ) -> Result<Box<dyn OutputContainer>, DriverError>;

    /// Create a new entry object for this format.
    ///
    /// # Arguments
    /// * `path` - Entry path within the archive
    /// * `kind` - File or directory
    /// * `template` - Optional entry to copy size and time from
    fn new_entry(&self, path: EntryPath, kind: EntryType, template: Option<&Entry>) -> Entry;
}
