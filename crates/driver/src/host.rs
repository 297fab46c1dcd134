//! Host file system adapter.

use arcmount_model::MountPoint;

use crate::container::{ByteSink, ByteSource};
use crate::error::DriverError;

/// Byte-level access to archive files rooted in the host file system.
///
/// Only mount points without an enclosing archive go through this adapter;
/// nested archives read and write their bytes through the enclosing
/// controller instead.
pub trait HostFileSystem: Send + Sync {
    /// Open the bytes of a host-rooted archive file for reading.
    fn source(&self, mount_point: &MountPoint) -> Result<Box<dyn ByteSource>, DriverError>;

    /// Open the bytes of a host-rooted archive file for writing.
    fn sink(&self, mount_point: &MountPoint) -> Result<Box<dyn ByteSink>, DriverError>;

    /// Whether anything exists at the mount point.
    fn exists(&self, mount_point: &MountPoint) -> bool;

    /// Whether the mount point can be written.
    fn is_writable(&self, mount_point: &MountPoint) -> bool;
}
