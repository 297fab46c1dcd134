//! External collaborator interfaces for the arcmount federation core.
//!
//! The core consumes archives through two seams: the [`ArchiveDriver`], which
//! knows how to read and write entries of one specific format, and the
//! [`HostFileSystem`], which provides byte-level access to archive files
//! rooted in the host. Both are specified here as traits; the [`memory`]
//! module carries complete in-memory implementations used by tests and demos.

pub mod container;
pub mod driver;
pub mod error;
pub mod host;
pub mod memory;

pub use container::{ByteSink, ByteSource, InputContainer, OutputContainer};
pub use driver::ArchiveDriver;
pub use error::DriverError;
pub use host::HostFileSystem;
pub use memory::{MemoryDriver, MemoryHost};
