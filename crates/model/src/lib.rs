//! Entry tree model for the arcmount archive federation.
//!
//! This crate is the leaf of the workspace: path normalization, entry types,
//! and the in-memory file system of one archive. It carries no concurrency
//! control of its own; the owning archive model's locks mediate all access.

pub mod entry;
pub mod error;
pub mod path;
pub mod tree;

pub use entry::{Entry, EntryType, Mtime, NameSet};
pub use error::StructuralError;
pub use path::{EntryPath, MountPoint, Nesting};
pub use tree::EntryTree;
