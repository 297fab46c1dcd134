//! Federation core of arcmount.
//!
//! Presents archive files as directory trees. Each mounted archive is driven
//! by a chain of controllers layering false-positive rerouting, entry data
//! caching, lock enforcement and mount/sync bookkeeping over the structural
//! model of `arcmount-model` and the container drivers of `arcmount-driver`.
//! The [`Federation`] facade ties the chains together through a process-wide
//! registry and provides per-path convenience operations plus scoped,
//! child-before-parent synchronization.

pub mod controller;
pub mod error;
pub mod federation;
pub mod lock;
pub mod model;
pub mod mount;
pub mod options;
pub mod registry;
pub mod stream;
pub mod sync;

pub use controller::{FalsePositive, FederatedController, Routed, Stat, SyncWarning};
pub use error::FsError;
pub use federation::{Federation, InputStream, OutputStream};
pub use model::ArchiveModel;
pub use options::SyncOptions;
pub use registry::ControllerRegistry;
pub use stream::{StreamKind, StreamTicket};
pub use sync::{SyncError, SyncIssue, SyncReport};
