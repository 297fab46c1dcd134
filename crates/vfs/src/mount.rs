//! The mount-state machine.
//!
//! Wraps one archive's entry tree with three states and mediates
//! (re)mounting. `auto_mount` collapses "is this even a valid archive"
//! probing and "materialize it" into one idempotent call: every read-only
//! query goes through it, and a known-bad path answers from the cached
//! exception instead of re-running expensive I/O.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::debug;

use arcmount_driver::InputContainer;
use arcmount_model::EntryTree;

use crate::controller::{FalsePositive, Routed};
use crate::error::FsError;
use crate::model::ArchiveModel;

/// Contents of a mounted archive.
pub struct MountedState {
    /// The in-memory file system.
    pub tree: EntryTree,
    /// The input container the tree was scanned from, kept open so entry
    /// data can be streamed through on demand. `None` for archives created
    /// from scratch.
    pub input: Option<Box<dyn InputContainer>>,
}

/// State of one archive's mount.
pub enum MountState {
    /// No tree mounted.
    Reset,
    /// Tree present; returned unconditionally without re-mounting.
    Mounted(MountedState),
    /// Mounting failed persistently; the cause is cached until an explicit
    /// reset or a successful forced remount.
    FalsePositive(Arc<FsError>),
}

/// The three-state machine guarding one archive's tree.
pub struct MountStateMachine {
    state: Mutex<MountState>,
}

impl MountStateMachine {
    /// Create the machine in the `Reset` state.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MountState::Reset),
        }
    }

    /// Mount the archive if necessary.
    ///
    /// - `Mounted`: returns immediately, no I/O.
    /// - `FalsePositive` without `auto_create`: reroutes with the cached
    ///   cause, without invoking the driver.
    /// - `Reset`, or `FalsePositive` with `auto_create`: requires the write
    ///   lock (guard signal otherwise) and runs `materialize`. On persistent
    ///   failure with `auto_create`, synthesizes an empty tree instead. On any other
    ///   failure the cause is classified: persistent causes are cached in
    ///   `FalsePositive`, transient ones leave the state at `Reset` so the
    ///   next call probes again.
    ///
    /// # Arguments
    /// * `model` - Archive model whose write lock guards the transition
    /// * `auto_create` - Synthesize an empty archive when mounting fails
    /// * `materialize` - Opens the input container and scans the tree
    pub fn auto_mount(
        &self,
        model: &ArchiveModel,
        auto_create: bool,
        materialize: impl FnOnce() -> Result<MountedState, FsError>,
    ) -> Result<Routed<()>, FsError> {
        let mut state: MutexGuard<'_, MountState> = self.state.lock();
        match &*state {
            MountState::Mounted(_) => return Ok(Routed::Done(())),
            MountState::FalsePositive(cause) if !auto_create => {
                return Ok(Routed::Reroute(FalsePositive {
                    cause: Arc::clone(cause),
                    persistent: true,
                }));
            }
            _ => {}
        }

        // Mount-state transitions happen only under the write lock.
        model.assert_write_locked()?;

        match materialize() {
            Ok(mounted) => {
                debug!(mount_point = %model.mount_point(), "mounted");
                *state = MountState::Mounted(mounted);
                Ok(Routed::Done(()))
            }
            Err(cause @ FsError::NeedsWriteLock) => Err(cause),
            Err(cause) if auto_create && !cause.is_transient() => {
                debug!(
                    mount_point = %model.mount_point(),
                    cause = %cause,
                    "synthesized empty archive"
                );
                *state = MountState::Mounted(MountedState {
                    tree: EntryTree::new(),
                    input: None,
                });
                Ok(Routed::Done(()))
            }
            Err(cause) => {
                let persistent: bool = !cause.is_transient();
                let cause: Arc<FsError> = Arc::new(cause);
                if persistent {
                    debug!(
                        mount_point = %model.mount_point(),
                        cause = %cause,
                        "caching persistent false positive"
                    );
                    *state = MountState::FalsePositive(Arc::clone(&cause));
                }
                Ok(Routed::Reroute(FalsePositive { cause, persistent }))
            }
        }
    }

    /// Return to `Reset`, dropping any mounted tree or cached exception.
    pub fn reset(&self) {
        *self.state.lock() = MountState::Reset;
    }

    /// Take the mounted state out, leaving `Reset`.
    pub fn take_mounted(&self) -> Option<MountedState> {
        let mut state: MutexGuard<'_, MountState> = self.state.lock();
        match &*state {
            MountState::Mounted(_) => {
                match std::mem::replace(&mut *state, MountState::Reset) {
                    MountState::Mounted(mounted) => Some(mounted),
                    _ => unreachable!(),
                }
            }
            _ => None,
        }
    }

    /// Whether a tree is currently mounted.
    pub fn is_mounted(&self) -> bool {
        matches!(&*self.state.lock(), MountState::Mounted(_))
    }

    /// Run a closure against the mounted tree.
    ///
    /// # Returns
    /// `None` when nothing is mounted.
    pub fn with_tree<R>(&self, f: impl FnOnce(&EntryTree) -> R) -> Option<R> {
        match &*self.state.lock() {
            MountState::Mounted(mounted) => Some(f(&mounted.tree)),
            _ => None,
        }
    }

    /// Run a closure against the mounted state, mutably.
    pub fn with_mounted_mut<R>(
        &self,
        f: impl FnOnce(&mut MountedState) -> R,
    ) -> Option<R> {
        match &mut *self.state.lock() {
            MountState::Mounted(mounted) => Some(f(mounted)),
            _ => None,
        }
    }
}

impl Default for MountStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use arcmount_driver::DriverError;
    use arcmount_model::MountPoint;

    use super::*;

    fn model() -> ArchiveModel {
        ArchiveModel::new(MountPoint::rooted("mem:/t.zip").unwrap())
    }

    fn not_an_archive() -> FsError {
        DriverError::NotAnArchive {
            mount_point: "mem:/t.zip/".to_string(),
        }
        .into()
    }

    #[test]
    fn test_mount_requires_write_lock() {
        let machine: MountStateMachine = MountStateMachine::new();
        let model: ArchiveModel = model();
        let result = machine.auto_mount(&model, false, || {
            panic!("must not materialize without the write lock")
        });
        assert!(matches!(result, Err(FsError::NeedsWriteLock)));
    }

    #[test]
    fn test_mounted_returns_without_materializing() {
        let machine: MountStateMachine = MountStateMachine::new();
        let model: ArchiveModel = model();
        model.lock().lock_write();
        machine
            .auto_mount(&model, false, || {
                Ok(MountedState {
                    tree: EntryTree::new(),
                    input: None,
                })
            })
            .unwrap();
        model.lock().unlock_write();

        // Second probe: no write lock, no materializer call.
        let result = machine
            .auto_mount(&model, false, || panic!("re-mounted a mounted archive"))
            .unwrap();
        assert!(matches!(result, Routed::Done(())));
    }

    #[test]
    fn test_persistent_failure_is_cached() {
        let machine: MountStateMachine = MountStateMachine::new();
        let model: ArchiveModel = model();

        model.lock().lock_write();
        let result = machine
            .auto_mount(&model, false, || Err(not_an_archive()))
            .unwrap();
        model.lock().unlock_write();
        let fp: FalsePositive = match result {
            Routed::Reroute(fp) => fp,
            Routed::Done(()) => panic!("expected reroute"),
        };
        assert!(fp.persistent);

        // Cached: answered without the write lock and without materializing.
        let result = machine
            .auto_mount(&model, false, || panic!("probed a cached false positive"))
            .unwrap();
        let cached: FalsePositive = match result {
            Routed::Reroute(fp) => fp,
            Routed::Done(()) => panic!("expected reroute"),
        };
        assert!(Arc::ptr_eq(&fp.cause, &cached.cause));
    }

    #[test]
    fn test_transient_failure_is_not_cached() {
        let machine: MountStateMachine = MountStateMachine::new();
        let model: ArchiveModel = model();

        model.lock().lock_write();
        let result = machine
            .auto_mount(&model, false, || {
                Err(DriverError::ConcurrentModification {
                    mount_point: "mem:/t.zip/".to_string(),
                }
                .into())
            })
            .unwrap();
        assert!(matches!(
            result,
            Routed::Reroute(FalsePositive { persistent: false, .. })
        ));

        // Next probe materializes again, still under the write lock.
        let result = machine
            .auto_mount(&model, false, || {
                Ok(MountedState {
                    tree: EntryTree::new(),
                    input: None,
                })
            })
            .unwrap();
        model.lock().unlock_write();
        assert!(matches!(result, Routed::Done(())));
    }

    #[test]
    fn test_auto_create_synthesizes_and_exits_false_positive() {
        let machine: MountStateMachine = MountStateMachine::new();
        let model: ArchiveModel = model();

        model.lock().lock_write();
        machine
            .auto_mount(&model, false, || Err(not_an_archive()))
            .unwrap();
        // Forced remount with auto_create exits the absorbing state.
        let result = machine
            .auto_mount(&model, true, || Err(not_an_archive()))
            .unwrap();
        model.lock().unlock_write();
        assert!(matches!(result, Routed::Done(())));
        assert!(machine.is_mounted());
        assert!(machine.with_tree(EntryTree::is_empty).unwrap());
    }
}
