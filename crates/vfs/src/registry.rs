//! Process-wide controller registry.
//!
//! At most one live controller chain per mount point. Ownership is split by
//! the touched flag: a touched controller is pinned with a strong reference
//! because it holds un-synchronized changes, while an untouched one is held
//! weakly and disappears as soon as no caller references it. Losing an
//! untouched controller loses nothing but a re-mountable cache.

use std::sync::{Arc, Weak};

use dashmap::mapref::entry::Entry as SlotEntry;
use dashmap::DashMap;
use tracing::trace;

use arcmount_model::MountPoint;

use crate::controller::FederatedController;

#[derive(Clone)]
enum ControllerSlot {
    /// Strong reference; the controller holds changes that would be lost.
    Pinned(Arc<FederatedController>),
    /// Weak reference; the controller is a pure cache.
    Collectible(Weak<FederatedController>),
}

impl ControllerSlot {
    fn upgrade(&self) -> Option<Arc<FederatedController>> {
        match self {
            ControllerSlot::Pinned(strong) => Some(Arc::clone(strong)),
            ControllerSlot::Collectible(weak) => weak.upgrade(),
        }
    }
}

#[derive(Default)]
pub struct ControllerRegistry {
    map: DashMap<MountPoint, ControllerSlot>,
}

impl ControllerRegistry {
    pub fn new() -> Self {
        Self {
            map: DashMap::new(),
        }
    }

    /// Look up the live controller of a mount point.
    ///
    /// Cleared weak slots are evicted on the way.
    pub fn get(&self, mount_point: &MountPoint) -> Option<Arc<FederatedController>> {
        let slot = self.map.get(mount_point)?;
        match slot.upgrade() {
            Some(controller) => Some(controller),
            None => {
                drop(slot);
                self.map
                    .remove_if(mount_point, |_, slot| slot.upgrade().is_none());
                None
            }
        }
    }

    /// Register a freshly built controller, unless a concurrent build won.
    ///
    /// New controllers start collectible; their first mutation pins them.
    ///
    /// # Returns
    /// The registered controller, which may be the concurrent winner.
    pub fn insert_if_absent(
        &self,
        mount_point: &MountPoint,
        controller: Arc<FederatedController>,
    ) -> Arc<FederatedController> {
        match self.map.entry(mount_point.clone()) {
            SlotEntry::Occupied(mut occupied) => match occupied.get().upgrade() {
                Some(winner) => winner,
                None => {
                    occupied.insert(ControllerSlot::Collectible(Arc::downgrade(&controller)));
                    controller
                }
            },
            SlotEntry::Vacant(vacant) => {
                vacant.insert(ControllerSlot::Collectible(Arc::downgrade(&controller)));
                controller
            }
        }
    }

    /// Flip a controller's slot between pinned and collectible.
    pub fn set_touched(&self, mount_point: &MountPoint, touched: bool) {
        if let Some(mut slot) = self.map.get_mut(mount_point) {
            let next: Option<ControllerSlot> = match (&*slot, touched) {
                (ControllerSlot::Collectible(weak), true) => {
                    weak.upgrade().map(ControllerSlot::Pinned)
                }
                (ControllerSlot::Pinned(strong), false) => {
                    Some(ControllerSlot::Collectible(Arc::downgrade(strong)))
                }
                _ => None,
            };
            if let Some(next) = next {
                trace!(mount_point = %mount_point, touched, "controller ownership flipped");
                *slot = next;
            }
        }
    }

    /// Snapshot the live controllers under a URI prefix, children first.
    ///
    /// Descending mount-point order puts every nested archive before its
    /// enclosing one, so a scoped sync flushes inner bytes into the outer
    /// tree before the outer container is written.
    pub fn select(&self, prefix: &str) -> Vec<Arc<FederatedController>> {
        let mut selected: Vec<(MountPoint, Arc<FederatedController>)> = self
            .map
            .iter()
            .filter(|entry| entry.key().uri().starts_with(prefix))
            .filter_map(|entry| {
                entry
                    .value()
                    .upgrade()
                    .map(|controller| (entry.key().clone(), controller))
            })
            .collect();
        selected.sort_by(|(a, _), (b, _)| b.cmp(a));
        selected
            .into_iter()
            .map(|(_, controller)| controller)
            .collect()
    }

    /// Number of registered slots, dead weak slots included.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.map.len()
    }
}
