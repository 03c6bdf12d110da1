use alloc::{
    collections::{BTreeMap, btree_map::Entry},
    rc::{Rc, Weak},
    string::String,
    vec::Vec,
};
use core::{cell::RefCell, fmt::Debug};

use tracing::{trace, warn};

use crate::wait_group::{Transition, WaitGroup, WaitGroupId};

#[derive(Default)]
struct Registry {
    next_id: u32,
    active: BTreeMap<WaitGroupId, WaitGroup>,
}

impl Registry {
    fn evict(registry: &RefCell<Registry>, id: WaitGroupId) {
        let evicted = {
            let mut registry = registry.borrow_mut();
            if registry.active.get(&id).is_some_and(|group| !group.is_done()) {
                trace!(id = %id, "wait group re-armed by its continuation, keeping it registered");
                return;
            }
            registry.active.remove(&id)
        };
        match evicted {
            Some(group) => trace!(id = %id, name = %group.name(), "wait group completed"),
            None => warn!(id = %id, "completed wait group not found"),
        }
    }

    fn readmit(registry: &RefCell<Registry>, group: &WaitGroup) {
        if let Entry::Vacant(entry) = registry.borrow_mut().active.entry(group.id()) {
            trace!(id = %group.id(), name = %group.name(), "re-armed wait group registered again");
            entry.insert(group.clone());
        }
    }
}

/// Registry of the wait groups alive in one scope.
///
/// The scope owner (a session, a world, a request) holds the manager and
/// drops it when the scope ends. Dropping runs
/// [`cleanup_all_wait_groups`](Self::cleanup_all_wait_groups), so no
/// continuation registered through this manager runs after the scope is
/// gone.
///
/// Like [`WaitGroup`], the manager is confined to the thread that created
/// it.
///
/// ```rust
/// use std::{cell::Cell, rc::Rc};
///
/// use scoped_waitgroup::WaitGroupManager;
///
/// let manager = WaitGroupManager::new();
/// let (id, wg) = manager.create_wait_group("load-assets");
/// let fired = Rc::new(Cell::new(false));
///
/// wg.add(3);
/// wg.next({
///     let fired = fired.clone();
///     move || fired.set(true)
/// });
/// for _ in 0..3 {
///     wg.done();
/// }
///
/// assert!(fired.get());
/// assert!(manager.find_wait_group(id).is_none());
/// ```
#[derive(Default)]
pub struct WaitGroupManager {
    registry: Rc<RefCell<Registry>>,
}

impl WaitGroupManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates and registers a new wait group.
    ///
    /// The group stays registered until its counter reaches zero or the
    /// manager is torn down. Re-arming a completed group with
    /// [`WaitGroup::add`] registers it again under the same ID.
    pub fn create_wait_group(&self, name: impl Into<String>) -> (WaitGroupId, WaitGroup) {
        let group = {
            let mut registry = self.registry.borrow_mut();
            let id = WaitGroupId::new(registry.next_id);
            registry.next_id += 1;

            let group = WaitGroup::new(id);
            group.set_name(name);
            registry.active.insert(id, group.clone());
            group
        };

        let registry: Weak<RefCell<Registry>> = Rc::downgrade(&self.registry);
        group.set_manager_hook(Rc::new(move |group: &WaitGroup, transition: Transition| {
            match (registry.upgrade(), transition) {
                (Some(registry), Transition::Completed) => Registry::evict(&registry, group.id()),
                (Some(registry), Transition::Armed) => Registry::readmit(&registry, group),
                (None, Transition::Armed) => {
                    warn!(
                        id = %group.id(),
                        name = %group.name(),
                        "wait group re-armed after its manager was torn down, cancelling"
                    );
                    group.cancel();
                }
                (None, Transition::Completed) => {}
            }
        }));

        trace!(id = %group.id(), name = %group.name(), "wait group created");
        (group.id(), group)
    }

    /// Looks up an active wait group.
    pub fn find_wait_group(&self, id: WaitGroupId) -> Option<WaitGroup> {
        let found = self.registry.borrow().active.get(&id).cloned();
        if found.is_none() {
            warn!(id = %id, "wait group not found");
        }
        found
    }

    #[inline]
    pub fn contains(&self, id: WaitGroupId) -> bool {
        self.registry.borrow().active.contains_key(&id)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.registry.borrow().active.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.registry.borrow().active.is_empty()
    }

    /// IDs of the groups that have not completed yet, in creation order.
    pub fn active_ids(&self) -> Vec<WaitGroupId> {
        self.registry.borrow().active.keys().copied().collect()
    }

    /// Force-completes every active wait group and empties the registry.
    ///
    /// Completion hooks are detached before any group is cancelled, so the
    /// registry is not touched while the groups are being completed.
    /// Pending continuations are dropped without running and outstanding
    /// completions resolve to [`Error::Cancelled`](crate::Error::Cancelled).
    pub fn cleanup_all_wait_groups(&self) {
        let groups: Vec<WaitGroup> = self.registry.borrow().active.values().cloned().collect();
        if groups.is_empty() {
            return;
        }

        warn!(count = groups.len(), "cleaning up active wait groups");

        for group in &groups {
            group.detach_manager_hook();
        }

        for group in &groups {
            warn!(id = %group.id(), name = %group.name(), "force-completing wait group");
            group.cancel();
        }

        let cleared = core::mem::take(&mut self.registry.borrow_mut().active);
        drop(cleared);
    }

    #[cfg(test)]
    pub(crate) fn on_wait_group_completed(&self, id: WaitGroupId) {
        Registry::evict(&self.registry, id);
    }
}

impl Drop for WaitGroupManager {
    fn drop(&mut self) {
        self.cleanup_all_wait_groups();
    }
}

impl Debug for WaitGroupManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let registry = self.registry.borrow();
        f.debug_struct("WaitGroupManager")
            .field("next_id", &registry.next_id)
            .field("active", &registry.active.keys().collect::<Vec<_>>())
            .finish()
    }
}
