use alloc::{boxed::Box, rc::Rc, string::String, vec::Vec};
use core::{
    cell::{Cell, RefCell},
    fmt::Debug,
};

use derive_more::{Constructor, Display, From, Into};
use tracing::{debug, error, trace, warn};

use crate::{
    error::Error,
    promise::{self, Completion, Promise},
};

/// Identifier of a [`WaitGroup`].
///
/// Identifiers handed out by a [`WaitGroupManager`](crate::WaitGroupManager)
/// start at `0`, increase monotonically and are never reused.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Constructor, Display, From, Into,
)]
#[display("{_0}")]
pub struct WaitGroupId(u32);

/// Observable phase of a [`WaitGroup`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaitGroupState {
    /// No outstanding work and no join has completed yet.
    Idle,
    /// At least one unit of work is outstanding.
    Armed,
    /// The last join reached zero. A later `add` re-arms the group.
    Completed,
    /// Force-completed by teardown. No continuation will ever run.
    Cancelled,
}

/// Counter edges reported to the manager that owns a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transition {
    /// The counter reached zero and the join completed.
    Completed,
    /// The counter left zero.
    Armed,
}

pub(crate) type ManagerHook = Rc<dyn Fn(&WaitGroup, Transition)>;

type Continuation = Box<dyn FnOnce()>;

struct Inner {
    id: WaitGroupId,
    name: RefCell<String>,
    counter: Cell<i32>,
    cancelled: Cell<bool>,
    completed: Cell<bool>,
    continuation: RefCell<Option<Continuation>>,
    waiters: RefCell<Vec<Promise>>,
    hook: RefCell<Option<ManagerHook>>,
}

/// A join barrier over a counted number of outstanding work units.
///
/// Work producers call [`add`](Self::add) before starting and
/// [`done`](Self::done) once when finished. When the counter reaches zero
/// the group settles every [`Completion`] taken with [`wait`](Self::wait),
/// runs the continuation registered with [`next`](Self::next) and notifies
/// its manager.
///
/// `WaitGroup` is a shared handle: clones refer to the same group. It is
/// neither `Send` nor `Sync`, so every `add`, `done` and `next` happens on
/// the thread that owns the group. Work finishing on another thread must be
/// marshalled back before calling `done`.
///
/// ```rust
/// use std::{cell::Cell, rc::Rc};
///
/// use scoped_waitgroup::{WaitGroup, WaitGroupId};
///
/// let wg = WaitGroup::new(WaitGroupId::new(1));
/// let fired = Rc::new(Cell::new(0));
///
/// wg.add(2);
/// wg.next({
///     let fired = fired.clone();
///     move || fired.set(fired.get() + 1)
/// });
///
/// wg.done();
/// assert_eq!(fired.get(), 0);
/// wg.done();
/// assert_eq!(fired.get(), 1);
/// ```
#[derive(Clone)]
pub struct WaitGroup(Rc<Inner>);

impl WaitGroup {
    /// Creates a free-standing group that no manager tracks.
    pub fn new(id: WaitGroupId) -> Self {
        Self(Rc::new(Inner {
            id,
            name: RefCell::new(String::new()),
            counter: Cell::new(0),
            cancelled: Cell::new(false),
            completed: Cell::new(false),
            continuation: RefCell::new(None),
            waiters: RefCell::new(Vec::new()),
            hook: RefCell::new(None),
        }))
    }

    #[inline]
    pub fn id(&self) -> WaitGroupId {
        self.0.id
    }

    /// Debug name used in diagnostics.
    pub fn name(&self) -> String {
        self.0.name.borrow().clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        *self.0.name.borrow_mut() = name.into();
    }

    /// Number of outstanding work units.
    #[inline]
    pub fn pending(&self) -> i32 {
        self.0.counter.get()
    }

    /// Checks whether no work is outstanding.
    #[inline]
    pub fn is_done(&self) -> bool {
        self.0.counter.get() <= 0
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.cancelled.get()
    }

    pub fn state(&self) -> WaitGroupState {
        let inner = &*self.0;
        if inner.cancelled.get() {
            WaitGroupState::Cancelled
        } else if inner.counter.get() > 0 {
            WaitGroupState::Armed
        } else if inner.completed.get() {
            WaitGroupState::Completed
        } else {
            WaitGroupState::Idle
        }
    }

    /// Returns `true` if both handles refer to the same group.
    #[inline]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Adds `delta` to the outstanding work counter.
    ///
    /// A negative `delta` that takes an armed group to zero completes the
    /// join like the last [`done`](Self::done) would. The counter never goes
    /// below zero.
    ///
    /// Adding work to a group whose join already completed is a usage
    /// error: it is logged and starts a new join cycle. A managed group
    /// re-armed this way is registered with its manager again, so teardown
    /// still reaches it. If the manager is already gone the group is
    /// cancelled on the spot.
    pub fn add(&self, delta: i32) {
        let inner = &*self.0;
        let counter = inner.counter.get();

        if inner.cancelled.get() && delta > 0 {
            warn!(
                id = %inner.id,
                name = %self.name(),
                "re-arming a cancelled wait group, its continuations will never run"
            );
        }

        let mut next = counter.saturating_add(delta);
        if next < 0 {
            error!(
                id = %inner.id,
                name = %self.name(),
                counter,
                delta,
                "wait group counter underflow, clamping to zero"
            );
            next = 0;
        }
        inner.counter.set(next);

        trace!(id = %inner.id, name = %self.name(), counter = next, delta, "add");

        if counter <= 0 && next > 0 {
            if inner.completed.get() && !inner.cancelled.get() {
                warn!(
                    id = %inner.id,
                    name = %self.name(),
                    "adding work to a wait group whose join already completed"
                );
            }
            self.notify(Transition::Armed);
        } else if counter > 0 && next == 0 {
            self.complete();
        }
    }

    /// Marks one unit of work as finished.
    #[inline]
    pub fn done(&self) {
        self.finish(None);
    }

    /// Marks one unit of work as finished, tagging the log record with
    /// `label`.
    #[inline]
    pub fn done_labeled(&self, label: &str) {
        self.finish(Some(label));
    }

    pub(crate) fn finish(&self, label: Option<&str>) {
        let inner = &*self.0;
        let counter = inner.counter.get();

        trace!(id = %inner.id, name = %self.name(), label, counter, "done");

        if counter <= 0 {
            if inner.cancelled.get() {
                debug!(
                    id = %inner.id,
                    name = %self.name(),
                    label,
                    "done called on a cancelled wait group, ignoring"
                );
            } else {
                error!(
                    id = %inner.id,
                    name = %self.name(),
                    label,
                    counter,
                    "done called on a wait group with no outstanding work"
                );
            }
            return;
        }

        inner.counter.set(counter - 1);
        if counter == 1 {
            self.complete();
        }
    }

    /// Runs `continuation` once no work is outstanding.
    ///
    /// If the group is already done the continuation runs before `next`
    /// returns. Otherwise it replaces any pending continuation and runs
    /// inside the `done` call that reaches zero. Continuations of a
    /// cancelled group are dropped without running.
    pub fn next<F>(&self, continuation: F)
    where
        F: FnOnce() + 'static,
    {
        let inner = &*self.0;
        if inner.counter.get() <= 0 {
            if inner.cancelled.get() {
                debug!(id = %inner.id, name = %self.name(), "discarding continuation of cancelled wait group");
            } else {
                continuation();
            }
            return;
        }

        let replaced = inner
            .continuation
            .borrow_mut()
            .replace(Box::new(continuation));
        if replaced.is_some() {
            debug!(id = %inner.id, name = %self.name(), "replacing pending continuation");
        }
    }

    /// Returns a future that settles at the next zero-crossing.
    ///
    /// The completion is already settled if no work is outstanding. It
    /// resolves to [`Error::Cancelled`] for a cancelled group and to
    /// [`Error::Abandoned`] if every handle is dropped first.
    pub fn wait(&self) -> Completion {
        let inner = &*self.0;
        if inner.counter.get() <= 0 {
            return Completion::settled(if inner.cancelled.get() {
                Err(Error::Cancelled)
            } else {
                Ok(())
            });
        }

        let (completion, promise) = promise::pair();
        inner.waiters.borrow_mut().push(promise);
        completion
    }

    pub(crate) fn cancel(&self) {
        let inner = &*self.0;
        inner.cancelled.set(true);
        inner.counter.set(1);
        self.finish(None);
    }

    pub(crate) fn set_manager_hook(&self, hook: ManagerHook) {
        *self.0.hook.borrow_mut() = Some(hook);
    }

    pub(crate) fn detach_manager_hook(&self) {
        let detached = self.0.hook.borrow_mut().take();
        drop(detached);
    }

    fn notify(&self, transition: Transition) {
        let hook = self.0.hook.borrow().clone();
        if let Some(hook) = hook {
            hook(self, transition);
        }
    }

    fn complete(&self) {
        let inner = &*self.0;
        inner.completed.set(true);
        let cancelled = inner.cancelled.get();

        let waiters = core::mem::take(&mut *inner.waiters.borrow_mut());
        for promise in waiters {
            if cancelled {
                promise.cancel();
            } else {
                promise.resolve();
            }
        }

        let continuation = inner.continuation.borrow_mut().take();
        match continuation {
            Some(discarded) if cancelled => {
                debug!(id = %inner.id, name = %self.name(), "discarding continuation of cancelled wait group");
                drop(discarded);
            }
            Some(continuation) => continuation(),
            None => {}
        }

        self.notify(Transition::Completed);
    }
}

impl Debug for WaitGroup {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WaitGroup")
            .field("id", &self.0.id)
            .field("name", &self.name())
            .field("counter", &self.0.counter.get())
            .field("state", &self.state())
            .finish()
    }
}
