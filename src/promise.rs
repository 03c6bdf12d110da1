use core::{
    fmt::Debug,
    panic::{RefUnwindSafe, UnwindSafe},
    pin::Pin,
    task::{Context, Poll, Waker},
};

use crate::{error::Error, utils::*};

const DONE: u8 = 0b0001;
const LOCK: u8 = 0b0010;
const CANCELLED: u8 = 0b0100;
const ABANDONED: u8 = 0b1000;

// `slot` is only touched by whoever moves `LOCK` from clear to set.
// `DONE` is set at most once and never cleared.
struct Signal {
    state: AtomicU8,
    slot: UnsafeCell<Option<Waker>>,
}

unsafe impl Send for Signal {}
unsafe impl Sync for Signal {}
impl UnwindSafe for Signal {}
impl RefUnwindSafe for Signal {}

impl Signal {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(0),
            slot: UnsafeCell::new(None),
        }
    }

    #[inline]
    unsafe fn with_slot_mut<R, F: FnOnce(&mut Option<Waker>) -> R>(&self, f: F) -> R {
        #[cfg(not(loom))]
        {
            f(unsafe { &mut *self.slot.get() })
        }
        #[cfg(loom)]
        {
            self.slot
                .get()
                .with(|ptr| f(unsafe { &mut *ptr.cast_mut() }))
        }
    }

    #[inline]
    fn is_done(&self) -> bool {
        self.state.load(atomic::Acquire) & DONE != 0
    }

    fn settle(&self, outcome: u8) {
        let Ok(prev_state) = self
            .state
            .fetch_update(atomic::AcqRel, atomic::Acquire, |state| {
                (state & DONE == 0).then_some(state | DONE | LOCK | outcome)
            })
        else {
            return;
        };
        if prev_state & LOCK == 0
            && let Some(waker) = unsafe { self.with_slot_mut(Option::take) }
        {
            waker.wake();
        }
    }

    /// Parks `waker` in the slot, or returns the settled state.
    fn register(&self, waker: &Waker) -> Option<u8> {
        let prev_state = self.state.fetch_or(LOCK, atomic::Acquire);
        if prev_state & DONE != 0 {
            return Some(prev_state);
        }
        debug_assert!(prev_state & LOCK == 0);

        let lock = SlotLock(self);
        unsafe {
            self.with_slot_mut(|slot| {
                if !slot.as_ref().is_some_and(|old| old.will_wake(waker)) {
                    *slot = Some(waker.clone());
                }
            });
        }

        let prev_state = lock.release();
        if prev_state & DONE == 0 {
            return None;
        }

        // Settled while the slot was held, so nobody woke the parked waker.
        drop(unsafe { self.with_slot_mut(Option::take) });
        self.state.fetch_or(LOCK, atomic::Release);
        Some(prev_state)
    }

    /// Drops the parked waker unless the settling side already owns it.
    fn detach(&self) {
        let prev_state = self.state.fetch_or(LOCK, atomic::Acquire);
        if prev_state & LOCK == 0 {
            drop(unsafe { self.with_slot_mut(Option::take) });
        }
    }
}

/// Holds `LOCK` on a [`Signal`]. Dropping it, on unwind too, clears `LOCK`.
struct SlotLock<'a>(&'a Signal);

impl SlotLock<'_> {
    /// Clears `LOCK` and returns the state it was cleared from.
    #[inline]
    fn release(self) -> u8 {
        let signal = self.0;
        core::mem::forget(self);
        signal.state.fetch_and(!LOCK, atomic::AcqRel)
    }
}

impl Drop for SlotLock<'_> {
    #[inline]
    fn drop(&mut self) {
        self.0.state.fetch_and(!LOCK, atomic::AcqRel);
    }
}

#[inline]
fn outcome(state: u8) -> Result<(), Error> {
    if state & CANCELLED != 0 {
        Err(Error::Cancelled)
    } else if state & ABANDONED != 0 {
        Err(Error::Abandoned)
    } else {
        Ok(())
    }
}

/// Creates an unsettled completion and the promise that settles it.
pub(crate) fn pair() -> (Completion, Promise) {
    let signal = Arc::new(Signal::new());
    (Completion(signal.clone()), Promise(signal))
}

/// Resolves once the wait group it was taken from reaches zero.
///
/// Obtained from [`WaitGroup::wait`](crate::WaitGroup::wait). Unlike the
/// wait group itself, a `Completion` is `Send`, so it can be awaited on
/// any thread or executor.
///
/// # Cancellation safety
///
/// This future is cancellation safe.
///
/// It is also safe to poll again after completion.
///
/// ```rust
/// # use scoped_waitgroup::{WaitGroup, WaitGroupId};
/// # futures_executor::block_on(async {
/// let wg = WaitGroup::new(WaitGroupId::new(0));
/// wg.add(1);
/// let mut completion = core::pin::pin!(wg.wait());
///
/// assert!(!completion.is_done());
///
/// wg.done();
///
/// assert_eq!(completion.as_mut().await, Ok(()));
/// // It is safe to await again (re-poll)
/// assert_eq!(completion.as_mut().await, Ok(()));
/// # });
/// ```
#[must_use]
pub struct Completion(Arc<Signal>);

/// Settling side of a [`Completion`]. Dropping it unsettled abandons the
/// completion.
#[must_use]
pub(crate) struct Promise(Arc<Signal>);

impl Completion {
    pub(crate) fn settled(result: Result<(), Error>) -> Self {
        let (completion, promise) = pair();
        match result {
            Ok(()) => promise.resolve(),
            Err(Error::Cancelled) => promise.cancel(),
            Err(Error::Abandoned) => drop(promise),
        }
        completion
    }

    /// Checks whether the completion has settled, without polling it.
    #[inline]
    pub fn is_done(&self) -> bool {
        self.0.is_done()
    }
}

impl Promise {
    #[inline]
    pub fn resolve(self) {
        self.0.settle(0);
    }

    #[inline]
    pub fn cancel(self) {
        self.0.settle(CANCELLED);
    }
}

impl Drop for Promise {
    #[inline]
    fn drop(&mut self) {
        self.0.settle(ABANDONED);
    }
}

impl Future for Completion {
    type Output = Result<(), Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.0.register(cx.waker()) {
            Some(state) => Poll::Ready(outcome(state)),
            None => Poll::Pending,
        }
    }
}

impl Drop for Completion {
    #[inline]
    fn drop(&mut self) {
        self.0.detach();
    }
}

#[cfg(feature = "futures-core")]
impl futures_core::FusedFuture for Completion {
    #[inline]
    fn is_terminated(&self) -> bool {
        self.is_done()
    }
}

impl Debug for Completion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Completion")
            .field("done", &self.is_done())
            .finish()
    }
}

impl Debug for Promise {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Promise")
            .field("done", &self.0.is_done())
            .finish()
    }
}
