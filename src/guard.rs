use alloc::borrow::Cow;
use core::{
    ops::Deref,
    pin::Pin,
    task::{Context, Poll, ready},
};

use pin_project_lite::pin_project;

use crate::WaitGroup;

/// One unit of outstanding work on a [`WaitGroup`].
///
/// Calls [`WaitGroup::done`] exactly once, on [`WorkGuard::done`] or when
/// dropped.
#[must_use]
#[derive(Debug)]
pub struct WorkGuard {
    group: WaitGroup,
    label: Option<Cow<'static, str>>,
}

impl WaitGroup {
    /// Adds one unit of work and returns the guard that finishes it.
    ///
    /// ```
    /// use scoped_waitgroup::{WaitGroup, WaitGroupId};
    ///
    /// let wg = WaitGroup::new(WaitGroupId::new(0));
    /// let guard = wg.work();
    /// assert_eq!(wg.pending(), 1);
    ///
    /// guard.done();
    /// assert!(wg.is_done());
    /// ```
    pub fn work(&self) -> WorkGuard {
        self.add(1);
        WorkGuard {
            group: self.clone(),
            label: None,
        }
    }

    /// Like [`work`](Self::work), with `label` attached to the `done` log
    /// record.
    pub fn work_labeled(&self, label: impl Into<Cow<'static, str>>) -> WorkGuard {
        self.add(1);
        WorkGuard {
            group: self.clone(),
            label: Some(label.into()),
        }
    }
}

impl WorkGuard {
    #[inline]
    pub fn group(&self) -> &WaitGroup {
        &self.group
    }

    /// Consumes the guard.
    ///
    /// This is equivalent to dropping the guard.
    #[inline]
    pub fn done(self) {
        drop(self);
    }
}

impl Drop for WorkGuard {
    #[inline]
    fn drop(&mut self) {
        self.group.finish(self.label.as_deref());
    }
}

pin_project! {
    /// Future returned by [`WorkExt::done_on_ready`].
    #[must_use = "futures do nothing unless you `.await` or poll them"]
    #[derive(Debug)]
    pub struct DoneOnReady<F> {
        #[pin]
        inner: F,
        guard: Option<WorkGuard>,
    }
}

impl<F> Deref for DoneOnReady<F> {
    type Target = F;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<F> DoneOnReady<F> {
    pub fn inner_pin(self: Pin<&mut Self>) -> Pin<&mut F> {
        self.project().inner
    }

    /// The guard, until the inner future has completed.
    pub fn guard(&self) -> Option<&WorkGuard> {
        self.guard.as_ref()
    }
}

pub trait WorkExt: Sized {
    /// Finishes `guard` as soon as `self` is ready, or when the returned
    /// future is dropped.
    fn done_on_ready(self, guard: WorkGuard) -> DoneOnReady<Self>;
}

impl<F: Future> WorkExt for F {
    fn done_on_ready(self, guard: WorkGuard) -> DoneOnReady<Self> {
        DoneOnReady {
            inner: self,
            guard: Some(guard),
        }
    }
}

impl<F: Future> Future for DoneOnReady<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let output = ready!(this.inner.poll(cx));
        drop(this.guard.take());
        Poll::Ready(output)
    }
}
