use thiserror::Error;

/// Why a [`Completion`](crate::Completion) settled without its work finishing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum Error {
    /// The wait group was force-completed by its manager's teardown.
    #[error("wait group was cancelled before its work completed")]
    Cancelled,
    /// Every handle to the wait group was dropped while work was outstanding.
    #[error("wait group was dropped before its work completed")]
    Abandoned,
}
