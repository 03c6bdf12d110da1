#[cfg(all(not(loom), not(feature = "portable-atomic")))]
pub use core::sync::atomic::{self as _atomic, AtomicU8};
#[cfg(all(not(loom), feature = "portable-atomic"))]
pub use portable_atomic::{self as _atomic, AtomicU8};
#[cfg(loom)]
pub use loom::sync::atomic::{self as _atomic, AtomicU8};

pub mod atomic {
    pub use super::_atomic::Ordering::*;
}

#[cfg(not(loom))]
pub use core::cell::UnsafeCell;
#[cfg(loom)]
pub use loom::cell::UnsafeCell;

#[cfg(not(loom))]
pub use alloc::sync::Arc;
#[cfg(loom)]
pub use loom::sync::Arc;
