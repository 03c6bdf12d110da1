//! Scope-owned wait groups: run a continuation once N units of work finish.
//!
//! A [`WaitGroup`] counts outstanding work. Producers call
//! [`add`](WaitGroup::add) before starting and [`done`](WaitGroup::done)
//! when finished. Once the counter reaches zero the continuation registered
//! with [`next`](WaitGroup::next) runs, synchronously, inside the last
//! `done`.
//!
//! A [`WaitGroupManager`] owns the groups of one scope. It hands out
//! monotonically increasing [`WaitGroupId`]s, evicts groups as they
//! complete and, when the scope ends, force-completes whatever is left so
//! that no continuation runs into a torn-down scope.
//!
//! This crate supports `no_std` environments (requires `alloc`).
//!
//! # Threading
//!
//! Groups and managers are `!Send` and `!Sync`: every `add`, `done`, `next`
//! and lookup happens on the thread that owns the scope. Work finishing
//! elsewhere has to be marshalled back before calling `done`. The one piece
//! that crosses threads is [`Completion`], the future returned by
//! [`WaitGroup::wait`], which can be awaited anywhere.
//!
//! # Usage
//!
//! ## Continuations
//!
//! ```rust
//! use std::{cell::RefCell, rc::Rc};
//!
//! use scoped_waitgroup::WaitGroupManager;
//!
//! let manager = WaitGroupManager::new();
//! let (id, wg) = manager.create_wait_group("spawn-enemies");
//! let log = Rc::new(RefCell::new(Vec::new()));
//!
//! let guards: Vec<_> = (0..3).map(|i| wg.work_labeled(format!("enemy-{i}"))).collect();
//! wg.next({
//!     let log = log.clone();
//!     move || log.borrow_mut().push("all spawned")
//! });
//!
//! drop(guards);
//! assert_eq!(*log.borrow(), ["all spawned"]);
//! assert!(!manager.contains(id));
//! ```
//!
//! ## Awaiting
//!
//! ```rust
//! use scoped_waitgroup::{Error, WaitGroupManager};
//!
//! # futures_executor::block_on(async {
//! let manager = WaitGroupManager::new();
//! let (_, wg) = manager.create_wait_group("stream-level");
//! wg.add(1);
//! let completion = wg.wait();
//!
//! // The scope ends before the work does.
//! drop(manager);
//! assert_eq!(completion.await, Err(Error::Cancelled));
//! # });
//! ```
//!
//! # Features
//!
//! - `futures-core`: implements `FusedFuture` for [`Completion`].
//! - `portable-atomic`: uses `portable-atomic` for targets without native
//!   byte atomics.
#![no_std]
extern crate alloc;

mod error;
mod guard;
mod manager;
mod promise;
mod utils;
mod wait_group;

pub use crate::{
    error::Error,
    guard::{DoneOnReady, WorkExt, WorkGuard},
    manager::WaitGroupManager,
    promise::Completion,
    wait_group::{WaitGroup, WaitGroupId, WaitGroupState},
};
