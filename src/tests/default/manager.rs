#![cfg(not(loom))]

use alloc::{boxed::Box, rc::Rc, vec::Vec};
use core::cell::Cell;

use futures_executor::block_on;
use tracing::Level;

use crate::{
    Error, WaitGroupId, WaitGroupManager, WaitGroupState,
    tests::utils::{logged_levels, tally},
};

#[test]
fn test_ids_are_monotonic() {
    let manager = WaitGroupManager::new();
    let ids: Vec<_> = (0..16)
        .map(|i| manager.create_wait_group(alloc::format!("wg-{i}")).0)
        .collect();

    assert_eq!(ids[0], WaitGroupId::new(0));
    assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
    assert_eq!(manager.active_ids(), ids);
}

#[test]
fn test_find_returns_created_group() {
    let manager = WaitGroupManager::new();
    let (id_a, wg_a) = manager.create_wait_group("a");
    let (id_b, wg_b) = manager.create_wait_group("b");

    let found_a = manager.find_wait_group(id_a).expect("a is registered");
    let found_b = manager.find_wait_group(id_b).expect("b is registered");
    assert!(found_a.ptr_eq(&wg_a));
    assert!(found_b.ptr_eq(&wg_b));
    assert_eq!(found_a.name(), "a");
    assert_eq!(found_b.id(), id_b);
}

#[test]
fn test_find_miss() {
    let manager = WaitGroupManager::new();
    assert!(manager.find_wait_group(WaitGroupId::new(3)).is_none());
    assert!(manager.is_empty());
}

#[test]
fn test_completion_evicts_group() {
    let manager = WaitGroupManager::new();
    let (id, wg) = manager.create_wait_group("evict");
    let (other, _other_wg) = manager.create_wait_group("other");

    wg.add(2);
    wg.done();
    assert!(manager.contains(id));
    wg.done();

    assert!(!manager.contains(id));
    assert!(manager.find_wait_group(id).is_none());
    assert_eq!(manager.active_ids(), [other]);
}

#[test]
fn test_idle_group_stays_registered() {
    let manager = WaitGroupManager::new();
    let (id, wg) = manager.create_wait_group("idle");
    let hits = Rc::new(Cell::new(0));

    wg.next(tally(&hits));

    assert_eq!(hits.get(), 1);
    assert!(manager.contains(id));
}

#[test]
fn test_eviction_is_idempotent() {
    let manager = WaitGroupManager::new();
    let (id, wg) = manager.create_wait_group("twice");
    let (other, _other_wg) = manager.create_wait_group("other");

    wg.add(1);
    wg.done();
    manager.on_wait_group_completed(id);
    manager.on_wait_group_completed(id);
    manager.on_wait_group_completed(WaitGroupId::new(99));

    assert_eq!(manager.active_ids(), [other]);
}

#[test]
fn test_rearmed_group_is_registered_again() {
    let manager = WaitGroupManager::new();
    let (id, wg) = manager.create_wait_group("rearm");
    let hits = Rc::new(Cell::new(0));

    wg.add(1);
    wg.done();
    assert!(!manager.contains(id));

    wg.add(1);
    assert!(manager.contains(id));
    assert!(manager.find_wait_group(id).is_some_and(|found| found.ptr_eq(&wg)));

    wg.next(tally(&hits));
    wg.done();
    assert_eq!(hits.get(), 1);
    assert!(manager.is_empty());
}

#[test]
fn test_teardown_cancels_rearmed_group() {
    let manager = WaitGroupManager::new();
    let (_, wg) = manager.create_wait_group("rearm-then-teardown");
    let hits = Rc::new(Cell::new(0));

    wg.add(1);
    wg.done();
    wg.add(1);
    wg.next(tally(&hits));
    let completion = wg.wait();

    drop(manager);
    assert!(wg.is_cancelled());
    assert_eq!(block_on(completion), Err(Error::Cancelled));

    wg.done();
    assert_eq!(hits.get(), 0);
    assert_eq!(wg.pending(), 0);
}

#[test]
fn test_continuation_rearm_keeps_group_registered() {
    let manager = WaitGroupManager::new();
    let (id, wg) = manager.create_wait_group("self-rearming");
    let hits = Rc::new(Cell::new(0));

    wg.add(1);
    wg.next({
        let wg = wg.clone();
        let hits = hits.clone();
        move || {
            wg.add(1);
            wg.next(tally(&hits));
        }
    });
    wg.done();
    assert!(manager.contains(id));
    assert_eq!(wg.pending(), 1);

    drop(manager);
    assert!(wg.is_cancelled());
    assert_eq!(hits.get(), 0);
}

#[test]
fn test_cleanup_all_wait_groups() {
    let manager = WaitGroupManager::new();
    let hits = Rc::new(Cell::new(0));
    let mut groups = Vec::new();
    let mut completions = Vec::new();

    for i in 0..4 {
        let (_, wg) = manager.create_wait_group(alloc::format!("pending-{i}"));
        wg.add(i + 1);
        wg.next(tally(&hits));
        completions.push(wg.wait());
        groups.push(wg);
    }

    manager.cleanup_all_wait_groups();

    assert!(manager.is_empty());
    assert_eq!(hits.get(), 0);
    for wg in &groups {
        assert_eq!(wg.state(), WaitGroupState::Cancelled);
        assert!(wg.is_done());
    }
    for completion in completions {
        assert_eq!(block_on(completion), Err(Error::Cancelled));
    }

    for wg in &groups {
        wg.add(1);
        wg.next(tally(&hits));
        wg.done();
        wg.next(tally(&hits));
    }
    assert_eq!(hits.get(), 0);
    assert!(manager.is_empty());
}

#[test]
fn test_cleanup_keeps_issuing_fresh_ids() {
    let manager = WaitGroupManager::new();
    let (first, wg) = manager.create_wait_group("first");
    wg.add(1);
    manager.cleanup_all_wait_groups();
    manager.cleanup_all_wait_groups();

    let (second, _) = manager.create_wait_group("second");
    assert!(second > first);
    assert_eq!(manager.active_ids(), [second]);
}

#[test]
fn test_drop_manager_cancels_groups() {
    let hits = Rc::new(Cell::new(0));
    let manager = WaitGroupManager::new();
    let (_, wg) = manager.create_wait_group("scope");
    wg.add(1);
    wg.next(tally(&hits));
    let completion = wg.wait();

    drop(manager);

    assert!(wg.is_cancelled());
    assert_eq!(block_on(completion), Err(Error::Cancelled));
    wg.done();
    assert_eq!(hits.get(), 0);
}

#[test]
fn test_group_outlives_manager() {
    let manager = WaitGroupManager::new();
    let (_, wg) = manager.create_wait_group("survivor");
    let hits = Rc::new(Cell::new(0));
    wg.add(1);
    wg.done();
    drop(manager);

    wg.add(1);
    assert!(wg.is_cancelled());
    assert_eq!(wg.pending(), 0);

    wg.next(tally(&hits));
    wg.done();
    assert_eq!(hits.get(), 0);
}

#[test]
fn test_done_after_teardown_is_not_an_error() {
    let manager = WaitGroupManager::new();
    let (_, wg) = manager.create_wait_group("late-work");
    let guard = wg.work_labeled("in-flight");
    drop(manager);

    let levels = logged_levels(|| {
        drop(guard);
        wg.done();
    });
    assert!(!levels.contains(&Level::ERROR));
    assert_eq!(wg.pending(), 0);
}

#[test]
fn test_continuation_creates_group() {
    let manager = Rc::new(WaitGroupManager::new());
    let (first, wg) = manager.create_wait_group("first");
    let created = Rc::new(Cell::new(None));

    wg.add(1);
    wg.next({
        let manager = manager.clone();
        let created = created.clone();
        move || {
            let (id, next_wg) = manager.create_wait_group("second");
            next_wg.add(1);
            created.set(Some(id));
        }
    });
    wg.done();

    let second = created.get().expect("continuation ran");
    assert!(!manager.contains(first));
    assert_eq!(manager.active_ids(), [second]);
}

#[test]
fn test_three_callbacks_in_any_order() {
    const ORDERS: [[usize; 3]; 6] = [
        [0, 1, 2],
        [0, 2, 1],
        [1, 0, 2],
        [1, 2, 0],
        [2, 0, 1],
        [2, 1, 0],
    ];

    for order in ORDERS {
        let manager = WaitGroupManager::new();
        let (id, wg) = manager.create_wait_group("three-callbacks");
        let hits = Rc::new(Cell::new(0));

        wg.add(3);
        let mut callbacks: Vec<Option<Box<dyn FnOnce()>>> = ["load", "spawn", "stream"]
            .into_iter()
            .map(|label| {
                let wg = wg.clone();
                Some(Box::new(move || wg.done_labeled(label)) as Box<dyn FnOnce()>)
            })
            .collect();
        wg.next(tally(&hits));

        for (step, index) in order.into_iter().enumerate() {
            assert_eq!(hits.get(), 0);
            assert!(manager.contains(id));
            let callback = callbacks[index].take().expect("each callback runs once");
            callback();
            assert_eq!(wg.pending(), 2 - step as i32);
        }

        assert_eq!(hits.get(), 1);
        assert!(manager.find_wait_group(id).is_none());
    }
}
