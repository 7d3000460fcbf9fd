//! Integration tests for condition variables across real threads.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;
use turnstile_sync::{
    ConditionVariable, ConditionVariableEntry, ConditionVariableRegistry, WaitError, WaitFlags,
};

// Published objects are keyed by address, so each test leaks a byte to get
// a key no other test can collide with.
fn unique_object() -> usize {
    Box::leak(Box::new(0u8)) as *mut u8 as usize
}

fn wait_for_entries(variable: &ConditionVariable, expected: usize) {
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while variable.entry_count() < expected {
        assert!(
            std::time::Instant::now() < deadline,
            "waiters never queued up"
        );
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn test_published_wait_and_notify_round_trip() {
    let object = unique_object();
    let registry = ConditionVariableRegistry::global();
    let variable = registry.publish(object, "round trip");

    thread::scope(|scope| {
        let waiter = scope.spawn(move || {
            let mut entry = ConditionVariableEntry::new();
            entry.wait_on(object, WaitFlags::empty(), None)
        });

        wait_for_entries(&variable, 1);
        registry.notify_one(object);
        assert_eq!(waiter.join().unwrap(), Ok(()));
    });

    registry.unpublish(object);
}

#[test]
fn test_add_then_check_then_wait_loses_no_notification() {
    // The two-step protocol: queue the entry, re-check the condition, then
    // wait. A notification landing between the steps must not be lost.
    let object = unique_object();
    let registry = ConditionVariableRegistry::global();
    let variable = registry.publish(object, "two step");
    let ready = AtomicBool::new(false);

    thread::scope(|scope| {
        let consumer = scope.spawn(|| {
            let mut rounds = 0usize;
            loop {
                let mut entry = ConditionVariableEntry::new();
                entry.add(object);
                if ready.load(Ordering::Acquire) {
                    // Entry drops here and removes itself from the queue.
                    return rounds;
                }
                entry.wait(WaitFlags::empty(), None).unwrap();
                rounds += 1;
            }
        });

        wait_for_entries(&variable, 1);
        ready.store(true, Ordering::Release);
        registry.notify_all(object);
        assert!(consumer.join().unwrap() <= 1);
    });

    assert_eq!(variable.entry_count(), 0);
    registry.unpublish(object);
}

#[test]
fn test_notify_all_wakes_every_waiter() {
    const WAITERS: usize = 5;

    let variable = ConditionVariable::anonymous();
    let woken = AtomicUsize::new(0);

    thread::scope(|scope| {
        for _ in 0..WAITERS {
            let (variable, woken) = (&variable, &woken);
            scope.spawn(move || {
                assert_eq!(variable.wait(WaitFlags::empty(), None), Ok(()));
                woken.fetch_add(1, Ordering::SeqCst);
            });
        }

        wait_for_entries(&variable, WAITERS);
        variable.notify_all();
    });

    assert_eq!(woken.load(Ordering::SeqCst), WAITERS);
    assert_eq!(variable.entry_count(), 0);
}

#[test]
fn test_notify_one_wakes_exactly_one() {
    let variable = ConditionVariable::anonymous();

    thread::scope(|scope| {
        for _ in 0..3 {
            let variable = &variable;
            scope.spawn(move || variable.wait(WaitFlags::empty(), None));
        }

        wait_for_entries(&variable, 3);
        variable.notify_one();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while variable.entry_count() > 2 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(variable.entry_count(), 2);

        variable.notify_all();
    });
}

#[test]
fn test_unpublish_fails_blocked_waiters() {
    let object = unique_object();
    let registry = ConditionVariableRegistry::global();
    let variable = registry.publish(object, "going away");

    thread::scope(|scope| {
        let waiter = scope.spawn(move || {
            let mut entry = ConditionVariableEntry::new();
            entry.wait_on(object, WaitFlags::empty(), Some(Duration::from_secs(30)))
        });

        wait_for_entries(&variable, 1);
        registry.unpublish(object);
        assert_eq!(waiter.join().unwrap(), Err(WaitError::NotFound));
    });

    // The object is free again; a new wait misses immediately.
    let mut entry = ConditionVariableEntry::new();
    assert!(!entry.add(object));
    assert_eq!(
        entry.wait(WaitFlags::empty(), None),
        Err(WaitError::NotFound)
    );
}

#[test]
fn test_timed_wait_expires_and_cleans_up() {
    let variable = ConditionVariable::anonymous();
    assert_eq!(
        variable.wait(WaitFlags::empty(), Some(Duration::from_millis(10))),
        Err(WaitError::TimedOut)
    );
    assert_eq!(variable.entry_count(), 0);

    // A later notification finds nobody and changes nothing.
    variable.notify_all();
    assert_eq!(variable.entry_count(), 0);
}

#[test]
fn test_notify_between_add_and_wait_returns_immediately() {
    let object = unique_object();
    let registry = ConditionVariableRegistry::global();
    registry.publish(object, "early notify");

    let mut entry = ConditionVariableEntry::new();
    assert!(entry.add(object));
    registry.notify_one(object);

    // Already latched, so an instant deadline still succeeds.
    assert_eq!(
        entry.wait(WaitFlags::empty(), Some(Duration::ZERO)),
        Ok(())
    );

    registry.unpublish(object);
}
