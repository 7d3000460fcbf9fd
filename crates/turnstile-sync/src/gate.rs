//! Benaphore gate protecting each primitive's bookkeeping.

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicI32, Ordering};
use turnstile_sched::Semaphore;

/// Benaphore-guarded container.
///
/// The count starts at 1; `lock` decrements it and a previous value of 1
/// means the gate was free, so the uncontended case is a single atomic
/// operation. Any lower value means another thread holds the gate and the
/// caller sleeps on the semaphore until a holder's guard releases a permit.
///
/// The gate is only ever held for short bookkeeping sections; the lock
/// crates never suspend a thread while one of these is held.
pub struct Gate<T> {
    count: AtomicI32,
    sem: Semaphore,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for Gate<T> {}
unsafe impl<T: Send> Sync for Gate<T> {}

impl<T> Gate<T> {
    /// Creates an open gate around `data`.
    pub fn new(data: T) -> Self {
        Gate {
            count: AtomicI32::new(1),
            sem: Semaphore::new(0),
            data: UnsafeCell::new(data),
        }
    }

    /// Acquires the gate, blocking under contention.
    pub fn lock(&self) -> GateGuard<'_, T> {
        if self.count.fetch_sub(1, Ordering::Acquire) <= 0 {
            self.sem.acquire();
        }
        GateGuard { gate: self }
    }

    /// Mutable access without locking; exclusivity is guaranteed by the
    /// borrow.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    /// Consumes the gate, returning the protected data.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

/// RAII guard; dropping it reopens the gate and wakes one blocked acquirer.
pub struct GateGuard<'a, T> {
    gate: &'a Gate<T>,
}

impl<T> Deref for GateGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.gate.data.get() }
    }
}

impl<T> DerefMut for GateGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.gate.data.get() }
    }
}

impl<T> Drop for GateGuard<'_, T> {
    fn drop(&mut self) {
        if self.gate.count.fetch_add(1, Ordering::Release) < 0 {
            self.gate.sem.release();
        }
    }
}
