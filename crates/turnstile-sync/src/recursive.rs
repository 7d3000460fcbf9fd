//! Same-thread reentrancy on top of [`Mutex`].

use crate::guard::RecursiveLockGuard;
use crate::mutex::Mutex;
use crossbeam::atomic::AtomicCell;
use std::borrow::Cow;
use std::sync::atomic::{AtomicI32, Ordering};
use turnstile_sched::ThreadId;

/// Mutex wrapper that the holding thread may lock again.
///
/// The recursion depth is tracked next to the underlying mutex; the inner
/// lock is only touched on the first lock and the last unlock, so nested
/// acquisitions are two atomic operations.
pub struct RecursiveLock {
    mutex: Mutex,
    holder: AtomicCell<Option<ThreadId>>,
    recursion: AtomicI32,
}

impl RecursiveLock {
    /// Creates an unlocked recursive lock.
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        RecursiveLock {
            mutex: Mutex::new(name),
            holder: AtomicCell::new(None),
            recursion: AtomicI32::new(0),
        }
    }

    /// The name given at construction.
    pub fn name(&self) -> &str {
        self.mutex.name()
    }

    /// Thread currently holding the lock, if any.
    pub fn holder(&self) -> Option<ThreadId> {
        self.holder.load()
    }

    /// Current recursion depth; greater than zero exactly while the lock is
    /// held.
    pub fn recursion(&self) -> i32 {
        self.recursion.load(Ordering::Relaxed)
    }

    /// Whether the calling thread holds the lock.
    pub fn holds_lock(&self) -> bool {
        self.holder.load() == Some(ThreadId::current())
    }

    /// Acquires the lock, or deepens it if the calling thread already holds
    /// it.
    pub fn lock(&self) {
        if self.holds_lock() {
            self.recursion.fetch_add(1, Ordering::Relaxed);
        } else {
            self.mutex.lock();
            self.holder.store(Some(ThreadId::current()));
            self.recursion.store(1, Ordering::Relaxed);
        }
    }

    /// Acquires the lock and returns a guard that unlocks on drop.
    pub fn guard(&self) -> RecursiveLockGuard<'_> {
        self.lock();
        RecursiveLockGuard::new(self)
    }

    /// Non-blocking acquire; reentry by the holder always succeeds.
    pub fn try_lock(&self) -> bool {
        if self.holds_lock() {
            self.recursion.fetch_add(1, Ordering::Relaxed);
            return true;
        }
        if self.mutex.try_lock() {
            self.holder.store(Some(ThreadId::current()));
            self.recursion.store(1, Ordering::Relaxed);
            return true;
        }
        false
    }

    /// Undoes one `lock`; the underlying mutex is released when the depth
    /// reaches zero.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread does not hold the lock.
    pub fn unlock(&self) {
        if !self.holds_lock() {
            panic!(
                "recursive lock {:?}: unlock by thread {:?}, holder is {:?}",
                self.name(),
                ThreadId::current(),
                self.holder.load()
            );
        }
        if self.recursion.fetch_sub(1, Ordering::Relaxed) == 1 {
            self.holder.store(None);
            self.mutex.unlock();
        }
    }
}

impl std::fmt::Debug for RecursiveLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecursiveLock")
            .field("name", &self.name())
            .field("holder", &self.holder.load())
            .field("recursion", &self.recursion())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_locks_balance() {
        let lock = RecursiveLock::new("recursive");

        for depth in 1..=4 {
            lock.lock();
            assert_eq!(lock.recursion(), depth);
        }
        for depth in (0..4).rev() {
            lock.unlock();
            assert_eq!(lock.recursion(), depth);
        }
        assert_eq!(lock.holder(), None);
    }

    #[test]
    fn test_partial_unlock_keeps_lock_held() {
        let lock = RecursiveLock::new("partial");
        lock.lock();
        lock.lock();
        lock.unlock();

        assert!(lock.holds_lock());
        assert_eq!(lock.recursion(), 1);

        let stolen = std::thread::scope(|scope| {
            scope.spawn(|| lock.try_lock()).join().unwrap()
        });
        assert!(!stolen);

        lock.unlock();
    }

    #[test]
    fn test_try_lock_reenters_for_holder() {
        let lock = RecursiveLock::new("reentry");
        assert!(lock.try_lock());
        assert!(lock.try_lock());
        assert_eq!(lock.recursion(), 2);
        lock.unlock();
        lock.unlock();
    }

    #[test]
    #[should_panic(expected = "unlock by thread")]
    fn test_unlock_by_non_holder_panics() {
        let lock = RecursiveLock::new("stranger");
        lock.unlock();
    }
}
