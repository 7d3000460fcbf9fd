//! RAII guards that release their lock on drop.

use crate::mutex::Mutex;
use crate::recursive::RecursiveLock;
use crate::rwlock::RwLock;

/// Releases a [`Mutex`] when dropped.
pub struct MutexGuard<'a> {
    mutex: &'a Mutex,
    unlocked: bool,
}

impl<'a> MutexGuard<'a> {
    pub(crate) fn new(mutex: &'a Mutex) -> Self {
        MutexGuard {
            mutex,
            unlocked: false,
        }
    }

    /// Releases the lock before the guard goes out of scope.
    pub fn unlock(mut self) {
        self.mutex.unlock();
        self.unlocked = true;
    }
}

impl Drop for MutexGuard<'_> {
    fn drop(&mut self) {
        if !self.unlocked {
            self.mutex.unlock();
        }
    }
}

/// Releases one level of a [`RecursiveLock`] when dropped.
pub struct RecursiveLockGuard<'a> {
    lock: &'a RecursiveLock,
    unlocked: bool,
}

impl<'a> RecursiveLockGuard<'a> {
    pub(crate) fn new(lock: &'a RecursiveLock) -> Self {
        RecursiveLockGuard {
            lock,
            unlocked: false,
        }
    }

    /// Releases this level of the lock before the guard goes out of scope.
    pub fn unlock(mut self) {
        self.lock.unlock();
        self.unlocked = true;
    }
}

impl Drop for RecursiveLockGuard<'_> {
    fn drop(&mut self) {
        if !self.unlocked {
            self.lock.unlock();
        }
    }
}

/// Releases a shared [`RwLock`] claim when dropped.
pub struct RwReadGuard<'a> {
    lock: &'a RwLock,
    unlocked: bool,
}

impl<'a> RwReadGuard<'a> {
    pub(crate) fn new(lock: &'a RwLock) -> Self {
        RwReadGuard {
            lock,
            unlocked: false,
        }
    }

    /// Releases the read lock before the guard goes out of scope.
    pub fn unlock(mut self) {
        self.lock.read_unlock();
        self.unlocked = true;
    }
}

impl Drop for RwReadGuard<'_> {
    fn drop(&mut self) {
        if !self.unlocked {
            self.lock.read_unlock();
        }
    }
}

/// Releases an exclusive [`RwLock`] claim when dropped.
pub struct RwWriteGuard<'a> {
    lock: &'a RwLock,
    unlocked: bool,
}

impl<'a> RwWriteGuard<'a> {
    pub(crate) fn new(lock: &'a RwLock) -> Self {
        RwWriteGuard {
            lock,
            unlocked: false,
        }
    }

    /// Releases the write lock before the guard goes out of scope.
    pub fn unlock(mut self) {
        self.lock.write_unlock();
        self.unlocked = true;
    }
}

impl Drop for RwWriteGuard<'_> {
    fn drop(&mut self) {
        if !self.unlocked {
            self.lock.write_unlock();
        }
    }
}
