//! Two-path mutual exclusion.

use crate::gate::Gate;
use crate::guard::MutexGuard;
use crate::rwlock::RwLock;
use crossbeam::atomic::AtomicCell;
use std::borrow::Cow;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use turnstile_sched::{Thread, ThreadId, WaitError, WaitFlags, WaitResult};

const UNLOCKED: i32 = 0;
const LOCKED: i32 = 1;

struct Waiter {
    thread: Arc<Thread>,
}

impl Waiter {
    fn id(&self) -> ThreadId {
        self.thread.id()
    }
}

/// What a switch-lock releases once the caller is safely queued.
enum SwitchFrom<'a> {
    Mutex(&'a Mutex),
    ReadLock(&'a RwLock),
}

impl SwitchFrom<'_> {
    fn release(self) {
        match self {
            SwitchFrom::Mutex(mutex) => mutex.unlock(),
            SwitchFrom::ReadLock(lock) => lock.read_unlock(),
        }
    }
}

/// Exclusive lock with an atomic fast path and a FIFO blocking slow path.
///
/// The fast path claims the lock with a single compare-and-swap. The slow
/// path takes the internal [`Gate`], retries the claim (the holder may have
/// unlocked in between), and otherwise queues the caller and suspends it.
/// `unlock` hands ownership directly to the queue head, so a woken thread
/// never re-contends with fast-path lockers for that wakeup.
pub struct Mutex {
    name: Cow<'static, str>,
    count: AtomicI32,
    holder: AtomicCell<Option<ThreadId>>,
    waiters: Gate<VecDeque<Waiter>>,
}

impl Mutex {
    /// Creates an unlocked mutex. A `&'static str` name is borrowed, a
    /// `String` is owned.
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Mutex {
            name: name.into(),
            count: AtomicI32::new(UNLOCKED),
            holder: AtomicCell::new(None),
            waiters: Gate::new(VecDeque::new()),
        }
    }

    /// The name given at construction.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Thread currently holding the lock, if any.
    pub fn holder(&self) -> Option<ThreadId> {
        self.holder.load()
    }

    /// Number of threads blocked in the slow path.
    pub fn waiting_count(&self) -> usize {
        self.waiters.lock().len()
    }

    /// Non-blocking fast-path attempt. Never enters the gate.
    pub fn try_lock(&self) -> bool {
        let claimed = self
            .count
            .compare_exchange(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
            .is_ok();
        if claimed {
            self.holder.store(Some(ThreadId::current()));
        }
        claimed
    }

    /// Acquires the lock, blocking while it is held by another thread.
    pub fn lock(&self) {
        if !self.try_lock() {
            // An untimed, uninterruptible wait only fails if the lock is
            // destroyed underneath it, which safe aliasing rules out.
            let result = self.lock_slow(None, WaitFlags::empty(), None);
            debug_assert!(result.is_ok(), "untimed lock failed: {:?}", result);
        }
    }

    /// Acquires the lock and returns a guard that unlocks on drop.
    pub fn guard(&self) -> MutexGuard<'_> {
        self.lock();
        MutexGuard::new(self)
    }

    /// Acquires the lock, giving up once `timeout` elapses or, with
    /// [`WaitFlags::INTERRUPTIBLE`], when an interruption is delivered.
    pub fn lock_with_timeout(&self, flags: WaitFlags, timeout: Duration) -> WaitResult {
        if self.try_lock() {
            return Ok(());
        }
        self.lock_slow(None, flags, Some(timeout))
    }

    /// Releases `from` and acquires `self` as one step: the caller is queued
    /// on `self` before `from` is unlocked, so no thread released by that
    /// unlock can overtake it here.
    pub fn switch_lock(&self, from: &Mutex) {
        if self.try_lock() {
            from.unlock();
            return;
        }
        let result = self.lock_slow(Some(SwitchFrom::Mutex(from)), WaitFlags::empty(), None);
        debug_assert!(result.is_ok(), "untimed lock failed: {:?}", result);
    }

    /// [`switch_lock`](Self::switch_lock) variant releasing a read lock.
    pub fn switch_from_read_lock(&self, from: &RwLock) {
        if self.try_lock() {
            from.read_unlock();
            return;
        }
        let result = self.lock_slow(Some(SwitchFrom::ReadLock(from)), WaitFlags::empty(), None);
        debug_assert!(result.is_ok(), "untimed lock failed: {:?}", result);
    }

    fn lock_slow(
        &self,
        from: Option<SwitchFrom<'_>>,
        flags: WaitFlags,
        timeout: Option<Duration>,
    ) -> WaitResult {
        let me = Thread::current();
        let mut waiters = self.waiters.lock();
        debug_assert_ne!(self.holder.load(), Some(me.id()), "mutex locked twice");

        // The holder may have unlocked between the failed fast path and the
        // gate acquisition; the count is the released flag.
        if self
            .count
            .compare_exchange(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            self.holder.store(Some(me.id()));
            drop(waiters);
            if let Some(from) = from {
                from.release();
            }
            return Ok(());
        }

        me.prepare_to_block();
        waiters.push_back(Waiter {
            thread: Arc::clone(&me),
        });
        drop(waiters);
        if let Some(from) = from {
            from.release();
        }

        match me.block(flags, timeout) {
            Ok(()) => Ok(()),
            Err(WaitError::Destroyed) => Err(WaitError::Destroyed),
            Err(error) => self.abort_wait(&me, error),
        }
    }

    /// Ends a timed-out or interrupted wait: either the waiter is still
    /// queued and removes itself, or an unlocker dequeued it concurrently and
    /// the lock is already ours.
    fn abort_wait(&self, me: &Arc<Thread>, error: WaitError) -> WaitResult {
        let mut waiters = self.waiters.lock();
        if let Some(position) = waiters.iter().position(|waiter| waiter.id() == me.id()) {
            waiters.remove(position);
            return Err(error);
        }
        debug_assert_eq!(self.holder.load(), Some(me.id()));
        Ok(())
    }

    /// Releases the lock, handing it to the queue head if one exists.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread does not hold the lock.
    pub fn unlock(&self) {
        let me = ThreadId::current();
        let mut waiters = self.waiters.lock();
        let holder = self.holder.load();
        if holder != Some(me) {
            panic!(
                "mutex {:?}: unlock by thread {:?}, holder is {:?}",
                self.name, me, holder
            );
        }

        if let Some(waiter) = waiters.pop_front() {
            // Direct hand-off: the count stays claimed for the woken thread.
            self.holder.store(Some(waiter.id()));
            waiter.thread.unblock(Ok(()));
        } else {
            self.holder.store(None);
            self.count.store(UNLOCKED, Ordering::Release);
        }
    }
}

impl Drop for Mutex {
    fn drop(&mut self) {
        let waiters = self.waiters.get_mut();
        if waiters.is_empty() {
            return;
        }
        if self.holder.load() != Some(ThreadId::current()) {
            panic!(
                "mutex {:?}: destroyed with {} waiter(s) by a non-holder",
                self.name,
                waiters.len()
            );
        }
        for waiter in waiters.drain(..) {
            waiter.thread.unblock(Err(WaitError::Destroyed));
        }
    }
}

impl std::fmt::Debug for Mutex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mutex")
            .field("name", &self.name)
            .field("locked", &(self.count.load(Ordering::Relaxed) == LOCKED))
            .field("holder", &self.holder.load())
            .finish()
    }
}
