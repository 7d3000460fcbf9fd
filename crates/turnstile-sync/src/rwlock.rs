//! Reader/writer lock with FIFO queueing and writer preference.

use crate::gate::Gate;
use crate::guard::{RwReadGuard, RwWriteGuard};
use std::borrow::Cow;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use turnstile_sched::{Thread, ThreadId, WaitError, WaitFlags, WaitResult};

/// Weight of one writer claim in the shared count. Values below it are pure
/// reader counts; at or above it, at least one writer holds the lock or is
/// queued for it.
const WRITER_BASE: i32 = 0x10000;

struct RwWaiter {
    thread: Arc<Thread>,
    writer: bool,
}

struct RwState {
    /// Thread holding the write lock, if any.
    holder: Option<ThreadId>,
    /// Writer recursion in units of [`WRITER_BASE`], plus one per read the
    /// writer takes inside its own critical section.
    owner_count: i32,
    /// Readers a queued writer still has to wait out. Only meaningful while
    /// a writer is queued.
    active_readers: i32,
    /// Readers whose count increment raced a writer's unlock; they will pass
    /// through the slow path without blocking and must not be waited for.
    pending_readers: i32,
    waiters: VecDeque<RwWaiter>,
}

/// Shared/exclusive lock.
///
/// Readers proceed with a single atomic increment as long as no writer holds
/// the lock or is queued for it. Once a writer announces its claim, later
/// readers queue behind it (writer preference), while the writer waits out
/// only the readers that were already inside. Unlocks hand the lock over
/// directly: a writer to the next writer, or the whole contiguous run of
/// queued readers at once.
pub struct RwLock {
    name: Cow<'static, str>,
    count: AtomicI32,
    state: Gate<RwState>,
}

impl RwLock {
    /// Creates an unlocked reader/writer lock. A `&'static str` name is
    /// borrowed, a `String` is owned.
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        RwLock {
            name: name.into(),
            count: AtomicI32::new(0),
            state: Gate::new(RwState {
                holder: None,
                owner_count: 0,
                active_readers: 0,
                pending_readers: 0,
                waiters: VecDeque::new(),
            }),
        }
    }

    /// The name given at construction.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Thread holding the write lock, if any.
    pub fn holder(&self) -> Option<ThreadId> {
        self.state.lock().holder
    }

    /// Number of queued readers and writers.
    pub fn waiting_count(&self) -> usize {
        self.state.lock().waiters.len()
    }

    /// Acquires the lock for shared reading, blocking while a writer holds
    /// it or is queued for it. The write holder may read its own critical
    /// section without blocking.
    pub fn read_lock(&self) {
        let previous = self.count.fetch_add(1, Ordering::Acquire);
        if previous >= WRITER_BASE {
            let result = self.read_lock_slow();
            debug_assert!(result.is_ok(), "untimed read lock failed: {:?}", result);
        }
    }

    /// Acquires a read lock and returns a guard that unlocks on drop.
    pub fn read_guard(&self) -> RwReadGuard<'_> {
        self.read_lock();
        RwReadGuard::new(self)
    }

    fn read_lock_slow(&self) -> WaitResult {
        let me = Thread::current();
        let mut state = self.state.lock();

        // The current write holder may read its own critical section.
        if state.holder == Some(me.id()) {
            state.owner_count += 1;
            return Ok(());
        }

        // A writer that unlocked while our increment was in flight already
        // accounted for us in pending_readers; no wait is needed.
        if state.pending_readers > 0 {
            state.pending_readers -= 1;
            if self.count.load(Ordering::Relaxed) >= WRITER_BASE {
                state.active_readers += 1;
            }
            return Ok(());
        }

        debug_assert!(self.count.load(Ordering::Relaxed) >= WRITER_BASE);

        me.prepare_to_block();
        state.waiters.push_back(RwWaiter {
            thread: Arc::clone(&me),
            writer: false,
        });
        drop(state);
        me.block(WaitFlags::empty(), None)
    }

    /// Releases one read lock.
    ///
    /// # Panics
    ///
    /// Panics if the lock is not read-locked.
    pub fn read_unlock(&self) {
        let previous = self.count.fetch_sub(1, Ordering::Release);
        if previous >= WRITER_BASE {
            self.read_unlock_slow();
        }
    }

    fn read_unlock_slow(&self) {
        let mut state = self.state.lock();

        // A self-read ending inside the write-held section.
        if state.holder == Some(ThreadId::current()) {
            debug_assert!(state.owner_count % WRITER_BASE > 0);
            state.owner_count -= 1;
            return;
        }

        state.active_readers -= 1;
        if state.active_readers > 0 {
            return;
        }
        if state.active_readers < 0 {
            state.active_readers = 0;
            panic!("rwlock {:?}: read_unlock without read_lock", self.name);
        }
        Self::unblock_waiters(&mut state, &self.count);
    }

    /// Acquires the lock exclusively, blocking while readers or another
    /// writer hold it. Reentrant for the current write holder.
    pub fn write_lock(&self) {
        let result = self.write_lock_inner();
        debug_assert!(result.is_ok(), "untimed write lock failed: {:?}", result);
    }

    /// Acquires a write lock and returns a guard that unlocks on drop.
    pub fn write_guard(&self) -> RwWriteGuard<'_> {
        self.write_lock();
        RwWriteGuard::new(self)
    }

    fn write_lock_inner(&self) -> WaitResult {
        let me = Thread::current();
        let mut state = self.state.lock();

        if state.holder == Some(me.id()) {
            state.owner_count += WRITER_BASE;
            return Ok(());
        }

        // Announce the claim; readers arriving after this queue behind us.
        let previous = self.count.fetch_add(WRITER_BASE, Ordering::Acquire);
        if previous == 0 {
            state.holder = Some(me.id());
            state.owner_count = WRITER_BASE;
            return Ok(());
        }

        // First queued writer notes how many readers it must wait out.
        if previous < WRITER_BASE {
            state.active_readers = previous - state.pending_readers;
            debug_assert!(state.active_readers >= 0);
        }

        me.prepare_to_block();
        state.waiters.push_back(RwWaiter {
            thread: Arc::clone(&me),
            writer: true,
        });
        drop(state);
        // Holder and owner_count are filled in by the thread handing over.
        me.block(WaitFlags::empty(), None)
    }

    /// Releases one write lock; the lock stays held until the outermost
    /// write unlock, then is dispatched to the queue.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread does not hold the write lock.
    pub fn write_unlock(&self) {
        let mut state = self.state.lock();

        if state.holder != Some(ThreadId::current()) {
            panic!(
                "rwlock {:?}: write_unlock by thread {:?}, holder is {:?}",
                self.name,
                ThreadId::current(),
                state.holder
            );
        }
        debug_assert!(state.owner_count >= WRITER_BASE);
        state.owner_count -= WRITER_BASE;
        if state.owner_count >= WRITER_BASE {
            return;
        }

        // Reads we took inside our own critical section stay behind as
        // ordinary active readers.
        let self_reads = state.owner_count;
        state.holder = None;
        state.owner_count = 0;

        let previous = self.count.fetch_sub(WRITER_BASE, Ordering::Release);
        let remaining = previous - WRITER_BASE;
        if remaining == 0 {
            return;
        }

        if remaining >= WRITER_BASE {
            // Another writer is queued; it waits out our leftover reads.
            state.active_readers = self_reads;
            Self::unblock_waiters(&mut state, &self.count);
        } else {
            // Only readers remain. Wake the queued ones and record how many
            // raced the unlock and will skip the block in the slow path.
            let woken = Self::unblock_waiters(&mut state, &self.count);
            state.pending_readers = remaining - self_reads - woken;
            debug_assert!(state.pending_readers >= 0);
        }
    }

    /// Dispatches the queue head: hands the lock to a writer once no readers
    /// remain, or wakes the contiguous run of readers at the head. Returns
    /// the number of readers woken.
    fn unblock_waiters(state: &mut RwState, count: &AtomicI32) -> i32 {
        if state.holder.is_some() {
            return 0;
        }
        let Some(head) = state.waiters.front() else {
            return 0;
        };

        if head.writer {
            if state.active_readers > 0 || state.pending_readers > 0 {
                return 0;
            }
            let waiter = state.waiters.pop_front().unwrap();
            state.holder = Some(waiter.thread.id());
            state.owner_count = WRITER_BASE;
            waiter.thread.unblock(Ok(()));
            return 0;
        }

        let mut readers = 0;
        while matches!(state.waiters.front(), Some(waiter) if !waiter.writer) {
            let waiter = state.waiters.pop_front().unwrap();
            readers += 1;
            waiter.thread.unblock(Ok(()));
        }
        if count.load(Ordering::Relaxed) >= WRITER_BASE {
            state.active_readers += readers;
        }
        readers
    }
}

impl Drop for RwLock {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if state.waiters.is_empty() {
            return;
        }
        if state.holder != Some(ThreadId::current()) {
            panic!(
                "rwlock {:?}: destroyed with {} waiter(s) by a non-holder",
                self.name,
                state.waiters.len()
            );
        }
        for waiter in state.waiters.drain(..) {
            waiter.thread.unblock(Err(WaitError::Destroyed));
        }
    }
}

impl std::fmt::Debug for RwLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RwLock")
            .field("name", &self.name)
            .field("count", &self.count.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readers_share_the_lock() {
        let lock = RwLock::new("shared");
        lock.read_lock();
        lock.read_lock();
        assert_eq!(lock.count.load(Ordering::Relaxed), 2);
        lock.read_unlock();
        lock.read_unlock();
        assert_eq!(lock.count.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_write_lock_is_reentrant_for_holder() {
        let lock = RwLock::new("nested write");
        lock.write_lock();
        lock.write_lock();
        assert_eq!(lock.holder(), Some(ThreadId::current()));

        lock.write_unlock();
        assert_eq!(lock.holder(), Some(ThreadId::current()));
        lock.write_unlock();
        assert_eq!(lock.holder(), None);
        assert_eq!(lock.count.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_writer_reads_its_own_section() {
        let lock = RwLock::new("self read");
        lock.write_lock();
        lock.read_lock();
        lock.read_lock();
        lock.read_unlock();
        lock.read_unlock();
        lock.write_unlock();
        assert_eq!(lock.count.load(Ordering::Relaxed), 0);
        assert_eq!(lock.holder(), None);
    }

    #[test]
    fn test_self_reads_survive_write_unlock() {
        let lock = RwLock::new("carried reads");
        lock.write_lock();
        lock.read_lock();
        lock.write_unlock();

        // Still read-locked; a writer would have to wait for it.
        assert_eq!(lock.holder(), None);
        assert_eq!(lock.count.load(Ordering::Relaxed), 1);
        lock.read_unlock();
        assert_eq!(lock.count.load(Ordering::Relaxed), 0);
    }

    #[test]
    #[should_panic(expected = "write_unlock by thread")]
    fn test_write_unlock_without_holding_panics() {
        let lock = RwLock::new("stranger");
        lock.write_unlock();
    }
}
