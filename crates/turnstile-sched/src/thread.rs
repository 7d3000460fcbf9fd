//! Thread identity and the process-wide thread table.

use crate::park::Parker;
use crate::{WaitFlags, WaitResult};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Unique identifier for a thread known to turnstile.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(u64);

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

impl ThreadId {
    /// Identity of the calling thread, registering it on first use.
    pub fn current() -> Self {
        Thread::current().id()
    }

    /// Numeric value, usable as a map key.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

static THREADS: Lazy<DashMap<ThreadId, Weak<Thread>>> = Lazy::new(DashMap::new);

thread_local! {
    static CURRENT: Arc<Thread> = Thread::register();
}

/// Handle to one thread's parking slot.
///
/// Waiter queues hold an `Arc<Thread>` per blocked thread; whoever dequeues a
/// waiter wakes it through the handle. Only the owning thread may call
/// [`prepare_to_block`](Self::prepare_to_block) and [`block`](Self::block);
/// [`unblock`](Self::unblock) and [`interrupt`](Self::interrupt) are callable
/// from anywhere.
pub struct Thread {
    id: ThreadId,
    parker: Parker,
}

impl Thread {
    fn register() -> Arc<Self> {
        let thread = Arc::new(Thread {
            id: ThreadId(NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed)),
            parker: Parker::new(),
        });
        THREADS.insert(thread.id, Arc::downgrade(&thread));
        thread
    }

    /// Handle for the calling thread.
    pub fn current() -> Arc<Self> {
        CURRENT.with(Arc::clone)
    }

    /// This thread's identity.
    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// Commits the calling thread to an upcoming [`block`](Self::block).
    ///
    /// From this point until `block` returns, an [`unblock`](Self::unblock)
    /// is latched: if it arrives before the thread actually suspends,
    /// `block` consumes it and returns immediately.
    pub fn prepare_to_block(&self) {
        debug_assert_eq!(self.id, ThreadId::current());
        self.parker.prepare();
    }

    /// Suspends the calling thread until a result is latched or `timeout`
    /// elapses. [`prepare_to_block`](Self::prepare_to_block) must have been
    /// called first.
    ///
    /// An interruption ends the wait with [`WaitError::Interrupted`] only
    /// when `flags` contains [`WaitFlags::INTERRUPTIBLE`]; otherwise it is
    /// swallowed and the wait resumes.
    ///
    /// [`WaitError::Interrupted`]: crate::WaitError::Interrupted
    pub fn block(&self, flags: WaitFlags, timeout: Option<Duration>) -> WaitResult {
        debug_assert_eq!(self.id, ThreadId::current());
        self.parker.block(flags, timeout)
    }

    /// Wakes the thread with `result`, or latches it if the thread has
    /// prepared but not yet suspended. Returns whether the result was
    /// delivered; a thread outside its latching window ignores the wakeup.
    pub fn unblock(&self, result: WaitResult) -> bool {
        self.parker.unblock(result)
    }

    /// Delivers an interruption, waking the thread if its current wait is
    /// interruptible.
    pub fn interrupt(&self) {
        self.parker.interrupt();
    }
}

impl Drop for Thread {
    fn drop(&mut self) {
        THREADS.remove(&self.id);
    }
}

/// Unblocks the thread `id` if it is still alive. Returns whether a result
/// was delivered.
pub fn unblock(id: ThreadId, result: WaitResult) -> bool {
    let Some(entry) = THREADS.get(&id) else {
        return false;
    };
    let Some(thread) = entry.upgrade() else {
        return false;
    };
    drop(entry);
    thread.unblock(result)
}
