//! Latched-result parking slot, one per thread.

use crate::{WaitError, WaitResult};
use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

bitflags::bitflags! {
    /// Flags controlling how a blocked thread may be woken early.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct WaitFlags: u32 {
        /// The wait may be cancelled by [`Thread::interrupt`].
        ///
        /// Without this flag an interruption is swallowed and the wait
        /// continues.
        ///
        /// [`Thread::interrupt`]: crate::Thread::interrupt
        const INTERRUPTIBLE = 0b1;
    }
}

#[derive(Default)]
struct ParkSlot {
    /// The thread has committed to blocking; an unblock arriving now is
    /// latched for it.
    primed: bool,
    latched: Option<WaitResult>,
    interrupted: bool,
}

pub(crate) struct Parker {
    slot: Mutex<ParkSlot>,
    condvar: Condvar,
}

impl Parker {
    pub(crate) fn new() -> Self {
        Parker {
            slot: Mutex::new(ParkSlot::default()),
            condvar: Condvar::new(),
        }
    }

    /// Opens the latching window. Must precede `block`.
    pub(crate) fn prepare(&self) {
        let mut slot = self.slot.lock();
        debug_assert!(!slot.primed, "prepare_to_block called twice");
        debug_assert!(slot.latched.is_none());
        slot.primed = true;
    }

    /// Suspends until a result is latched, the timeout elapses, or an
    /// interruption arrives and `flags` allow surfacing it. The latching
    /// window is closed on return, whichever way the wait ends.
    pub(crate) fn block(&self, flags: WaitFlags, timeout: Option<Duration>) -> WaitResult {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut slot = self.slot.lock();
        debug_assert!(slot.primed || slot.latched.is_some());
        loop {
            if let Some(result) = slot.latched.take() {
                slot.primed = false;
                return result;
            }
            if slot.interrupted {
                slot.interrupted = false;
                if flags.contains(WaitFlags::INTERRUPTIBLE) {
                    slot.primed = false;
                    return Err(WaitError::Interrupted);
                }
                // Uninterruptible wait: swallow it and keep waiting.
            }
            match deadline {
                None => self.condvar.wait(&mut slot),
                Some(deadline) => {
                    if self.condvar.wait_until(&mut slot, deadline).timed_out() {
                        slot.primed = false;
                        if let Some(result) = slot.latched.take() {
                            return result;
                        }
                        return Err(WaitError::TimedOut);
                    }
                }
            }
        }
    }

    /// Latches `result` and wakes the thread. A no-op if the latching window
    /// is not open (the target already gave up its wait); returns whether the
    /// result was delivered.
    pub(crate) fn unblock(&self, result: WaitResult) -> bool {
        let mut slot = self.slot.lock();
        if !slot.primed {
            return false;
        }
        debug_assert!(slot.latched.is_none(), "thread unblocked twice");
        slot.primed = false;
        slot.latched = Some(result);
        self.condvar.notify_one();
        true
    }

    pub(crate) fn interrupt(&self) {
        let mut slot = self.slot.lock();
        slot.interrupted = true;
        self.condvar.notify_one();
    }
}
