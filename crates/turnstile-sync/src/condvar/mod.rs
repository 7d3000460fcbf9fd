//! Condition variables keyed by object identity.
//!
//! A [`ConditionVariable`] is either anonymous (created directly and passed
//! around by `Arc`) or published in the process-wide
//! [`ConditionVariableRegistry`] under the address of the object whose state
//! change it announces. Waiting is split into two steps so the waited-on
//! predicate can be re-checked between them without losing a notification:
//! an entry is first [added](ConditionVariableEntry::add) to a variable,
//! then [waited](ConditionVariableEntry::wait) on. A notification arriving
//! between the two is latched in the entry and the wait returns immediately.

mod registry;

pub use registry::ConditionVariableRegistry;

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use turnstile_sched::{Thread, ThreadId, WaitFlags, WaitResult};

/// Where an entry stands relative to its variable.
enum EntryState {
    /// Queued on the variable, owner not yet committed to blocking.
    Added(Arc<ConditionVariable>),
    /// Queued and the owner is blocked (or about to be) on its parker.
    Waiting(Arc<ConditionVariable>),
    /// Off every queue; holds the result the next `wait` returns.
    Done(WaitResult),
}

struct EntryShared {
    thread: Arc<Thread>,
    state: Mutex<EntryState>,
}

/// One thread's ticket on a [`ConditionVariable`].
///
/// Entries are reusable: after a wait completes the entry is `Done` and can
/// be added to another variable. Dropping an entry removes it from whatever
/// queue it is still on.
pub struct ConditionVariableEntry {
    shared: Arc<EntryShared>,
}

impl ConditionVariableEntry {
    /// Creates a detached entry owned by the calling thread.
    pub fn new() -> Self {
        ConditionVariableEntry {
            shared: Arc::new(EntryShared {
                thread: Thread::current(),
                state: Mutex::new(EntryState::Done(Ok(()))),
            }),
        }
    }

    /// Queues this entry on the variable published for `object`.
    ///
    /// Returns `false` if no variable is published under `object`; the miss
    /// is latched, so a following [`wait`](Self::wait) returns
    /// [`WaitError::NotFound`] instead of blocking.
    ///
    /// # Panics
    ///
    /// Panics if this entry is still queued on a variable.
    ///
    /// [`WaitError::NotFound`]: turnstile_sched::WaitError::NotFound
    pub fn add(&mut self, object: usize) -> bool {
        assert!(
            matches!(&*self.shared.state.lock(), EntryState::Done(_)),
            "condition variable entry added while still queued"
        );
        ConditionVariableRegistry::global().add_entry(object, self)
    }

    /// Blocks until the variable this entry is queued on is notified.
    ///
    /// Returns immediately with the latched result if a notification (or an
    /// [`add`](Self::add) miss) already landed. Must be called on the thread
    /// that created the entry.
    pub fn wait(&mut self, flags: WaitFlags, timeout: Option<Duration>) -> WaitResult {
        debug_assert_eq!(self.shared.thread.id(), ThreadId::current());

        let variable = {
            let mut state = self.shared.state.lock();
            match &*state {
                EntryState::Done(result) => return *result,
                EntryState::Added(variable) => {
                    let variable = Arc::clone(variable);
                    self.shared.thread.prepare_to_block();
                    *state = EntryState::Waiting(Arc::clone(&variable));
                    variable
                }
                EntryState::Waiting(_) => unreachable!("entry waited on twice"),
            }
        };

        let result = self.shared.thread.block(flags, timeout);
        // On timeout or interruption the entry is still queued; take it off
        // before the caller can reuse or drop it.
        self.detach(&variable, result);
        result
    }

    /// Queues on `object`'s variable and waits in one call.
    pub fn wait_on(
        &mut self,
        object: usize,
        flags: WaitFlags,
        timeout: Option<Duration>,
    ) -> WaitResult {
        self.add(object);
        self.wait(flags, timeout)
    }

    /// Latches `result` so the next [`wait`](Self::wait) returns it.
    fn latch(&self, result: WaitResult) {
        *self.shared.state.lock() = EntryState::Done(result);
    }

    /// Removes this entry from `variable` unless a notifier got there first.
    fn detach(&self, variable: &Arc<ConditionVariable>, result: WaitResult) {
        let mut entries = variable.entries.lock();
        let mut state = self.shared.state.lock();
        if matches!(&*state, EntryState::Added(_) | EntryState::Waiting(_)) {
            entries.retain(|entry| !Arc::ptr_eq(entry, &self.shared));
            *state = EntryState::Done(result);
        }
    }
}

impl Default for ConditionVariableEntry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConditionVariableEntry {
    fn drop(&mut self) {
        // Entries lock before state lock, so learn the variable from the
        // state first and confirm it after both locks are held.
        loop {
            let variable = {
                let state = self.shared.state.lock();
                match &*state {
                    EntryState::Done(_) => return,
                    EntryState::Added(variable) | EntryState::Waiting(variable) => {
                        Arc::clone(variable)
                    }
                }
            };

            let mut entries = variable.entries.lock();
            let mut state = self.shared.state.lock();
            match &*state {
                EntryState::Done(_) => return,
                EntryState::Added(current) | EntryState::Waiting(current)
                    if Arc::ptr_eq(current, &variable) =>
                {
                    entries.retain(|entry| !Arc::ptr_eq(entry, &self.shared));
                    *state = EntryState::Done(Ok(()));
                    return;
                }
                _ => continue,
            }
        }
    }
}

/// A notification point, optionally published under an object address.
pub struct ConditionVariable {
    /// Address this variable is published under, 0 when anonymous or
    /// unpublished.
    object: AtomicUsize,
    object_type: Option<&'static str>,
    entries: Mutex<VecDeque<Arc<EntryShared>>>,
}

impl ConditionVariable {
    pub(crate) fn with_object(object: usize, object_type: &'static str) -> Arc<Self> {
        Arc::new(ConditionVariable {
            object: AtomicUsize::new(object),
            object_type: Some(object_type),
            entries: Mutex::new(VecDeque::new()),
        })
    }

    /// Creates a variable that is not in the registry; notify it through
    /// this handle directly.
    pub fn anonymous() -> Arc<Self> {
        Arc::new(ConditionVariable {
            object: AtomicUsize::new(0),
            object_type: None,
            entries: Mutex::new(VecDeque::new()),
        })
    }

    /// Address this variable is published under, 0 if none.
    pub fn object(&self) -> usize {
        self.object.load(Ordering::Relaxed)
    }

    /// Type tag given at publication.
    pub fn object_type(&self) -> Option<&'static str> {
        self.object_type
    }

    /// Number of entries currently queued.
    pub fn entry_count(&self) -> usize {
        self.entries.lock().len()
    }

    pub(crate) fn clear_object(&self) {
        self.object.store(0, Ordering::Relaxed);
    }

    /// Queues `entry` at the tail of this variable's list.
    ///
    /// # Panics
    ///
    /// Panics if `entry` is still queued on a variable. Re-adding it would
    /// leave a ghost node on the old queue, and a notification there would
    /// be consumed by this wait instead of a real waiter.
    pub fn add(self: &Arc<Self>, entry: &ConditionVariableEntry) {
        let mut entries = self.entries.lock();
        let mut state = entry.shared.state.lock();
        assert!(
            matches!(&*state, EntryState::Done(_)),
            "condition variable entry added while still queued"
        );
        *state = EntryState::Added(Arc::clone(self));
        entries.push_back(Arc::clone(&entry.shared));
    }

    /// Wakes the oldest queued entry.
    pub fn notify_one(&self) {
        self.notify(false, Ok(()));
    }

    /// Wakes every queued entry.
    pub fn notify_all(&self) {
        self.notify(true, Ok(()));
    }

    /// Dequeues entries and latches `result` into each. Entries whose owner
    /// is blocked are woken; the rest pick the result up at their next wait.
    pub fn notify(&self, all: bool, result: WaitResult) {
        let mut entries = self.entries.lock();
        while let Some(shared) = entries.pop_front() {
            let mut state = shared.state.lock();
            let was_waiting = matches!(&*state, EntryState::Waiting(_));
            *state = EntryState::Done(result);
            drop(state);
            if was_waiting {
                shared.thread.unblock(result);
            }
            if !all {
                break;
            }
        }
    }

    /// One-shot wait on an anonymous variable: creates an entry, queues it,
    /// and blocks.
    pub fn wait(self: &Arc<Self>, flags: WaitFlags, timeout: Option<Duration>) -> WaitResult {
        let mut entry = ConditionVariableEntry::new();
        self.add(&entry);
        entry.wait(flags, timeout)
    }
}

impl std::fmt::Debug for ConditionVariable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConditionVariable")
            .field("object", &self.object())
            .field("object_type", &self.object_type)
            .field("entries", &self.entries.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use turnstile_sched::WaitError;

    #[test]
    fn test_notify_before_wait_is_latched() {
        let var = ConditionVariable::anonymous();
        let mut entry = ConditionVariableEntry::new();
        var.add(&mut entry);
        var.notify_one();
        assert_eq!(entry.wait(WaitFlags::empty(), None), Ok(()));
        assert_eq!(var.entry_count(), 0);
    }

    #[test]
    fn test_fresh_entry_waits_nowhere() {
        let mut entry = ConditionVariableEntry::new();
        assert_eq!(entry.wait(WaitFlags::empty(), None), Ok(()));
    }

    #[test]
    fn test_timeout_removes_entry() {
        let var = ConditionVariable::anonymous();
        let mut entry = ConditionVariableEntry::new();
        var.add(&mut entry);
        assert_eq!(
            entry.wait(WaitFlags::empty(), Some(Duration::from_millis(10))),
            Err(WaitError::TimedOut)
        );
        assert_eq!(var.entry_count(), 0);
    }

    #[test]
    fn test_dropped_entry_leaves_the_queue() {
        let var = ConditionVariable::anonymous();
        {
            let mut entry = ConditionVariableEntry::new();
            var.add(&mut entry);
            assert_eq!(var.entry_count(), 1);
        }
        assert_eq!(var.entry_count(), 0);
    }

    #[test]
    fn test_notify_result_reaches_latched_entry() {
        let var = ConditionVariable::anonymous();
        let mut entry = ConditionVariableEntry::new();
        var.add(&mut entry);
        var.notify(true, Err(WaitError::Destroyed));
        assert_eq!(
            entry.wait(WaitFlags::empty(), None),
            Err(WaitError::Destroyed)
        );
    }

    #[test]
    #[should_panic(expected = "added while still queued")]
    fn test_adding_a_queued_entry_panics() {
        let first = ConditionVariable::anonymous();
        let second = ConditionVariable::anonymous();
        let mut entry = ConditionVariableEntry::new();
        first.add(&mut entry);
        second.add(&mut entry);
    }

    #[test]
    fn test_entry_is_reusable_after_wait() {
        let var = ConditionVariable::anonymous();
        let mut entry = ConditionVariableEntry::new();
        var.add(&mut entry);
        var.notify_one();
        assert_eq!(entry.wait(WaitFlags::empty(), None), Ok(()));

        var.add(&mut entry);
        var.notify_one();
        assert_eq!(entry.wait(WaitFlags::empty(), None), Ok(()));
    }
}
