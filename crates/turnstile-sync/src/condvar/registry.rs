//! Process-wide table of published condition variables.

use super::{ConditionVariable, ConditionVariableEntry};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::sync::Arc;
use turnstile_sched::WaitError;

static REGISTRY: Lazy<ConditionVariableRegistry> = Lazy::new(|| ConditionVariableRegistry {
    table: DashMap::new(),
});

/// Maps object addresses to their published [`ConditionVariable`].
///
/// Publication keys are addresses of live objects, so 0 is reserved and a
/// key is unique while published. Waiters reach a variable through
/// [`ConditionVariableEntry::add`]; notifiers through
/// [`notify_one`](Self::notify_one) and [`notify_all`](Self::notify_all).
pub struct ConditionVariableRegistry {
    table: DashMap<usize, Arc<ConditionVariable>>,
}

impl ConditionVariableRegistry {
    /// The process-wide registry.
    pub fn global() -> &'static ConditionVariableRegistry {
        &REGISTRY
    }

    /// Publishes a new variable under `object`.
    ///
    /// # Panics
    ///
    /// Panics if `object` is 0 or already has a published variable.
    pub fn publish(&self, object: usize, object_type: &'static str) -> Arc<ConditionVariable> {
        assert_ne!(object, 0, "cannot publish a condition variable for 0");
        match self.table.entry(object) {
            Entry::Occupied(occupied) => panic!(
                "object {:#x} already published as {:?}",
                object,
                occupied.get().object_type()
            ),
            Entry::Vacant(vacant) => {
                let variable = ConditionVariable::with_object(object, object_type);
                vacant.insert(Arc::clone(&variable));
                variable
            }
        }
    }

    /// Withdraws `object`'s variable and fails every queued waiter with
    /// [`WaitError::NotFound`]. No-op if nothing is published.
    pub fn unpublish(&self, object: usize) {
        let Some((_, variable)) = self.table.remove(&object) else {
            return;
        };
        variable.clear_object();
        variable.notify(true, Err(WaitError::NotFound));
    }

    /// The variable published under `object`, if any.
    pub fn get(&self, object: usize) -> Option<Arc<ConditionVariable>> {
        self.table.get(&object).map(|entry| Arc::clone(&entry))
    }

    /// Wakes the oldest waiter on `object`'s variable. No-op on a miss.
    pub fn notify_one(&self, object: usize) {
        if let Some(variable) = self.get(object) {
            variable.notify_one();
        }
    }

    /// Wakes every waiter on `object`'s variable. No-op on a miss.
    pub fn notify_all(&self, object: usize) {
        if let Some(variable) = self.get(object) {
            variable.notify_all();
        }
    }

    /// Queues `entry` under `object`, latching a miss into the entry.
    ///
    /// The table shard stays read-locked across the add, so the entry is
    /// either fully queued before an unpublish drains the variable, or it
    /// sees the miss; it can never land on a variable the drain skipped.
    pub(crate) fn add_entry(&self, object: usize, entry: &ConditionVariableEntry) -> bool {
        match self.table.get(&object) {
            Some(variable) => {
                variable.add(entry);
                true
            }
            None => {
                entry.latch(Err(WaitError::NotFound));
                false
            }
        }
    }
}
