//! Blocking, queue-based synchronization primitives.
//!
//! This crate provides the lock layer a kernel-style runtime builds
//! everything else on:
//! - [`Gate`]: a benaphore (atomic counter fast path, semaphore fallback)
//!   guarding each primitive's own bookkeeping
//! - [`Mutex`]: exclusive lock with an atomic fast path and a FIFO blocking
//!   slow path, plus a reentrant [`RecursiveLock`] wrapper
//! - [`RwLock`]: shared/exclusive lock with FIFO queueing and writer
//!   preference
//! - [`ConditionVariable`] / [`ConditionVariableRegistry`]: condition
//!   variables keyed by arbitrary object identity
//!
//! All blocking is real thread suspension through [`turnstile_sched`]; none
//! of the primitives spin. Waiter queues are strict FIFO, and an unlocking
//! thread hands ownership directly to the queue head, so a woken thread
//! never re-contends for the wakeup it was given.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod condvar;
pub mod gate;
pub mod guard;
pub mod mutex;
pub mod recursive;
pub mod rwlock;

pub use condvar::{ConditionVariable, ConditionVariableEntry, ConditionVariableRegistry};
pub use gate::{Gate, GateGuard};
pub use guard::{MutexGuard, RecursiveLockGuard, RwReadGuard, RwWriteGuard};
pub use mutex::Mutex;
pub use recursive::RecursiveLock;
pub use rwlock::RwLock;
pub use turnstile_sched::{Thread, ThreadId, WaitError, WaitFlags, WaitResult};
