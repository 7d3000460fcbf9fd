//! Scheduler seam for the turnstile synchronization crates.
//!
//! This crate provides the pieces a blocking lock needs from its host:
//! - Thread identity ([`ThreadId`], [`Thread::current`])
//! - Suspension with a latched result ([`Thread::block`], [`Thread::unblock`])
//! - Interruption delivery ([`Thread::interrupt`])
//! - A counting [`Semaphore`] for the benaphore fallback path
//!
//! The block/unblock pair is two-phase: a thread first calls
//! [`Thread::prepare_to_block`], then publishes its handle (typically by
//! enqueuing it on a waiter list), then calls [`Thread::block`]. Any
//! `unblock` delivered between `prepare_to_block` and `block` is latched and
//! returned without suspending at all, which is what makes lost wakeups
//! impossible for the lock crates built on top.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod park;
mod sem;
mod thread;

pub use park::WaitFlags;
pub use sem::Semaphore;
pub use thread::{unblock, Thread, ThreadId};

/// Ways a wait can end without the waited-for event arriving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum WaitError {
    /// The timeout elapsed before the thread was unblocked.
    #[error("wait timed out")]
    TimedOut,

    /// The wait was interruptible and an interruption was delivered.
    #[error("wait interrupted")]
    Interrupted,

    /// The waited-on object does not exist or was unpublished.
    #[error("object not found")]
    NotFound,

    /// The primitive was destroyed while threads were still waiting on it.
    #[error("destroyed while waiting")]
    Destroyed,
}

/// Result latched into a blocked thread by whoever unblocks it.
pub type WaitResult = Result<(), WaitError>;
