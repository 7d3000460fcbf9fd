//! Counting semaphore backing the benaphore gate.

use parking_lot::{Condvar, Mutex};

/// Counting semaphore.
///
/// `acquire` is deliberately uninterruptible: the gate built on top of this
/// must never give up half-way, so the wait is simply resumed until a permit
/// arrives.
pub struct Semaphore {
    permits: Mutex<u32>,
    condvar: Condvar,
}

impl Semaphore {
    /// Creates a semaphore holding `permits` permits.
    pub fn new(permits: u32) -> Self {
        Semaphore {
            permits: Mutex::new(permits),
            condvar: Condvar::new(),
        }
    }

    /// Takes one permit, blocking until one is available.
    pub fn acquire(&self) {
        let mut permits = self.permits.lock();
        while *permits == 0 {
            self.condvar.wait(&mut permits);
        }
        *permits -= 1;
    }

    /// Returns one permit and wakes one blocked acquirer.
    pub fn release(&self) {
        let mut permits = self.permits.lock();
        *permits += 1;
        self.condvar.notify_one();
    }

    /// Permits currently available.
    pub fn available(&self) -> u32 {
        *self.permits.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_semaphore_counts_permits() {
        let sem = Semaphore::new(2);
        sem.acquire();
        sem.acquire();
        assert_eq!(sem.available(), 0);

        sem.release();
        assert_eq!(sem.available(), 1);
        sem.acquire();
        assert_eq!(sem.available(), 0);
    }

    #[test]
    fn test_acquire_blocks_until_release() {
        let sem = Arc::new(Semaphore::new(0));

        let waiter = {
            let sem = Arc::clone(&sem);
            std::thread::spawn(move || sem.acquire())
        };

        std::thread::sleep(Duration::from_millis(20));
        sem.release();
        waiter.join().unwrap();
        assert_eq!(sem.available(), 0);
    }
}
