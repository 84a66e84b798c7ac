use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Counting semaphore shared by the threads of one process.
///
/// Waiters are woken roughly in arrival order; strict FIFO is not
/// guaranteed.
#[derive(Debug)]
pub struct Semaphore {
    permits: Mutex<usize>,
    available: Condvar,
}

impl Semaphore {
    /// Create a semaphore holding `permits` permits.
    pub const fn new(permits: usize) -> Self {
        Self {
            permits: Mutex::new(permits),
            available: Condvar::new(),
        }
    }

    // A panic while the counter is locked cannot leave it inconsistent.
    fn lock_permits(&self) -> MutexGuard<'_, usize> {
        self.permits.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until a permit is available, then take it.
    pub fn acquire(&self) {
        let mut permits = self.lock_permits();
        while *permits == 0 {
            permits = self
                .available
                .wait(permits)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *permits -= 1;
    }

    /// Take a permit only if one is available right now.
    pub fn try_acquire(&self) -> bool {
        let mut permits = self.lock_permits();
        if *permits == 0 {
            return false;
        }
        *permits -= 1;
        true
    }

    /// Wait at most `timeout` for a permit.
    pub fn try_acquire_for(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut permits = self.lock_permits();
        loop {
            if *permits > 0 {
                *permits -= 1;
                return true;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            permits = self
                .available
                .wait_timeout(permits, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Return one permit, waking one waiter.
    pub fn release(&self) {
        self.release_n(1);
    }

    /// Return `n` permits, waking up to `n` waiters.
    pub fn release_n(&self, n: usize) {
        if n == 0 {
            return;
        }
        let mut permits = self.lock_permits();
        *permits += n;
        drop(permits);
        for _ in 0..n {
            self.available.notify_one();
        }
    }

    /// Permits currently available. Only a snapshot under contention.
    pub fn available_permits(&self) -> usize {
        *self.lock_permits()
    }

    /// Acquire a permit that is returned when the guard drops.
    pub fn acquire_permit(&self) -> SemaphorePermit<'_> {
        self.acquire();
        SemaphorePermit { semaphore: self }
    }
}

impl Default for Semaphore {
    fn default() -> Self {
        Self::new(0)
    }
}

/// A permit held from a [`Semaphore`], released on drop.
#[must_use = "the permit is released as soon as it is dropped"]
#[derive(Debug)]
pub struct SemaphorePermit<'a> {
    semaphore: &'a Semaphore,
}

impl Drop for SemaphorePermit<'_> {
    fn drop(&mut self) {
        self.semaphore.release();
    }
}
