use std::sync::{Condvar, Mutex, PoisonError};

use super::KernelError;

/// Counting semaphore built on a mutex-guarded permit count and a condvar.
pub struct Semaphore {
    permits: Mutex<usize>,
    released: Condvar,
}

impl Semaphore {
    pub fn new(permits: usize) -> Semaphore {
        Semaphore {
            permits: Mutex::new(permits),
            released: Condvar::new(),
        }
    }

    /// Blocks until a permit is free.
    pub fn acquire(&self) -> Result<SemaphorePermit<'_>, KernelError> {
        let permits = self.permits.lock().map_err(|_| Self::lock_error())?;
        let mut permits = self
            .released
            .wait_while(permits, |permits| *permits == 0)
            .map_err(|_| Self::lock_error())?;

        *permits -= 1;
        Ok(SemaphorePermit { semaphore: self })
    }

    pub fn available_permits(&self) -> usize {
        *self.permits.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self) {
        let mut permits = self.permits.lock().unwrap_or_else(PoisonError::into_inner);
        *permits += 1;
        self.released.notify_one();
    }

    fn lock_error() -> KernelError {
        KernelError::LockAcquisition { lock: "semaphore" }
    }
}

/// Returns its permit on drop.
pub struct SemaphorePermit<'a> {
    semaphore: &'a Semaphore,
}

impl Drop for SemaphorePermit<'_> {
    fn drop(&mut self) {
        self.semaphore.release();
    }
}
