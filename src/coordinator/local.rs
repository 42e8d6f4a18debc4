//! In-process primitives
//!
//! Counting semaphore and write lock for threads sharing one store,
//! built on parking_lot's Mutex + Condvar.

use parking_lot::{Condvar, Mutex};

use crate::error::{GateError, Result};

use super::{PermitSemaphore, WriteLock};

/// Counting semaphore with a fixed maximum
pub struct LocalSemaphore {
    /// Maximum (and initial) number of permits
    capacity: usize,

    /// Permits not currently handed out
    available: Mutex<usize>,

    /// Signalled whenever permits come back
    freed: Condvar,
}

impl LocalSemaphore {
    /// Create a semaphore with `capacity` permits, all available
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            available: Mutex::new(capacity),
            freed: Condvar::new(),
        }
    }

    /// Permits not currently handed out
    pub fn available(&self) -> usize {
        *self.available.lock()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl PermitSemaphore for LocalSemaphore {
    fn acquire(&self) -> Result<()> {
        let mut available = self.available.lock();
        while *available == 0 {
            self.freed.wait(&mut available);
        }
        *available -= 1;
        Ok(())
    }

    fn release(&self, permits: usize) -> Result<()> {
        let mut available = self.available.lock();
        if *available + permits > self.capacity {
            return Err(GateError::Coordinator(format!(
                "releasing {} permits would exceed capacity {} ({} available)",
                permits, self.capacity, *available
            )));
        }
        *available += permits;
        drop(available);

        if permits == 1 {
            self.freed.notify_one();
        } else {
            self.freed.notify_all();
        }
        Ok(())
    }
}

/// Writer mutex with explicit lock/unlock
pub struct LocalWriteLock {
    /// true = held
    locked: Mutex<bool>,

    /// Signalled on unlock
    released: Condvar,
}

impl LocalWriteLock {
    pub fn new() -> Self {
        Self {
            locked: Mutex::new(false),
            released: Condvar::new(),
        }
    }

    /// Whether some writer holds the lock
    pub fn is_locked(&self) -> bool {
        *self.locked.lock()
    }
}

impl Default for LocalWriteLock {
    fn default() -> Self {
        Self::new()
    }
}

impl WriteLock for LocalWriteLock {
    fn lock(&self) -> Result<()> {
        let mut locked = self.locked.lock();
        while *locked {
            self.released.wait(&mut locked);
        }
        *locked = true;
        Ok(())
    }

    fn unlock(&self) -> Result<()> {
        let mut locked = self.locked.lock();
        if !*locked {
            return Err(GateError::Coordinator(
                "write lock released while not held".to_string(),
            ));
        }
        *locked = false;
        drop(locked);

        self.released.notify_one();
        Ok(())
    }
}
