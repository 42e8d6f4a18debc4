//! Coordinator Module
//!
//! Bounded-reader / exclusive-writer access built from a counting semaphore
//! and a write lock, without a native readers-writer primitive.
//!
//! ## Protocol
//! - **Read**: take one permit, run, give it back
//! - **Write**: take the write lock, then drain every permit one at a time
//!   (in-flight readers finish and return theirs, new readers block), run,
//!   give all permits back, release the write lock
//!
//! ## States
//! ```text
//!            reader in               writer locks
//!   Idle ─────────────▶ ReadersActive(n) ─────────▶ Draining { held, readers }
//!    ▲                                                        │ held == capacity
//!    │               permits + lock released                  ▼
//!    └──────────────────────────────────────────────────── Exclusive
//! ```
//!
//! Releases happen in guard destructors, so an error or panic anywhere
//! (including half-way through a drain) returns exactly the permits that
//! were taken.
//!
//! ## Fairness
//! None. Readers returning permits can be re-admitted before a draining
//! writer collects them, and a draining writer holding some permits keeps
//! new readers out until it finishes.

mod local;
#[cfg(unix)]
mod named;

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tracing::{debug, error, info};

use crate::config::ConcurrencyMode;
use crate::error::{GateError, Result};

pub use local::{LocalSemaphore, LocalWriteLock};
#[cfg(unix)]
pub use named::{NamedSemaphore, NamedWriteLock};

/// Counting semaphore handing out reader permits
pub trait PermitSemaphore: Send + Sync {
    /// Block until one permit is available and take it
    fn acquire(&self) -> Result<()>;

    /// Return `permits` permits
    fn release(&self, permits: usize) -> Result<()>;
}

/// Mutual exclusion among writers
pub trait WriteLock: Send + Sync {
    /// Block until the lock is free and take it
    fn lock(&self) -> Result<()>;

    /// Release a lock previously taken with `lock`
    fn unlock(&self) -> Result<()>;
}

/// Observable coordinator state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessState {
    /// Nobody holds anything
    Idle,

    /// `n` readers hold a permit each
    ReadersActive(usize),

    /// A writer holds the lock and `held` permits; `readers` are still in flight
    Draining { held: usize, readers: usize },

    /// A writer holds the lock and every permit
    Exclusive,
}

/// Owns the semaphore and write lock for one store
///
/// Counters are this process's view; in `Processes` mode other processes'
/// holders are not visible here.
pub struct AccessCoordinator {
    mode: ConcurrencyMode,

    /// Reader capacity (total permits)
    capacity: usize,

    /// Reader admission
    permits: Box<dyn PermitSemaphore>,

    /// Writer exclusion
    write_lock: Box<dyn WriteLock>,

    /// Readers currently holding a permit
    active_readers: AtomicUsize,

    /// Highest `active_readers` ever observed
    peak_readers: AtomicUsize,

    /// Permits currently held by the writer
    drained: AtomicUsize,

    /// A writer holds the write lock
    writer: AtomicBool,
}

impl AccessCoordinator {
    /// Build the primitives for `mode` with `capacity` reader permits
    ///
    /// `scope` is the snapshot path; in `Processes` mode it names the OS
    /// semaphores so every process opening the same file shares them, and
    /// every handle on the scope must ask for the capacity they were created
    /// with.
    pub fn new(mode: ConcurrencyMode, capacity: usize, scope: &Path) -> Result<Self> {
        check_capacity(capacity)?;

        let (permits, write_lock) = match mode {
            ConcurrencyMode::Threads => Self::local_primitives(capacity),
            ConcurrencyMode::Processes => Self::named_primitives(capacity, scope)?,
        };

        let coordinator = Self::from_parts(mode, capacity, permits, write_lock)?;

        info!(
            mode = ?mode,
            capacity = capacity,
            scope = %scope.display(),
            "Access coordinator initialized"
        );

        Ok(coordinator)
    }

    /// Assemble a coordinator from caller-supplied primitives
    ///
    /// `permits` must start with exactly `capacity` permits available and
    /// `write_lock` must start unlocked.
    pub fn from_parts(
        mode: ConcurrencyMode,
        capacity: usize,
        permits: Box<dyn PermitSemaphore>,
        write_lock: Box<dyn WriteLock>,
    ) -> Result<Self> {
        check_capacity(capacity)?;

        Ok(Self {
            mode,
            capacity,
            permits,
            write_lock,
            active_readers: AtomicUsize::new(0),
            peak_readers: AtomicUsize::new(0),
            drained: AtomicUsize::new(0),
            writer: AtomicBool::new(false),
        })
    }

    fn local_primitives(capacity: usize) -> (Box<dyn PermitSemaphore>, Box<dyn WriteLock>) {
        let permits: Box<dyn PermitSemaphore> = Box::new(LocalSemaphore::new(capacity));
        let write_lock: Box<dyn WriteLock> = Box::new(LocalWriteLock::new());
        (permits, write_lock)
    }

    #[cfg(unix)]
    fn named_primitives(
        capacity: usize,
        scope: &Path,
    ) -> Result<(Box<dyn PermitSemaphore>, Box<dyn WriteLock>)> {
        let names = named::names_for(scope);
        named::claim_capacity(&names.capacity, capacity)?;

        let permits: Box<dyn PermitSemaphore> = Box::new(NamedSemaphore::open(&names.read, capacity)?);
        let write_lock: Box<dyn WriteLock> = Box::new(NamedWriteLock::open(&names.write)?);
        Ok((permits, write_lock))
    }

    #[cfg(not(unix))]
    fn named_primitives(
        _capacity: usize,
        _scope: &Path,
    ) -> Result<(Box<dyn PermitSemaphore>, Box<dyn WriteLock>)> {
        Err(GateError::Config(
            "process mode needs named semaphores, which this platform lacks".to_string(),
        ))
    }

    /// Remove the named semaphores bound to `scope`
    ///
    /// Names outlive every handle, including their counts. A process killed
    /// while holding permits leaves them taken, and later writers on the
    /// scope block for good. Call this once no process uses the store to
    /// start over, or to change the read capacity.
    #[cfg(unix)]
    pub fn remove_named(scope: &Path) -> Result<()> {
        let names = named::names_for(scope);
        NamedSemaphore::unlink(&names.read)?;
        NamedSemaphore::unlink(&names.write)?;
        NamedSemaphore::unlink(&names.capacity)
    }

    // =========================================================================
    // Acquisition
    // =========================================================================

    /// Take one reader permit, blocking until one is free
    pub fn read(&self) -> Result<ReadPermit<'_>> {
        self.permits.acquire()?;

        let now = self.active_readers.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_readers.fetch_max(now, Ordering::SeqCst);
        debug!(active_readers = now, "Read permit acquired");

        Ok(ReadPermit { coordinator: self })
    }

    /// Take the write lock and drain every permit, blocking as needed
    pub fn write(&self) -> Result<WritePermit<'_>> {
        self.write_lock.lock()?;
        self.writer.store(true, Ordering::SeqCst);

        // From here on the guard owns the cleanup
        let mut permit = WritePermit {
            coordinator: self,
            held: 0,
        };

        for _ in 0..self.capacity {
            self.permits.acquire()?;
            permit.held += 1;
            self.drained.fetch_add(1, Ordering::SeqCst);
        }

        debug!(permits = permit.held, "Write access exclusive");
        Ok(permit)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Current state of the protocol
    pub fn state(&self) -> AccessState {
        let readers = self.active_readers.load(Ordering::SeqCst);

        if self.writer.load(Ordering::SeqCst) {
            let held = self.drained.load(Ordering::SeqCst);
            if held == self.capacity {
                AccessState::Exclusive
            } else {
                AccessState::Draining { held, readers }
            }
        } else if readers > 0 {
            AccessState::ReadersActive(readers)
        } else {
            AccessState::Idle
        }
    }

    pub fn mode(&self) -> ConcurrencyMode {
        self.mode
    }

    /// Maximum number of concurrent readers
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Readers holding a permit right now
    pub fn active_readers(&self) -> usize {
        self.active_readers.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous readers seen so far
    pub fn peak_readers(&self) -> usize {
        self.peak_readers.load(Ordering::SeqCst)
    }
}

fn check_capacity(capacity: usize) -> Result<()> {
    if capacity == 0 {
        return Err(GateError::Config(
            "read capacity must be at least 1".to_string(),
        ));
    }
    Ok(())
}

impl Drop for AccessCoordinator {
    fn drop(&mut self) {
        info!(mode = ?self.mode, "Closed access coordinator primitives");
    }
}

/// One reader permit; returned on drop
#[must_use = "the permit is released as soon as it is dropped"]
pub struct ReadPermit<'a> {
    coordinator: &'a AccessCoordinator,
}

impl Drop for ReadPermit<'_> {
    fn drop(&mut self) {
        let c = self.coordinator;
        c.active_readers.fetch_sub(1, Ordering::SeqCst);

        if let Err(e) = c.permits.release(1) {
            error!(error = %e, "Releasing read permit failed");
        }
    }
}

/// Write lock plus the permits drained so far; all returned on drop
#[must_use = "exclusivity ends as soon as the permit is dropped"]
pub struct WritePermit<'a> {
    coordinator: &'a AccessCoordinator,
    held: usize,
}

impl WritePermit<'_> {
    /// Permits held by this writer
    pub fn held(&self) -> usize {
        self.held
    }
}

impl Drop for WritePermit<'_> {
    fn drop(&mut self) {
        let c = self.coordinator;

        if self.held > 0 {
            c.drained.fetch_sub(self.held, Ordering::SeqCst);
            if let Err(e) = c.permits.release(self.held) {
                error!(permits = self.held, error = %e, "Releasing drained permits failed");
            }
        }

        c.writer.store(false, Ordering::SeqCst);
        if let Err(e) = c.write_lock.unlock() {
            error!(error = %e, "Releasing write lock failed");
        }

        debug!(permits = self.held, "Write access released");
    }
}
