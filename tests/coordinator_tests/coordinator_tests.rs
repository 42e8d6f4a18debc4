//! Tests for AccessCoordinator
//!
//! These tests verify:
//! - Construction (capacity validation, modes)
//! - State transitions (Idle → ReadersActive → Draining → Exclusive → Idle)
//! - Bounded reader concurrency
//! - Writer drain waits for in-flight readers and blocks new ones
//! - Every permit is returned on error and panic paths

use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use gatekv::coordinator::{
    AccessCoordinator, AccessState, LocalSemaphore, LocalWriteLock, PermitSemaphore, WriteLock,
};
use gatekv::{ConcurrencyMode, GateError};

// =============================================================================
// Helper Types
// =============================================================================

/// Semaphore wrapper counting concurrent holders
struct CountingSemaphore {
    inner: Arc<LocalSemaphore>,
    holders: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl PermitSemaphore for CountingSemaphore {
    fn acquire(&self) -> gatekv::Result<()> {
        self.inner.acquire()?;
        let now = self.holders.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        Ok(())
    }

    fn release(&self, permits: usize) -> gatekv::Result<()> {
        self.holders.fetch_sub(permits, Ordering::SeqCst);
        self.inner.release(permits)
    }
}

/// Semaphore that fails the n-th acquire (1-based)
struct FailingSemaphore {
    inner: Arc<LocalSemaphore>,
    calls: AtomicUsize,
    fail_on: usize,
}

impl PermitSemaphore for FailingSemaphore {
    fn acquire(&self) -> gatekv::Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.fail_on {
            return Err(GateError::Coordinator("injected acquire failure".to_string()));
        }
        self.inner.acquire()
    }

    fn release(&self, permits: usize) -> gatekv::Result<()> {
        self.inner.release(permits)
    }
}

/// Shares a LocalWriteLock with the test body
struct SharedLock(Arc<LocalWriteLock>);

impl WriteLock for SharedLock {
    fn lock(&self) -> gatekv::Result<()> {
        self.0.lock()
    }

    fn unlock(&self) -> gatekv::Result<()> {
        self.0.unlock()
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

fn threads_coordinator(capacity: usize) -> Arc<AccessCoordinator> {
    Arc::new(
        AccessCoordinator::new(ConcurrencyMode::Threads, capacity, Path::new("unused.gkv"))
            .unwrap(),
    )
}

/// Poll until `f` holds or a second passes
fn wait_until(f: impl Fn() -> bool) -> bool {
    for _ in 0..100 {
        if f() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    f()
}

// =============================================================================
// Construction Tests
// =============================================================================

#[test]
fn test_zero_capacity_rejected() {
    let result = AccessCoordinator::new(ConcurrencyMode::Threads, 0, Path::new("x.gkv"));
    assert!(matches!(result, Err(GateError::Config(_))));

    let result = AccessCoordinator::from_parts(
        ConcurrencyMode::Threads,
        0,
        Box::new(LocalSemaphore::new(0)),
        Box::new(LocalWriteLock::new()),
    );
    assert!(matches!(result, Err(GateError::Config(_))));
}

#[test]
fn test_new_coordinator_is_idle() {
    let coordinator = threads_coordinator(3);

    assert_eq!(coordinator.state(), AccessState::Idle);
    assert_eq!(coordinator.capacity(), 3);
    assert_eq!(coordinator.mode(), ConcurrencyMode::Threads);
    assert_eq!(coordinator.active_readers(), 0);
    assert_eq!(coordinator.peak_readers(), 0);
}

// =============================================================================
// State Transition Tests
// =============================================================================

#[test]
fn test_readers_active_state() {
    let coordinator = threads_coordinator(3);

    let first = coordinator.read().unwrap();
    assert_eq!(coordinator.state(), AccessState::ReadersActive(1));

    let second = coordinator.read().unwrap();
    assert_eq!(coordinator.state(), AccessState::ReadersActive(2));

    drop(first);
    assert_eq!(coordinator.state(), AccessState::ReadersActive(1));

    drop(second);
    assert_eq!(coordinator.state(), AccessState::Idle);
    assert_eq!(coordinator.peak_readers(), 2);
}

#[test]
fn test_exclusive_state() {
    let coordinator = threads_coordinator(4);

    let permit = coordinator.write().unwrap();
    assert_eq!(permit.held(), 4);
    assert_eq!(coordinator.state(), AccessState::Exclusive);

    drop(permit);
    assert_eq!(coordinator.state(), AccessState::Idle);
}

#[test]
fn test_writer_drains_around_in_flight_reader() {
    let coordinator = threads_coordinator(3);
    let reader = coordinator.read().unwrap();

    let done = Arc::new(AtomicBool::new(false));
    let writer = {
        let coordinator = Arc::clone(&coordinator);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let _permit = coordinator.write().unwrap();
            done.store(true, Ordering::SeqCst);
        })
    };

    // Writer takes the two free permits and waits for the reader's
    assert!(wait_until(|| coordinator.state()
        == AccessState::Draining {
            held: 2,
            readers: 1
        }));
    thread::sleep(Duration::from_millis(30));
    assert!(!done.load(Ordering::SeqCst));

    drop(reader);
    writer.join().unwrap();

    assert!(done.load(Ordering::SeqCst));
    assert_eq!(coordinator.state(), AccessState::Idle);
}

// =============================================================================
// Blocking Tests
// =============================================================================

#[test]
fn test_reader_blocks_while_writer_exclusive() {
    let coordinator = threads_coordinator(2);
    let permit = coordinator.write().unwrap();

    let admitted = Arc::new(AtomicBool::new(false));
    let reader = {
        let coordinator = Arc::clone(&coordinator);
        let admitted = Arc::clone(&admitted);
        thread::spawn(move || {
            let _permit = coordinator.read().unwrap();
            admitted.store(true, Ordering::SeqCst);
        })
    };

    thread::sleep(Duration::from_millis(50));
    assert!(!admitted.load(Ordering::SeqCst));

    drop(permit);
    reader.join().unwrap();
    assert!(admitted.load(Ordering::SeqCst));
}

#[test]
fn test_writers_exclude_each_other() {
    let coordinator = threads_coordinator(2);
    let inside = Arc::new(AtomicUsize::new(0));
    let overlap = Arc::new(AtomicBool::new(false));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let coordinator = Arc::clone(&coordinator);
            let inside = Arc::clone(&inside);
            let overlap = Arc::clone(&overlap);
            thread::spawn(move || {
                for _ in 0..10 {
                    let _permit = coordinator.write().unwrap();
                    if inside.fetch_add(1, Ordering::SeqCst) != 0 {
                        overlap.store(true, Ordering::SeqCst);
                    }
                    thread::sleep(Duration::from_millis(1));
                    inside.fetch_sub(1, Ordering::SeqCst);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert!(!overlap.load(Ordering::SeqCst));
}

#[test]
fn test_reader_capacity_is_a_hard_bound() {
    let capacity = 2;
    let inner = Arc::new(LocalSemaphore::new(capacity));
    let holders = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let coordinator = Arc::new(
        AccessCoordinator::from_parts(
            ConcurrencyMode::Threads,
            capacity,
            Box::new(CountingSemaphore {
                inner: Arc::clone(&inner),
                holders: Arc::clone(&holders),
                peak: Arc::clone(&peak),
            }),
            Box::new(LocalWriteLock::new()),
        )
        .unwrap(),
    );

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let coordinator = Arc::clone(&coordinator);
            thread::spawn(move || {
                for _ in 0..20 {
                    let _permit = coordinator.read().unwrap();
                    thread::sleep(Duration::from_micros(200));
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert!(peak.load(Ordering::SeqCst) <= capacity);
    assert!(coordinator.peak_readers() <= capacity);
    assert_eq!(holders.load(Ordering::SeqCst), 0);
    assert_eq!(inner.available(), capacity);
}

#[test]
fn test_writer_holds_every_permit() {
    let capacity = 5;
    let inner = Arc::new(LocalSemaphore::new(capacity));
    let holders = Arc::new(AtomicUsize::new(0));

    let coordinator = AccessCoordinator::from_parts(
        ConcurrencyMode::Threads,
        capacity,
        Box::new(CountingSemaphore {
            inner: Arc::clone(&inner),
            holders: Arc::clone(&holders),
            peak: Arc::new(AtomicUsize::new(0)),
        }),
        Box::new(LocalWriteLock::new()),
    )
    .unwrap();

    let permit = coordinator.write().unwrap();
    assert_eq!(holders.load(Ordering::SeqCst), capacity);
    assert_eq!(inner.available(), 0);

    drop(permit);
    assert_eq!(holders.load(Ordering::SeqCst), 0);
    assert_eq!(inner.available(), capacity);
}

// =============================================================================
// Release Guarantee Tests
// =============================================================================

#[test]
fn test_failure_mid_drain_returns_taken_permits() {
    let inner = Arc::new(LocalSemaphore::new(3));
    let lock = Arc::new(LocalWriteLock::new());

    let coordinator = AccessCoordinator::from_parts(
        ConcurrencyMode::Threads,
        3,
        Box::new(FailingSemaphore {
            inner: Arc::clone(&inner),
            calls: AtomicUsize::new(0),
            fail_on: 3,
        }),
        Box::new(SharedLock(Arc::clone(&lock))),
    )
    .unwrap();

    let result = coordinator.write();
    assert!(matches!(result, Err(GateError::Coordinator(_))));

    assert_eq!(inner.available(), 3);
    assert!(!lock.is_locked());
    assert_eq!(coordinator.state(), AccessState::Idle);

    // Subsequent writes work
    let permit = coordinator.write().unwrap();
    assert_eq!(coordinator.state(), AccessState::Exclusive);
    drop(permit);
}

#[test]
fn test_failed_reader_acquire_leaves_no_trace() {
    let inner = Arc::new(LocalSemaphore::new(2));

    let coordinator = AccessCoordinator::from_parts(
        ConcurrencyMode::Threads,
        2,
        Box::new(FailingSemaphore {
            inner: Arc::clone(&inner),
            calls: AtomicUsize::new(0),
            fail_on: 1,
        }),
        Box::new(LocalWriteLock::new()),
    )
    .unwrap();

    assert!(coordinator.read().is_err());
    assert_eq!(coordinator.active_readers(), 0);
    assert_eq!(inner.available(), 2);
}

#[test]
fn test_panic_while_exclusive_releases_everything() {
    let coordinator = threads_coordinator(3);

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        let _permit = coordinator.write().unwrap();
        panic!("writer blew up");
    }));
    assert!(result.is_err());
    assert_eq!(coordinator.state(), AccessState::Idle);

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        let _permit = coordinator.read().unwrap();
        panic!("reader blew up");
    }));
    assert!(result.is_err());
    assert_eq!(coordinator.state(), AccessState::Idle);

    // Still fully usable
    let readers: Vec<_> = (0..3).map(|_| coordinator.read().unwrap()).collect();
    assert_eq!(coordinator.state(), AccessState::ReadersActive(3));
    drop(readers);
    drop(coordinator.write().unwrap());
}

// =============================================================================
// Process Mode Tests
// =============================================================================

#[cfg(unix)]
#[test]
fn test_process_mode_shares_permits_by_path() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let scope = temp_dir.path().join("shared.gkv");
    std::fs::write(&scope, b"").unwrap();
    AccessCoordinator::remove_named(&scope).unwrap();

    let first = Arc::new(AccessCoordinator::new(ConcurrencyMode::Processes, 2, &scope).unwrap());
    let second = Arc::new(AccessCoordinator::new(ConcurrencyMode::Processes, 2, &scope).unwrap());
    assert_eq!(first.mode(), ConcurrencyMode::Processes);

    // Both permits taken through the first handle
    let a = first.read().unwrap();
    let b = first.read().unwrap();

    let done = Arc::new(AtomicBool::new(false));
    let writer = {
        let second = Arc::clone(&second);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let _permit = second.write().unwrap();
            done.store(true, Ordering::SeqCst);
        })
    };

    thread::sleep(Duration::from_millis(50));
    assert!(!done.load(Ordering::SeqCst));

    drop(a);
    drop(b);
    writer.join().unwrap();
    assert!(done.load(Ordering::SeqCst));

    drop(first);
    drop(second);
    AccessCoordinator::remove_named(&scope).unwrap();
}

#[cfg(unix)]
#[test]
fn test_process_mode_rejects_mismatched_capacity() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let scope = temp_dir.path().join("capacity.gkv");
    std::fs::write(&scope, b"").unwrap();
    AccessCoordinator::remove_named(&scope).unwrap();

    let wide = Arc::new(AccessCoordinator::new(ConcurrencyMode::Processes, 4, &scope).unwrap());

    // A narrower handle would drain only half the permits
    let narrow = AccessCoordinator::new(ConcurrencyMode::Processes, 2, &scope);
    assert!(matches!(narrow, Err(GateError::Config(_))));

    // Same capacity is accepted and shares the permits
    let same = AccessCoordinator::new(ConcurrencyMode::Processes, 4, &scope).unwrap();
    let readers: Vec<_> = (0..2).map(|_| wide.read().unwrap()).collect();

    let done = Arc::new(AtomicBool::new(false));
    let writer = {
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let _permit = same.write().unwrap();
            done.store(true, Ordering::SeqCst);
        })
    };

    thread::sleep(Duration::from_millis(50));
    assert!(!done.load(Ordering::SeqCst));

    drop(readers);
    writer.join().unwrap();
    assert!(done.load(Ordering::SeqCst));

    // After removal the scope can be recreated with another capacity
    drop(wide);
    AccessCoordinator::remove_named(&scope).unwrap();
    let narrow = AccessCoordinator::new(ConcurrencyMode::Processes, 2, &scope).unwrap();
    assert_eq!(narrow.capacity(), 2);

    drop(narrow);
    AccessCoordinator::remove_named(&scope).unwrap();
}
