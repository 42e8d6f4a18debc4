//! Named POSIX semaphores
//!
//! Cross-process primitives. Every process that opens the same snapshot
//! file derives the same names and so shares the same semaphores.

use std::ffi::CString;
use std::fs;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{GateError, Result};

use super::{PermitSemaphore, WriteLock};

/// Semaphore names derived from one snapshot path
pub(crate) struct ScopeNames {
    /// Reader permits
    pub read: String,

    /// Writer exclusion
    pub write: String,

    /// Never waited on; its count is the capacity the permits were created with
    pub capacity: String,
}

/// Names for the semaphores of `scope`
///
/// Short enough for platforms capping names at 31 bytes.
pub(crate) fn names_for(scope: &Path) -> ScopeNames {
    let canonical = canonical_scope(scope);
    let tag = crc32fast::hash(canonical.as_os_str().as_bytes());
    ScopeNames {
        read: format!("/gatekv-{:08x}-read", tag),
        write: format!("/gatekv-{:08x}-write", tag),
        capacity: format!("/gatekv-{:08x}-cap", tag),
    }
}

/// Canonical form of `scope`, resolving the parent when the file does not exist yet
fn canonical_scope(scope: &Path) -> PathBuf {
    if let Ok(canonical) = fs::canonicalize(scope) {
        return canonical;
    }
    match (scope.parent(), scope.file_name()) {
        (Some(parent), Some(name)) => fs::canonicalize(parent)
            .map(|dir| dir.join(name))
            .unwrap_or_else(|_| scope.to_path_buf()),
        _ => scope.to_path_buf(),
    }
}

/// Record `capacity` under `name`, or check it against the one already recorded
///
/// Every handle on a scope must drain the same number of permits; a
/// mismatch is a configuration error.
pub(crate) fn claim_capacity(name: &str, capacity: usize) -> Result<()> {
    if NamedSemaphore::create_new(name, capacity)?.is_some() {
        debug!(name = name, capacity = capacity, "Recorded reader capacity");
        return Ok(());
    }

    let marker = NamedSemaphore::open(name, capacity)?;
    let recorded = marker.value()?;
    if recorded != capacity {
        return Err(GateError::Config(format!(
            "named semaphores for this file were created with read capacity {}, not {}; \
             remove them (AccessCoordinator::remove_named or gatekv-cli --reset) once no process uses the store",
            recorded, capacity
        )));
    }
    Ok(())
}

/// A `sem_open` handle
pub struct NamedSemaphore {
    name: CString,
    handle: *mut libc::sem_t,
}

// SAFETY: sem_t handles are process-wide and the sem_* calls are thread-safe.
unsafe impl Send for NamedSemaphore {}
unsafe impl Sync for NamedSemaphore {}

impl NamedSemaphore {
    /// Open `name`, creating it with `initial` permits if it does not exist
    ///
    /// An existing semaphore keeps its current count.
    pub fn open(name: &str, initial: usize) -> Result<Self> {
        Self::open_with(name, initial, libc::O_CREAT)?.ok_or_else(|| {
            GateError::Coordinator(format!("sem_open({}) reported an existing name", name))
        })
    }

    /// Create `name` with `initial` permits; `None` if it already exists
    pub fn create_new(name: &str, initial: usize) -> Result<Option<Self>> {
        Self::open_with(name, initial, libc::O_CREAT | libc::O_EXCL)
    }

    fn open_with(name: &str, initial: usize, flags: libc::c_int) -> Result<Option<Self>> {
        let c_name = CString::new(name)
            .map_err(|e| GateError::Config(format!("bad semaphore name {:?}: {}", name, e)))?;
        let value = libc::c_uint::try_from(initial)
            .map_err(|_| GateError::Config(format!("semaphore count {} too large", initial)))?;

        // SAFETY: c_name is NUL-terminated and outlives the call
        let handle = unsafe { libc::sem_open(c_name.as_ptr(), flags, 0o600 as libc::c_uint, value) };

        if handle == libc::SEM_FAILED {
            let err = io::Error::last_os_error();
            if flags & libc::O_EXCL != 0 && err.raw_os_error() == Some(libc::EEXIST) {
                return Ok(None);
            }
            return Err(GateError::Coordinator(format!(
                "sem_open({}) failed: {}",
                name, err
            )));
        }

        debug!(name = name, initial = initial, "Named semaphore opened");
        Ok(Some(Self {
            name: c_name,
            handle,
        }))
    }

    /// Current count
    pub fn value(&self) -> Result<usize> {
        let mut value: libc::c_int = 0;
        // SAFETY: handle came from a successful sem_open; value is a valid out pointer
        if unsafe { libc::sem_getvalue(self.handle, &mut value) } != 0 {
            return Err(GateError::Coordinator(format!(
                "sem_getvalue({}) failed: {}",
                self.name(),
                io::Error::last_os_error()
            )));
        }
        // Linux reports 0 rather than a negative waiter count
        Ok(usize::try_from(value).unwrap_or(0))
    }

    /// Remove `name`; a missing name is not an error
    pub fn unlink(name: &str) -> Result<()> {
        let c_name = CString::new(name)
            .map_err(|e| GateError::Config(format!("bad semaphore name {:?}: {}", name, e)))?;

        // SAFETY: c_name is NUL-terminated and outlives the call
        if unsafe { libc::sem_unlink(c_name.as_ptr()) } != 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ENOENT) {
                return Err(GateError::Coordinator(format!(
                    "sem_unlink({}) failed: {}",
                    name, err
                )));
            }
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        self.name.to_str().unwrap_or("<invalid>")
    }
}

impl PermitSemaphore for NamedSemaphore {
    fn acquire(&self) -> Result<()> {
        loop {
            // SAFETY: handle came from a successful sem_open and is closed only on drop
            if unsafe { libc::sem_wait(self.handle) } == 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(GateError::Coordinator(format!(
                    "sem_wait({}) failed: {}",
                    self.name(),
                    err
                )));
            }
        }
    }

    fn release(&self, permits: usize) -> Result<()> {
        for _ in 0..permits {
            // SAFETY: handle came from a successful sem_open and is closed only on drop
            if unsafe { libc::sem_post(self.handle) } != 0 {
                return Err(GateError::Coordinator(format!(
                    "sem_post({}) failed: {}",
                    self.name(),
                    io::Error::last_os_error()
                )));
            }
        }
        Ok(())
    }
}

impl Drop for NamedSemaphore {
    fn drop(&mut self) {
        // SAFETY: handle came from a successful sem_open and is not used after this
        unsafe {
            libc::sem_close(self.handle);
        }
        debug!(name = self.name(), "Named semaphore closed");
    }
}

/// Writer mutex as a named binary semaphore
pub struct NamedWriteLock(NamedSemaphore);

impl NamedWriteLock {
    pub fn open(name: &str) -> Result<Self> {
        NamedSemaphore::open(name, 1).map(Self)
    }
}

impl WriteLock for NamedWriteLock {
    fn lock(&self) -> Result<()> {
        self.0.acquire()
    }

    fn unlock(&self) -> Result<()> {
        self.0.release(1)
    }
}
