//! Counting semaphores shared between processes.

use std::ffi::CString;
use std::io;
use std::ptr::NonNull;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

#[cfg(not(target_os = "linux"))]
use crate::clock::poll_until;
#[cfg(target_os = "linux")]
use crate::clock::realtime_deadline;
use crate::error::{Result, SyncError};
use crate::name::{os_name, Namespace};

const SEM_MODE: libc::mode_t = 0o600;

/// POSIX named semaphore identified by name.
///
/// The initial count only applies when the call creates the semaphore;
/// opening an existing one keeps its current count. The name outlives every
/// handle until [`NamedSemaphore::remove`] is called.
pub struct NamedSemaphore {
    sem: NonNull<libc::sem_t>,
    name: String,
}

// SAFETY: sem_* operations are thread-safe on a shared handle.
unsafe impl Send for NamedSemaphore {}
unsafe impl Sync for NamedSemaphore {}

impl NamedSemaphore {
    /// Open `name`, creating it with `initial` permits if missing.
    pub fn open(name: &str, initial: u32) -> Result<Self> {
        let create_err = |source: io::Error| SyncError::Create {
            name: name.to_string(),
            source,
        };
        let c_name = CString::new(os_name(Namespace::Semaphore, name)?)
            .map_err(|err| create_err(io::Error::other(err)))?;

        // SAFETY: `c_name` is NUL-terminated; the variadic arguments match
        // what sem_open reads when O_CREAT is set.
        let sem = unsafe {
            libc::sem_open(
                c_name.as_ptr(),
                libc::O_CREAT,
                SEM_MODE as libc::c_uint,
                initial as libc::c_uint,
            )
        };
        if sem == libc::SEM_FAILED {
            return Err(create_err(io::Error::last_os_error()));
        }
        let sem = NonNull::new(sem).ok_or_else(|| create_err(io::Error::other("sem_open returned null")))?;

        debug!(name, initial, "opened named semaphore");
        Ok(Self {
            sem,
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Block until a permit is available, then take it.
    pub fn acquire(&self) -> Result<()> {
        loop {
            // SAFETY: `sem` is an open semaphore handle.
            if unsafe { libc::sem_wait(self.sem.as_ptr()) } == 0 {
                trace!(name = %self.name, "acquired permit");
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(SyncError::Io(err));
            }
        }
    }

    /// Take a permit only if one is available right now.
    pub fn try_acquire(&self) -> Result<bool> {
        loop {
            // SAFETY: `sem` is an open semaphore handle.
            if unsafe { libc::sem_trywait(self.sem.as_ptr()) } == 0 {
                return Ok(true);
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EAGAIN) => return Ok(false),
                Some(libc::EINTR) => continue,
                _ => return Err(SyncError::Io(err)),
            }
        }
    }

    /// Wait at most `timeout` for a permit.
    pub fn try_acquire_for(&self, timeout: Duration) -> Result<bool> {
        self.acquire_until(Instant::now() + timeout)
    }

    #[cfg(target_os = "linux")]
    fn acquire_until(&self, deadline: Instant) -> Result<bool> {
        loop {
            let abstime = realtime_deadline(deadline);
            // SAFETY: `sem` is an open semaphore handle and abstime is valid.
            if unsafe { libc::sem_timedwait(self.sem.as_ptr(), &abstime) } == 0 {
                return Ok(true);
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) => continue,
                Some(libc::ETIMEDOUT) if Instant::now() < deadline => continue,
                Some(libc::ETIMEDOUT) => return Ok(false),
                _ => return Err(SyncError::Io(err)),
            }
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn acquire_until(&self, deadline: Instant) -> Result<bool> {
        poll_until(deadline, || self.try_acquire())
    }

    /// Return one permit.
    pub fn release(&self) -> Result<()> {
        // SAFETY: `sem` is an open semaphore handle.
        if unsafe { libc::sem_post(self.sem.as_ptr()) } != 0 {
            return Err(SyncError::Io(io::Error::last_os_error()));
        }
        trace!(name = %self.name, "released permit");
        Ok(())
    }

    /// Return `n` permits.
    pub fn release_n(&self, n: u32) -> Result<()> {
        for _ in 0..n {
            self.release()?;
        }
        Ok(())
    }

    /// Current permit count. Only a snapshot under contention.
    #[cfg(target_os = "linux")]
    pub fn value(&self) -> Result<u32> {
        let mut value: libc::c_int = 0;
        // SAFETY: `sem` is an open semaphore handle and `value` is writable.
        if unsafe { libc::sem_getvalue(self.sem.as_ptr(), &mut value) } != 0 {
            return Err(SyncError::Io(io::Error::last_os_error()));
        }
        Ok(value.max(0) as u32)
    }

    /// Current permit count. Not available on this platform.
    #[cfg(not(target_os = "linux"))]
    pub fn value(&self) -> Result<u32> {
        Err(SyncError::Io(io::Error::new(
            io::ErrorKind::Unsupported,
            "sem_getvalue is not supported on this platform",
        )))
    }

    /// Remove `name` from the namespace. Open handles keep working; removing
    /// a missing name succeeds.
    pub fn remove(name: &str) -> Result<()> {
        let c_name = CString::new(os_name(Namespace::Semaphore, name)?)
            .map_err(|err| SyncError::Io(io::Error::other(err)))?;
        // SAFETY: `c_name` is NUL-terminated.
        if unsafe { libc::sem_unlink(c_name.as_ptr()) } == 0 {
            debug!(name, "removed named semaphore");
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ENOENT) {
            return Ok(());
        }
        Err(SyncError::Create {
            name: name.to_string(),
            source: err,
        })
    }
}

impl Drop for NamedSemaphore {
    fn drop(&mut self) {
        // SAFETY: `sem` came from sem_open and is closed only here.
        unsafe { libc::sem_close(self.sem.as_ptr()) };
    }
}

impl std::fmt::Debug for NamedSemaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamedSemaphore")
            .field("name", &self.name)
            .finish()
    }
}
