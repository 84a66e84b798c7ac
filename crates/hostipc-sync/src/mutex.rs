//! Named mutexes shared between processes.
//!
//! A named mutex is a process-shared `pthread_mutex_t` living in a small
//! shared memory segment. The process that creates the segment initialises
//! the mutex before anyone else can attach to it. Handles in one process
//! share a single mapping per name. On Linux the mutex is robust: if its
//! owner dies while holding it, the next locker takes it over and a warning
//! is logged.

use std::cell::UnsafeCell;
use std::collections::HashMap;
use std::io;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

#[cfg(not(target_os = "linux"))]
use crate::clock::poll_until;
#[cfg(target_os = "linux")]
use crate::clock::realtime_deadline;
use crate::error::{Result, SyncError};
use crate::name::{os_name, Namespace};
use crate::shm::{self, OpenMode, Segment};

#[cfg(target_os = "linux")]
extern "C" {
    fn pthread_mutexattr_setrobust(
        attr: *mut libc::pthread_mutexattr_t,
        robustness: libc::c_int,
    ) -> libc::c_int;
    fn pthread_mutex_consistent(mutex: *mut libc::pthread_mutex_t) -> libc::c_int;
    fn pthread_mutex_timedlock(
        mutex: *mut libc::pthread_mutex_t,
        abstime: *const libc::timespec,
    ) -> libc::c_int;
}

#[cfg(target_os = "linux")]
const PTHREAD_MUTEX_ROBUST: libc::c_int = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
enum MutexKind {
    Plain = 1,
    Timed = 2,
}

impl MutexKind {
    fn describe(raw: u32) -> &'static str {
        match raw {
            1 => Self::Plain.name(),
            2 => Self::Timed.name(),
            _ => "unknown object",
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Plain => "named mutex",
            Self::Timed => "timed named mutex",
        }
    }
}

#[repr(C)]
struct MutexRegion {
    kind: AtomicU32,
    mutex: UnsafeCell<libc::pthread_mutex_t>,
}

/// Mappings of the named mutexes this process has open, by OS name.
fn open_segments() -> MutexGuard<'static, HashMap<String, Weak<Segment>>> {
    static SEGMENTS: OnceLock<Mutex<HashMap<String, Weak<Segment>>>> = OnceLock::new();
    SEGMENTS
        .get_or_init(Mutex::default)
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

/// Initialise a fresh region. Runs before any other handle can attach.
fn initialize(base: NonNull<u8>, kind: MutexKind) -> Result<()> {
    // SAFETY: the segment was sized for a MutexRegion and mmap returns
    // page-aligned memory.
    let region = unsafe { &*base.as_ptr().cast::<MutexRegion>() };

    // SAFETY: attr is initialised by pthread_mutexattr_init before use and
    // destroyed once the mutex is initialised.
    unsafe {
        let mut attr: libc::pthread_mutexattr_t = std::mem::zeroed();
        let mut eno = libc::pthread_mutexattr_init(&mut attr);
        if eno != 0 {
            return Err(SyncError::Io(io::Error::from_raw_os_error(eno)));
        }
        eno = libc::pthread_mutexattr_setpshared(&mut attr, libc::PTHREAD_PROCESS_SHARED);
        #[cfg(target_os = "linux")]
        if eno == 0 {
            eno = pthread_mutexattr_setrobust(&mut attr, PTHREAD_MUTEX_ROBUST);
        }
        if eno == 0 {
            eno = libc::pthread_mutex_init(region.mutex.get(), &attr);
        }
        libc::pthread_mutexattr_destroy(&mut attr);
        if eno != 0 {
            return Err(SyncError::Io(io::Error::from_raw_os_error(eno)));
        }
    }

    region.kind.store(kind as u32, Ordering::Relaxed);
    Ok(())
}

/// Shared state behind both named mutex flavours.
struct RawMutex {
    segment: Arc<Segment>,
    name: String,
}

impl RawMutex {
    fn open(name: &str, kind: MutexKind) -> Result<Self> {
        let os_name = os_name(Namespace::Mutex, name)?;

        let mut segments = open_segments();
        segments.retain(|_, segment| segment.strong_count() > 0);
        let segment = match segments.get(&os_name).and_then(Weak::upgrade) {
            Some(segment) => segment,
            None => {
                let segment = Arc::new(Segment::acquire(
                    name,
                    os_name.clone(),
                    std::mem::size_of::<MutexRegion>(),
                    OpenMode::CreateOrAttach,
                    |base| initialize(base, kind),
                )?);
                segments.insert(os_name, Arc::downgrade(&segment));
                segment
            }
        };
        drop(segments);

        let raw = Self {
            segment,
            name: name.to_string(),
        };
        let found = raw.region().kind.load(Ordering::Acquire);
        if found != kind as u32 {
            return Err(SyncError::KindMismatch {
                name: raw.name,
                expected: kind.name(),
                found: MutexKind::describe(found),
            });
        }
        debug!(name, kind = kind.name(), "opened named mutex");
        Ok(raw)
    }

    fn region(&self) -> &MutexRegion {
        // SAFETY: the segment was sized for a MutexRegion, mmap returns
        // page-aligned memory, the creator initialised it before publishing
        // the segment, and the mapping lives as long as `self`.
        unsafe { &*self.segment.as_ptr().cast::<MutexRegion>() }
    }

    fn mtx(&self) -> *mut libc::pthread_mutex_t {
        self.region().mutex.get()
    }

    /// Map a pthread return code; `Ok(false)` means busy or timed out.
    fn acquired(&self, eno: libc::c_int) -> Result<bool> {
        match eno {
            0 => Ok(true),
            libc::EBUSY | libc::ETIMEDOUT => Ok(false),
            #[cfg(target_os = "linux")]
            libc::EOWNERDEAD => {
                // SAFETY: EOWNERDEAD means this thread now holds the mutex.
                let eno = unsafe { pthread_mutex_consistent(self.mtx()) };
                if eno != 0 {
                    return Err(SyncError::Io(io::Error::from_raw_os_error(eno)));
                }
                warn!(name = %self.name, "recovered named mutex abandoned by its owner");
                Ok(true)
            }
            _ => Err(SyncError::Io(io::Error::from_raw_os_error(eno))),
        }
    }

    fn lock(&self) -> Result<()> {
        loop {
            // SAFETY: mtx points at an initialised process-shared mutex.
            let eno = unsafe { libc::pthread_mutex_lock(self.mtx()) };
            if self.acquired(eno)? {
                return Ok(());
            }
        }
    }

    fn try_lock(&self) -> Result<bool> {
        // SAFETY: mtx points at an initialised process-shared mutex.
        let eno = unsafe { libc::pthread_mutex_trylock(self.mtx()) };
        self.acquired(eno)
    }

    #[cfg(target_os = "linux")]
    fn lock_until(&self, deadline: Instant) -> Result<bool> {
        loop {
            let abstime = realtime_deadline(deadline);
            // SAFETY: mtx points at an initialised process-shared mutex and
            // abstime is a valid timespec.
            let eno = unsafe { pthread_mutex_timedlock(self.mtx(), &abstime) };
            if self.acquired(eno)? {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn lock_until(&self, deadline: Instant) -> Result<bool> {
        poll_until(deadline, || self.try_lock())
    }

    fn unlock(&self) -> Result<()> {
        // SAFETY: mtx points at an initialised process-shared mutex.
        let eno = unsafe { libc::pthread_mutex_unlock(self.mtx()) };
        if eno != 0 {
            return Err(SyncError::Io(io::Error::from_raw_os_error(eno)));
        }
        Ok(())
    }
}

/// Proof that the current thread holds a named mutex.
///
/// Dropping the guard unlocks the mutex. It cannot be sent to another
/// thread: pthread mutexes must be unlocked by the thread that locked them.
#[must_use = "the named mutex is unlocked as soon as the guard is dropped"]
pub struct NamedMutexGuard<'a> {
    raw: &'a RawMutex,
    locked: bool,
    _not_send: PhantomData<*const ()>,
}

impl<'a> NamedMutexGuard<'a> {
    fn new(raw: &'a RawMutex) -> Self {
        Self {
            raw,
            locked: true,
            _not_send: PhantomData,
        }
    }

    /// Unlock now and report failures instead of logging them.
    pub fn unlock(mut self) -> Result<()> {
        self.locked = false;
        self.raw.unlock()
    }

    pub fn name(&self) -> &str {
        &self.raw.name
    }
}

impl Drop for NamedMutexGuard<'_> {
    fn drop(&mut self) {
        if self.locked {
            if let Err(err) = self.raw.unlock() {
                warn!(name = %self.raw.name, %err, "failed to unlock named mutex");
            }
        }
    }
}

impl std::fmt::Debug for NamedMutexGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamedMutexGuard")
            .field("name", &self.raw.name)
            .finish()
    }
}

/// Mutual exclusion across processes, identified by name.
///
/// Every process that opens the same name shares one lock. The lock is not
/// recursive: locking it twice from one thread deadlocks.
pub struct NamedMutex {
    raw: RawMutex,
}

impl NamedMutex {
    /// Create the mutex `name` unlocked, or attach to it if it exists.
    ///
    /// If a creator died before it finished initialising the mutex, the
    /// name stays unusable: `open` fails with a `TimedOut` [`SyncError::Create`]
    /// after about a second until [`NamedMutex::remove`] clears it.
    pub fn open(name: &str) -> Result<Self> {
        Ok(Self {
            raw: RawMutex::open(name, MutexKind::Plain)?,
        })
    }

    /// Block until the mutex is held by this thread.
    pub fn lock(&self) -> Result<NamedMutexGuard<'_>> {
        self.raw.lock()?;
        Ok(NamedMutexGuard::new(&self.raw))
    }

    /// Lock only if the mutex is free right now.
    pub fn try_lock(&self) -> Result<Option<NamedMutexGuard<'_>>> {
        Ok(self
            .raw
            .try_lock()?
            .then(|| NamedMutexGuard::new(&self.raw)))
    }

    pub fn name(&self) -> &str {
        &self.raw.name
    }

    /// Remove `name` from the namespace. Open handles keep working.
    pub fn remove(name: &str) -> Result<()> {
        remove(name)
    }
}

/// A [`NamedMutex`] that also supports bounded waits.
pub struct TimedNamedMutex {
    raw: RawMutex,
}

impl TimedNamedMutex {
    /// Create the mutex `name` unlocked, or attach to it if it exists.
    pub fn open(name: &str) -> Result<Self> {
        Ok(Self {
            raw: RawMutex::open(name, MutexKind::Timed)?,
        })
    }

    pub fn lock(&self) -> Result<NamedMutexGuard<'_>> {
        self.raw.lock()?;
        Ok(NamedMutexGuard::new(&self.raw))
    }

    pub fn try_lock(&self) -> Result<Option<NamedMutexGuard<'_>>> {
        Ok(self
            .raw
            .try_lock()?
            .then(|| NamedMutexGuard::new(&self.raw)))
    }

    /// Wait at most `timeout` for the mutex.
    ///
    /// Fails with [`SyncError::Timeout`] no earlier than `timeout` after the
    /// call if the mutex stayed held.
    pub fn try_lock_for(&self, timeout: Duration) -> Result<NamedMutexGuard<'_>> {
        let deadline = Instant::now() + timeout;
        if self.raw.lock_until(deadline)? {
            Ok(NamedMutexGuard::new(&self.raw))
        } else {
            Err(SyncError::Timeout(timeout))
        }
    }

    /// Wait until `deadline` for the mutex.
    pub fn try_lock_until(&self, deadline: Instant) -> Result<NamedMutexGuard<'_>> {
        let start = Instant::now();
        if self.raw.lock_until(deadline)? {
            Ok(NamedMutexGuard::new(&self.raw))
        } else {
            Err(SyncError::Timeout(start.elapsed()))
        }
    }

    pub fn name(&self) -> &str {
        &self.raw.name
    }

    /// Remove `name` from the namespace. Open handles keep working.
    pub fn remove(name: &str) -> Result<()> {
        remove(name)
    }
}

fn remove(name: &str) -> Result<()> {
    let os_name = os_name(Namespace::Mutex, name)?;
    open_segments().remove(&os_name);
    shm::unlink(&os_name).map_err(|source| SyncError::Create {
        name: name.to_string(),
        source,
    })
}

macro_rules! impl_debug {
    ($ty:ident) => {
        impl std::fmt::Debug for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_struct(stringify!($ty))
                    .field("name", &self.raw.name)
                    .finish()
            }
        }
    };
}

impl_debug!(NamedMutex);
impl_debug!(TimedNamedMutex);
