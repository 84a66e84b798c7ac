//! Synchronization primitives for threads and cooperating local processes.
//!
//! - [`Semaphore`] — process-local counting semaphore
//! - [`NamedMutex`] / [`TimedNamedMutex`] — cross-process locks keyed by name
//! - [`NamedSemaphore`] — cross-process counting semaphore keyed by name
//! - [`SharedMemory`] — named memory region, no built-in synchronization
//!
//! Named objects live in an OS-wide namespace: every process that opens the
//! same name attaches to the same object. Handles release their OS resources
//! on drop; the name itself is removed once the last handle in any process
//! is gone (shared memory and mutexes), or explicitly with `remove`
//! (semaphores).

pub mod error;
pub mod semaphore;

#[cfg(unix)]
mod clock;
#[cfg(unix)]
pub mod mutex;
#[cfg(unix)]
pub mod name;
#[cfg(unix)]
pub mod named_semaphore;
#[cfg(unix)]
pub mod shm;

pub use error::{Result, SyncError};
pub use semaphore::{Semaphore, SemaphorePermit};

#[cfg(unix)]
pub use mutex::{NamedMutex, NamedMutexGuard, TimedNamedMutex};
#[cfg(unix)]
pub use named_semaphore::NamedSemaphore;
#[cfg(unix)]
pub use shm::{OpenMode, SharedMemory};
