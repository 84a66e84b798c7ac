//! Named shared memory.

use std::ffi::CString;
use std::fs::File;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::clock::adaptive_yield;
use crate::error::{Result, SyncError};
use crate::name::{os_name, Namespace};

const SHM_MODE: libc::mode_t = 0o600;
const ATTACH_WAIT: Duration = Duration::from_secs(1);

/// How [`SharedMemory`] treats an existing or missing segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Fail if the name is already taken.
    Create,
    /// Fail if the name does not exist yet.
    Attach,
    /// Create the segment unless it exists, attach otherwise.
    CreateOrAttach,
}

/// Segment length including the trailing attach count.
pub(crate) fn mapped_len(user_len: usize) -> usize {
    let align = std::mem::align_of::<AtomicU32>();
    user_len.div_ceil(align) * align + std::mem::size_of::<AtomicU32>()
}

/// A live `mmap` of a shm object, unmapped on drop.
struct Mapping {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: the mapping is process-wide; all access to it goes through raw
// pointers or atomics.
unsafe impl Send for Mapping {}
unsafe impl Sync for Mapping {}

impl Mapping {
    fn new(file: &File, len: usize) -> io::Result<Self> {
        // SAFETY: `file` is an open shm object at least `len` bytes long.
        let mem = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };
        if mem == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        let ptr = NonNull::new(mem.cast::<u8>())
            .ok_or_else(|| io::Error::other("mmap returned null"))?;
        Ok(Self { ptr, len })
    }

    /// The attach count stored in the last four bytes.
    fn attach_count(&self) -> &AtomicU32 {
        let offset = self.len - std::mem::size_of::<AtomicU32>();
        // SAFETY: `offset` is aligned for AtomicU32 and inside the mapping,
        // which stays valid for the lifetime of `self`.
        unsafe { &*self.ptr.as_ptr().add(offset).cast::<AtomicU32>() }
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        // SAFETY: ptr and len come from a successful mmap and are unmapped
        // only here.
        unsafe { libc::munmap(self.ptr.as_ptr().cast(), self.len) };
    }
}

/// A mapped POSIX shared memory object.
///
/// The last `AtomicU32` of the mapping counts live handles across all
/// processes. The creator publishes a count of one only after initialising
/// the segment, and attachers join only while the count is non-zero. Once
/// the count drops to zero nobody can join again, so the handle that
/// dropped it can unlink the name without splitting it between two
/// segments.
pub(crate) struct Segment {
    map: Mapping,
    user_len: usize,
    os_name: String,
    created: bool,
}

enum Opened {
    Created(File),
    Existing(File),
    /// Unlinked between our two `shm_open` calls.
    Vanished,
}

impl Segment {
    /// Create or attach to `os_name`.
    ///
    /// `init` runs on the creator's mapping before any other handle can
    /// attach. An attacher that finds a segment still being initialised, or
    /// one whose last handle is being dropped, reopens the name until
    /// `ATTACH_WAIT` expires.
    pub(crate) fn acquire(
        name: &str,
        os_name: String,
        user_len: usize,
        mode: OpenMode,
        init: impl FnOnce(NonNull<u8>) -> Result<()>,
    ) -> Result<Self> {
        let create_err = |source: io::Error| SyncError::Create {
            name: name.to_string(),
            source,
        };
        let c_name = CString::new(os_name.as_str()).map_err(|_| SyncError::InvalidName {
            name: name.to_string(),
            reason: "name contains a NUL byte",
        })?;
        let deadline = Instant::now() + ATTACH_WAIT;
        let mut round = 0u32;

        loop {
            match open_object(&c_name, mode).map_err(create_err)? {
                Opened::Created(file) => {
                    return Self::create(name, os_name, user_len, file, init);
                }
                Opened::Existing(file) => {
                    if let Some(segment) = Self::attach(name, &os_name, user_len, &file)? {
                        return Ok(segment);
                    }
                }
                Opened::Vanished => {}
            }
            if Instant::now() >= deadline {
                return Err(create_err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "segment was never initialised; its creator may have died, remove the name to recover",
                )));
            }
            adaptive_yield(&mut round);
        }
    }

    fn create(
        name: &str,
        os_name: String,
        user_len: usize,
        file: File,
        init: impl FnOnce(NonNull<u8>) -> Result<()>,
    ) -> Result<Self> {
        let mapped = || -> Result<Mapping> {
            file.set_len(mapped_len(user_len) as u64)?;
            let map = Mapping::new(&file, mapped_len(user_len))?;
            init(map.ptr)?;
            Ok(map)
        };
        let map = match mapped() {
            Ok(map) => map,
            Err(err) => {
                let _ = unlink(&os_name);
                return Err(match err {
                    SyncError::Io(source) => SyncError::Create {
                        name: name.to_string(),
                        source,
                    },
                    other => other,
                });
            }
        };
        map.attach_count().store(1, Ordering::Release);

        debug!(name, os_name = %os_name, size = user_len, "created shared memory");
        Ok(Self {
            map,
            user_len,
            os_name,
            created: true,
        })
    }

    /// `Ok(None)` means the segment is not joinable yet (or any more).
    fn attach(name: &str, os_name: &str, user_len: usize, file: &File) -> Result<Option<Self>> {
        if !check_size(file, name, user_len)? {
            return Ok(None);
        }
        let map = Mapping::new(file, mapped_len(user_len)).map_err(|source| SyncError::Create {
            name: name.to_string(),
            source,
        })?;
        let joined = map
            .attach_count()
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n > 0).then(|| n + 1)
            });
        let Ok(previous) = joined else {
            trace!(name, os_name, "segment not joinable, reopening");
            return Ok(None);
        };

        debug!(name, os_name, size = user_len, handles = previous + 1, "attached shared memory");
        Ok(Some(Self {
            map,
            user_len,
            os_name: os_name.to_string(),
            created: false,
        }))
    }

    pub(crate) fn as_ptr(&self) -> *mut u8 {
        self.map.ptr.as_ptr()
    }

    pub(crate) fn user_len(&self) -> usize {
        self.user_len
    }

    pub(crate) fn created(&self) -> bool {
        self.created
    }

    pub(crate) fn handles(&self) -> u32 {
        self.map.attach_count().load(Ordering::Acquire)
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        let previous = self.map.attach_count().fetch_sub(1, Ordering::AcqRel);
        if previous == 1 {
            match unlink(&self.os_name) {
                Ok(()) => debug!(os_name = %self.os_name, "removed shared memory"),
                Err(err) => debug!(os_name = %self.os_name, %err, "failed to remove shared memory"),
            }
        } else {
            trace!(os_name = %self.os_name, handles = previous - 1, "unmapped shared memory");
        }
    }
}

fn open_object(c_name: &CString, mode: OpenMode) -> io::Result<Opened> {
    let exclusive = libc::O_RDWR | libc::O_CREAT | libc::O_EXCL;
    match mode {
        OpenMode::Create => shm_open(c_name, exclusive).map(Opened::Created),
        OpenMode::Attach => shm_open(c_name, libc::O_RDWR).map(Opened::Existing),
        OpenMode::CreateOrAttach => match shm_open(c_name, exclusive) {
            Ok(file) => Ok(Opened::Created(file)),
            Err(err) if err.raw_os_error() == Some(libc::EEXIST) => {
                match shm_open(c_name, libc::O_RDWR) {
                    Ok(file) => Ok(Opened::Existing(file)),
                    Err(err) if err.raw_os_error() == Some(libc::ENOENT) => Ok(Opened::Vanished),
                    Err(err) => Err(err),
                }
            }
            Err(err) => Err(err),
        },
    }
}

pub(crate) fn shm_open(c_name: &CString, oflag: libc::c_int) -> io::Result<File> {
    // SAFETY: `c_name` is NUL-terminated and outlives the call.
    let fd = unsafe { libc::shm_open(c_name.as_ptr(), oflag, SHM_MODE as libc::c_uint) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: `fd` was just returned by shm_open and is owned by nobody else.
    Ok(unsafe { File::from_raw_fd(fd) })
}

/// Check the size of an existing segment.
///
/// `Ok(false)` means the creator has not sized it yet.
fn check_size(file: &File, name: &str, user_len: usize) -> Result<bool> {
    let expected = mapped_len(user_len);
    let actual = file.metadata()?.len() as usize;
    if actual == 0 {
        return Ok(false);
    }
    if !size_matches(actual, expected) {
        return Err(SyncError::SizeMismatch {
            name: name.to_string(),
            expected: user_len,
            actual: actual.saturating_sub(std::mem::size_of::<AtomicU32>()),
        });
    }
    Ok(true)
}

#[cfg(not(target_os = "macos"))]
fn size_matches(actual: usize, expected: usize) -> bool {
    actual == expected
}

// macOS reports shm sizes rounded up to whole pages.
#[cfg(target_os = "macos")]
fn size_matches(actual: usize, expected: usize) -> bool {
    const MAX_PAGE: usize = 16 * 1024;
    actual >= expected && actual - expected < MAX_PAGE
}

pub(crate) fn unlink(os_name: &str) -> io::Result<()> {
    let c_name = CString::new(os_name).map_err(io::Error::other)?;
    // SAFETY: `c_name` is NUL-terminated.
    if unsafe { libc::shm_unlink(c_name.as_ptr()) } == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ENOENT) {
        Ok(())
    } else {
        Err(err)
    }
}

/// A named region of memory shared between processes.
///
/// The region is zero-filled when first created. It has no built-in
/// synchronization: pair it with a [`NamedMutex`](crate::NamedMutex) or use
/// atomics through [`SharedMemory::map`].
pub struct SharedMemory {
    segment: Segment,
    name: String,
}

impl SharedMemory {
    /// Create `name` with `size` bytes, or attach to it if it exists.
    pub fn open(name: &str, size: usize) -> Result<Self> {
        Self::open_with(name, size, OpenMode::CreateOrAttach)
    }

    /// Create `name`, failing if it already exists.
    pub fn create(name: &str, size: usize) -> Result<Self> {
        Self::open_with(name, size, OpenMode::Create)
    }

    /// Attach to an existing `name` of exactly `size` bytes.
    pub fn attach(name: &str, size: usize) -> Result<Self> {
        Self::open_with(name, size, OpenMode::Attach)
    }

    pub fn open_with(name: &str, size: usize, mode: OpenMode) -> Result<Self> {
        if size == 0 {
            return Err(SyncError::ZeroSize);
        }
        let os_name = os_name(Namespace::SharedMemory, name)?;
        let segment = Segment::acquire(name, os_name, size, mode, |_| Ok(()))?;
        Ok(Self {
            segment,
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Usable size in bytes.
    pub fn len(&self) -> usize {
        self.segment.user_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether this handle created the segment.
    pub fn is_creator(&self) -> bool {
        self.segment.created()
    }

    /// Handles currently attached across all processes.
    pub fn handle_count(&self) -> u32 {
        self.segment.handles()
    }

    /// Start of the usable region.
    pub fn as_ptr(&self) -> *mut u8 {
        self.segment.as_ptr()
    }

    /// Copy `buf.len()` bytes starting at `offset` out of the region.
    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        self.check_range(offset, buf.len(), 1)?;
        // SAFETY: range checked above; `buf` cannot overlap the mapping.
        unsafe {
            std::ptr::copy_nonoverlapping(self.as_ptr().add(offset), buf.as_mut_ptr(), buf.len())
        };
        Ok(())
    }

    /// Copy `data` into the region starting at `offset`.
    pub fn write_at(&self, offset: usize, data: &[u8]) -> Result<()> {
        self.check_range(offset, data.len(), 1)?;
        // SAFETY: range checked above; `data` cannot overlap the mapping.
        unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), self.as_ptr().add(offset), data.len()) };
        Ok(())
    }

    /// View the bytes at `offset` as a `T`.
    ///
    /// # Safety
    ///
    /// Every bit pattern must be a valid `T`, and `T` must tolerate being
    /// mutated by other processes while borrowed (atomics, or plain data
    /// guarded by a named mutex).
    pub unsafe fn map<T: Sync>(&self, offset: usize) -> Result<&T> {
        self.check_range(offset, std::mem::size_of::<T>(), std::mem::align_of::<T>())?;
        // SAFETY: bounds and alignment checked; validity is the caller's contract.
        Ok(unsafe { &*self.as_ptr().add(offset).cast::<T>() })
    }

    /// Remove `name` from the namespace without waiting for the last handle.
    ///
    /// Attached handles keep their mapping. Removing a missing name succeeds.
    pub fn remove(name: &str) -> Result<()> {
        let os_name = os_name(Namespace::SharedMemory, name)?;
        unlink(&os_name).map_err(|source| SyncError::Create {
            name: name.to_string(),
            source,
        })
    }

    fn check_range(&self, offset: usize, size: usize, align: usize) -> Result<()> {
        let fits = offset
            .checked_add(size)
            .is_some_and(|end| end <= self.len());
        let aligned = (self.as_ptr() as usize + offset) % align == 0;
        if fits && aligned {
            Ok(())
        } else {
            Err(SyncError::OutOfBounds {
                offset,
                size,
                align,
                len: self.len(),
            })
        }
    }
}

impl std::fmt::Debug for SharedMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedMemory")
            .field("name", &self.name)
            .field("len", &self.len())
            .field("creator", &self.is_creator())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, AtomicUsize};

    use super::*;

    static COUNTER: AtomicUsize = AtomicUsize::new(0);

    fn unique_name(prefix: &str) -> String {
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        format!("{prefix}_{}_{n}", std::process::id())
    }

    #[test]
    fn create_is_zero_filled() {
        let name = unique_name("shm_zero");
        SharedMemory::remove(&name).unwrap();
        let shm = SharedMemory::open(&name, 64).unwrap();

        assert!(shm.is_creator());
        assert_eq!(shm.len(), 64);
        let mut buf = [0xffu8; 64];
        shm.read_at(0, &mut buf).unwrap();
        assert!(buf.iter().all(|b| *b == 0));
    }

    #[test]
    fn second_handle_sees_writes() {
        let name = unique_name("shm_share");
        let a = SharedMemory::open(&name, 32).unwrap();
        let b = SharedMemory::open(&name, 32).unwrap();

        assert!(a.is_creator());
        assert!(!b.is_creator());
        assert_eq!(a.handle_count(), 2);

        a.write_at(4, b"hello").unwrap();
        let mut buf = [0u8; 5];
        b.read_at(4, &mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn zero_size_is_rejected() {
        assert!(matches!(
            SharedMemory::open(&unique_name("shm_empty"), 0),
            Err(SyncError::ZeroSize)
        ));
    }

    #[test]
    fn attach_with_wrong_size_fails() {
        let name = unique_name("shm_size");
        let _owner = SharedMemory::open(&name, 128).unwrap();

        let err = SharedMemory::attach(&name, 64).unwrap_err();
        assert!(matches!(err, SyncError::SizeMismatch { .. }));
    }

    #[test]
    fn attach_missing_fails() {
        let name = unique_name("shm_missing");
        assert!(matches!(
            SharedMemory::attach(&name, 16),
            Err(SyncError::Create { .. })
        ));
    }

    #[test]
    fn exclusive_create_fails_when_taken() {
        let name = unique_name("shm_excl");
        let _owner = SharedMemory::create(&name, 16).unwrap();
        assert!(SharedMemory::create(&name, 16).is_err());
    }

    #[test]
    fn last_handle_removes_name() {
        let name = unique_name("shm_last");
        let a = SharedMemory::open(&name, 16).unwrap();
        a.write_at(0, &[7]).unwrap();
        drop(a);

        let fresh = SharedMemory::open(&name, 16).unwrap();
        assert!(fresh.is_creator());
        let mut buf = [0u8; 1];
        fresh.read_at(0, &mut buf).unwrap();
        assert_eq!(buf[0], 0);
    }

    #[test]
    fn churning_handles_never_split_a_name() {
        let name = unique_name("shm_churn");

        let threads: Vec<_> = (0..4usize)
            .map(|t| {
                let name = name.clone();
                std::thread::spawn(move || {
                    for i in 0..1000u32 {
                        let a = SharedMemory::open(&name, 32).unwrap();
                        let b = SharedMemory::open(&name, 32).unwrap();
                        a.write_at(t * 8, &i.to_le_bytes()).unwrap();
                        let mut seen = [0u8; 4];
                        b.read_at(t * 8, &mut seen).unwrap();
                        assert_eq!(u32::from_le_bytes(seen), i);
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
    }

    #[test]
    fn out_of_range_access_fails() {
        let name = unique_name("shm_range");
        let shm = SharedMemory::open(&name, 16).unwrap();

        assert!(matches!(
            shm.write_at(12, &[0; 8]),
            Err(SyncError::OutOfBounds { .. })
        ));
        assert!(matches!(
            shm.read_at(usize::MAX, &mut [0; 2]),
            Err(SyncError::OutOfBounds { .. })
        ));
        // SAFETY: AtomicU64 accepts every bit pattern.
        assert!(unsafe { shm.map::<AtomicU64>(4) }.is_err());
        assert!(unsafe { shm.map::<AtomicU64>(16) }.is_err());
    }

    #[test]
    fn atomic_counter_across_handles() {
        let name = unique_name("shm_atomic");
        let shm = SharedMemory::open(&name, 8).unwrap();

        let threads: Vec<_> = (0..4)
            .map(|_| {
                let name = name.clone();
                std::thread::spawn(move || {
                    let handle = SharedMemory::open(&name, 8).unwrap();
                    // SAFETY: AtomicU64 accepts every bit pattern.
                    let counter = unsafe { handle.map::<AtomicU64>(0) }.unwrap();
                    for _ in 0..1000 {
                        counter.fetch_add(1, Ordering::Relaxed);
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        // SAFETY: AtomicU64 accepts every bit pattern.
        let counter = unsafe { shm.map::<AtomicU64>(0) }.unwrap();
        assert_eq!(counter.load(Ordering::Relaxed), 4000);
    }
}
