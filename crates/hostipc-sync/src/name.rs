//! Mapping of user-visible names onto the OS namespace.
//!
//! Each kind of named object gets its own prefix, so a mutex and a shared
//! memory region called `jobs` never collide. Names that would exceed the
//! platform limit are shortened to a readable prefix plus an FNV-1a hash.

use crate::error::{Result, SyncError};

/// Longest OS name accepted, including the leading `/`.
#[cfg(target_os = "macos")]
pub const OS_NAME_MAX: usize = 31;

/// Longest OS name accepted, including the leading `/`.
///
/// `sem_open` reserves four bytes of `NAME_MAX` for its `sem.` prefix.
#[cfg(not(target_os = "macos"))]
pub const OS_NAME_MAX: usize = 251;

const PREFIX: &str = "hostipc";

/// Kind of named object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    Mutex,
    Semaphore,
    SharedMemory,
}

impl Namespace {
    fn tag(self) -> &'static str {
        match self {
            Self::Mutex => "mtx",
            Self::Semaphore => "sem",
            Self::SharedMemory => "shm",
        }
    }
}

/// Check that `name` can identify a named object.
pub fn validate(name: &str) -> Result<()> {
    let reason = if name.is_empty() {
        "name is empty"
    } else if name.contains('/') {
        "name contains '/'"
    } else if name.contains('\0') {
        "name contains a NUL byte"
    } else {
        return Ok(());
    };
    Err(SyncError::InvalidName {
        name: name.to_string(),
        reason,
    })
}

/// OS-level name (with leading `/`) for the object `name` in `namespace`.
pub fn os_name(namespace: Namespace, name: &str) -> Result<String> {
    validate(name)?;
    Ok(shorten(format!("/{PREFIX}.{}.{name}", namespace.tag())))
}

/// FNV-1a 64-bit hash.
pub fn fnv1a_64(data: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in data {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

fn shorten(full: String) -> String {
    if full.len() <= OS_NAME_MAX {
        return full;
    }

    // '/' + prefix + '_' + 16 hex digits
    let keep = OS_NAME_MAX - 1 - 1 - 16;
    let body = &full[1..];
    let mut cut = keep.min(body.len());
    while !body.is_char_boundary(cut) {
        cut -= 1;
    }

    format!("/{}_{:016x}", &body[..cut], fnv1a_64(full.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv1a_known_values() {
        assert_eq!(fnv1a_64(b""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(fnv1a_64(b"a"), 0xaf63_dc4c_8601_ec8c);
    }

    #[test]
    fn namespaces_do_not_collide() {
        let mtx = os_name(Namespace::Mutex, "jobs").unwrap();
        let sem = os_name(Namespace::Semaphore, "jobs").unwrap();
        let shm = os_name(Namespace::SharedMemory, "jobs").unwrap();
        assert_eq!(mtx, "/hostipc.mtx.jobs");
        assert_ne!(mtx, sem);
        assert_ne!(sem, shm);
    }

    #[test]
    fn rejects_bad_names() {
        for bad in ["", "a/b", "nul\0"] {
            assert!(matches!(
                os_name(Namespace::Mutex, bad),
                Err(SyncError::InvalidName { .. })
            ));
        }
    }

    #[test]
    fn long_names_are_shortened_deterministically() {
        let long = "x".repeat(400);
        let a = os_name(Namespace::SharedMemory, &long).unwrap();
        let b = os_name(Namespace::SharedMemory, &long).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), OS_NAME_MAX);
        assert!(a.starts_with("/hostipc.shm."));

        let other = os_name(Namespace::SharedMemory, &"y".repeat(400)).unwrap();
        assert_ne!(a, other);
    }

    #[test]
    fn multibyte_names_shorten_on_char_boundary() {
        let long = "é".repeat(300);
        let name = os_name(Namespace::Mutex, &long).unwrap();
        assert!(name.len() <= OS_NAME_MAX);
    }
}
