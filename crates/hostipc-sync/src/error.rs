use std::time::Duration;

/// Errors that can occur in synchronization primitives.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The named OS object could not be created or opened.
    #[error("failed to create or open {name}: {source}")]
    Create {
        name: String,
        source: std::io::Error,
    },

    /// The name cannot be used for a named object.
    #[error("invalid name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },

    /// The name already holds a different kind of primitive.
    #[error("{name} is a {found}, not a {expected}")]
    KindMismatch {
        name: String,
        expected: &'static str,
        found: &'static str,
    },

    /// An existing shared memory segment has a different size.
    #[error("{name} has {actual} bytes, expected {expected}")]
    SizeMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    /// Shared memory regions must not be empty.
    #[error("shared memory size must be non-zero")]
    ZeroSize,

    /// A typed view or byte range does not fit the region.
    #[error("{size} bytes at offset {offset} (align {align}) do not fit a {len}-byte region")]
    OutOfBounds {
        offset: usize,
        size: usize,
        align: usize,
        len: usize,
    },

    /// A bounded wait expired before the primitive was acquired.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// An OS call on an open primitive failed.
    #[error("synchronization I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SyncError>;
