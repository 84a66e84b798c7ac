use std::path::PathBuf;

/// Errors that can occur in pipe operations.
#[derive(Debug, thiserror::Error)]
pub enum PipeError {
    /// The OS refused to create the pipe or its named node.
    #[error("failed to create pipe {name}: {source}")]
    Create {
        name: String,
        source: std::io::Error,
    },

    /// The named pipe node exists but could not be opened.
    #[error("failed to open pipe {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Something other than a FIFO already occupies the name.
    #[error("existing path is not a fifo: {0}")]
    NotAFifo(PathBuf),

    /// The name cannot be mapped to a pipe path.
    #[error("invalid pipe name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },

    /// An I/O error occurred on an open endpoint.
    #[error("pipe I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The endpoint has already been closed.
    #[error("pipe endpoint is closed")]
    Closed,
}

impl PipeError {
    /// Wrap [`PipeError::Closed`] for `std::io` trait methods.
    pub(crate) fn closed_io() -> std::io::Error {
        std::io::Error::new(std::io::ErrorKind::NotConnected, PipeError::Closed)
    }

    /// Whether an `io::Error` returned by an endpoint means the endpoint was closed.
    pub fn is_closed_io(err: &std::io::Error) -> bool {
        err.get_ref()
            .and_then(|inner| inner.downcast_ref::<PipeError>())
            .is_some_and(|inner| matches!(inner, PipeError::Closed))
    }
}

pub type Result<T> = std::result::Result<T, PipeError>;
