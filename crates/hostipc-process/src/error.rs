use std::path::PathBuf;

use crate::state::ExitState;

/// Errors that can occur while managing a child process.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// The OS could not start the program.
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: PathBuf,
        source: std::io::Error,
    },

    /// Waiting for the child failed.
    #[error("failed to wait for pid {pid}: {source}")]
    Wait { pid: u32, source: std::io::Error },

    /// Signalling the child failed.
    #[error("failed to signal pid {pid}: {source}")]
    Kill { pid: u32, source: std::io::Error },

    /// The child finished, but not with exit code 0.
    #[error("{program} {state}")]
    UnexpectedExit { program: PathBuf, state: ExitState },

    /// Stdout was not captured at spawn time, or was already taken.
    #[error("stdout is not captured")]
    NotCaptured,

    /// Reading captured stdout failed.
    #[error("failed to read child stdout: {0}")]
    Stdout(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ProcessError>;
