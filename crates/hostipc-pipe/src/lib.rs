//! Blocking byte-stream pipes for local IPC.
//!
//! Two flavours share the same endpoint types:
//! - anonymous pipes, created as a connected pair and visible only to the
//!   creating process, its threads, and children that inherit them
//! - named pipes (POSIX FIFOs), which unrelated processes open by agreeing on
//!   a name
//!
//! This is the lowest layer of hostipc. The framing protocol and process
//! output capture both build on [`PipeReader`] and [`PipeWriter`].

pub mod error;

#[cfg(unix)]
pub mod fifo;
#[cfg(unix)]
pub mod stream;

pub use error::{PipeError, Result};

#[cfg(unix)]
pub use fifo::{named_pipe_path, FIFO_DIR_ENV};
#[cfg(unix)]
pub use stream::{anonymous_pipe, PipeReader, PipeWriter};
