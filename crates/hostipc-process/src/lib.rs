//! Spawning and supervising child processes.
//!
//! [`ProcessHandle`] owns one child: its pid, an optional pipe carrying the
//! child's stdout, and its exit state. `join` and `kill` take `&self`, so a
//! handle shared between threads can be killed from one while another waits
//! for it.

pub mod error;
pub mod options;
pub mod state;

#[cfg(unix)]
pub mod handle;

pub use error::{ProcessError, Result};
pub use options::SpawnOptions;
pub use state::ExitState;

#[cfg(unix)]
pub use handle::{current_process_id, current_working_dir, ProcessHandle};
