//! Local inter-process communication primitives.
//!
//! hostipc bundles the building blocks cooperating processes on one host use
//! to talk and coordinate: byte pipes, a tagged message protocol on top of
//! them, named locks and semaphores, shared memory, and child process
//! handles with captured output.
//!
//! # Crate Structure
//!
//! - [`pipe`] — Anonymous and named (FIFO) byte pipes
//! - [`frame`] — Tagged `u32` / `f64` / string messages over any byte stream
//! - [`sync`] — Semaphores, named mutexes, named semaphores, shared memory
//!   (behind `sync` feature)
//! - [`process`] — Spawn, capture, join and kill children (behind `process`
//!   feature)

/// Re-export pipe types.
pub mod pipe {
    pub use hostipc_pipe::*;
}

/// Re-export frame types.
pub mod frame {
    pub use hostipc_frame::*;
}

/// Re-export synchronization types (requires `sync` feature).
#[cfg(feature = "sync")]
pub mod sync {
    pub use hostipc_sync::*;
}

/// Re-export process types (requires `process` feature).
#[cfg(feature = "process")]
pub mod process {
    pub use hostipc_process::*;
}
