use std::ffi::OsStr;
use std::io::{self, Read};
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use hostipc_pipe::PipeReader;
use tracing::{debug, trace, warn};

use crate::error::{ProcessError, Result};
use crate::options::SpawnOptions;
use crate::state::ExitState;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

struct Supervised {
    child: Child,
    state: ExitState,
}

impl Supervised {
    fn finished(&self) -> Option<ExitState> {
        (!self.state.is_running()).then_some(self.state)
    }

    fn record(&mut self, status: ExitStatus) -> ExitState {
        self.state = match (status.code(), status.signal()) {
            (Some(code), _) => ExitState::Exited(code),
            (None, Some(signal)) => ExitState::Killed(signal),
            (None, None) => ExitState::Exited(-1),
        };
        self.state
    }
}

/// A spawned child process.
///
/// The child is reaped only while the internal state lock is held, so a
/// concurrent [`kill`](Self::kill) can never signal a recycled pid.
pub struct ProcessHandle {
    pid: u32,
    program: PathBuf,
    stdout: Option<PipeReader>,
    inner: Mutex<Supervised>,
}

impl ProcessHandle {
    /// Start `program` with exactly `args` as its argument vector.
    ///
    /// Arguments reach the child unmodified: no shell, no re-quoting.
    pub fn spawn<I, S>(program: impl AsRef<Path>, args: I, options: &SpawnOptions) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let program = program.as_ref().to_path_buf();
        let mut command = Command::new(&program);
        command.args(args);
        command.stdout(if options.capture_stdout {
            Stdio::piped()
        } else {
            Stdio::inherit()
        });
        command.stderr(if options.inherit_stderr {
            Stdio::inherit()
        } else {
            Stdio::null()
        });
        if let Some(dir) = &options.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
            program: program.clone(),
            source,
        })?;
        let pid = child.id();
        let stdout = child.stdout.take().map(PipeReader::from);
        debug!(pid, program = %program.display(), captured = stdout.is_some(), "spawned process");

        Ok(Self {
            pid,
            program,
            stdout,
            inner: Mutex::new(Supervised {
                child,
                state: ExitState::Running,
            }),
        })
    }

    /// OS process id of the child.
    pub fn id(&self) -> u32 {
        self.pid
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// The read end of the child's stdout, if it was captured.
    pub fn stdout_stream(&mut self) -> Option<&mut PipeReader> {
        self.stdout.as_mut()
    }

    /// Take ownership of the captured stdout, so the handle can be shared
    /// while another thread drains the output.
    pub fn take_stdout(&mut self) -> Option<PipeReader> {
        self.stdout.take()
    }

    /// Read captured stdout until the child closes it.
    pub fn read_stdout_to_string(&mut self) -> Result<String> {
        let stdout = self.stdout.as_mut().ok_or(ProcessError::NotCaptured)?;
        let mut out = String::new();
        stdout.read_to_string(&mut out)?;
        Ok(out)
    }

    /// Last observed state, without asking the OS.
    pub fn state(&self) -> ExitState {
        self.lock_inner().state
    }

    /// Whether the child has not been joined yet.
    pub fn joinable(&self) -> bool {
        self.state().is_running()
    }

    /// Exit code once the child has finished; `128 + signal` if it was killed.
    pub fn return_code(&self) -> Option<i32> {
        self.state().code()
    }

    /// Check for termination without blocking.
    pub fn try_join(&self) -> Result<Option<ExitState>> {
        let mut inner = self.lock_inner();
        if let Some(state) = inner.finished() {
            return Ok(Some(state));
        }
        self.reap(&mut inner)
    }

    /// Block until the child finishes and return how it ended.
    ///
    /// Safe to call from several threads, and again after it returned.
    pub fn join(&self) -> Result<ExitState> {
        loop {
            if let Some(state) = self.try_join()? {
                return Ok(state);
            }
            self.wait_exited()?;
        }
    }

    /// Like [`join`](Self::join), giving up after `timeout`.
    pub fn join_timeout(&self, timeout: Duration) -> Result<Option<ExitState>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(state) = self.try_join()? {
                return Ok(Some(state));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            std::thread::sleep(POLL_INTERVAL.min(deadline - now));
        }
    }

    /// Kill the child with `SIGKILL` and wait until it is gone.
    ///
    /// Once this returns the child cannot produce more output, though bytes
    /// it wrote earlier may still be buffered in the stdout pipe. Killing a
    /// child that already finished only returns its state.
    pub fn kill(&self) -> Result<ExitState> {
        {
            let mut inner = self.lock_inner();
            if let Some(state) = inner.finished() {
                return Ok(state);
            }
            if let Some(state) = self.reap(&mut inner)? {
                return Ok(state);
            }
            inner.child.kill().map_err(|source| ProcessError::Kill {
                pid: self.pid,
                source,
            })?;
            debug!(pid = self.pid, "sent SIGKILL");
        }
        self.join()
    }

    /// Ask the child to stop with `SIGTERM`. Does not wait.
    pub fn terminate(&self) -> Result<()> {
        let mut inner = self.lock_inner();
        if inner.finished().is_some() || self.reap(&mut inner)?.is_some() {
            return Ok(());
        }
        // SAFETY: the child has not been reaped, so the pid still names it.
        if unsafe { libc::kill(self.pid as libc::pid_t, libc::SIGTERM) } != 0 {
            return Err(ProcessError::Kill {
                pid: self.pid,
                source: io::Error::last_os_error(),
            });
        }
        debug!(pid = self.pid, "sent SIGTERM");
        Ok(())
    }

    /// Join, and fail unless the child exited with code 0.
    pub fn expect_success(&self) -> Result<()> {
        let state = self.join()?;
        if state.success() {
            Ok(())
        } else {
            Err(ProcessError::UnexpectedExit {
                program: self.program.clone(),
                state,
            })
        }
    }

    fn lock_inner(&self) -> MutexGuard<'_, Supervised> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reap(&self, inner: &mut Supervised) -> Result<Option<ExitState>> {
        let status = inner.child.try_wait().map_err(|source| ProcessError::Wait {
            pid: self.pid,
            source,
        })?;
        Ok(status.map(|status| {
            let state = inner.record(status);
            trace!(pid = self.pid, %state, "reaped process");
            state
        }))
    }

    /// Block until the child is a zombie, leaving it unreaped.
    fn wait_exited(&self) -> Result<()> {
        loop {
            // SAFETY: siginfo_t is plain data; all-zero is a valid value.
            let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
            // SAFETY: `info` is writable; WNOWAIT leaves the child for `reap`.
            let rc = unsafe {
                libc::waitid(
                    libc::P_PID,
                    self.pid as libc::id_t,
                    &mut info,
                    libc::WEXITED | libc::WNOWAIT,
                )
            };
            if rc == 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) => continue,
                // Reaped by another thread in the meantime.
                Some(libc::ECHILD) => return Ok(()),
                _ => {
                    return Err(ProcessError::Wait {
                        pid: self.pid,
                        source: err,
                    })
                }
            }
        }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        if !inner.state.is_running() {
            return;
        }
        match inner.child.try_wait() {
            Ok(Some(status)) => {
                let state = inner.record(status);
                trace!(pid = self.pid, %state, "reaped process on drop");
            }
            _ => warn!(
                pid = self.pid,
                program = %self.program.display(),
                "dropping handle of a running process; it is left running and unreaped"
            ),
        }
    }
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.pid)
            .field("program", &self.program)
            .field("captured", &self.stdout.is_some())
            .field("state", &self.state())
            .finish()
    }
}

/// Process id of the calling process.
pub fn current_process_id() -> u32 {
    std::process::id()
}

/// Working directory of the calling process.
pub fn current_working_dir() -> io::Result<PathBuf> {
    std::env::current_dir()
}
