use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{FromRawFd, OwnedFd};
use std::path::Path;

use tracing::debug;

use crate::error::{PipeError, Result};
use crate::fifo::FifoNode;

/// Read end of a pipe. Implements [`Read`].
///
/// `read` blocks until at least one byte is available or the write end has
/// been closed. Once the peer is gone and the buffered bytes are drained,
/// reads return `Ok(0)`; so does reading from an endpoint closed locally.
pub struct PipeReader {
    file: Option<File>,
    fifo: Option<FifoNode>,
}

/// Write end of a pipe. Implements [`Write`].
///
/// `write` may block while the OS pipe buffer is full. Writing after
/// [`PipeWriter::close`] fails with [`PipeError::Closed`] (wrapped in an
/// `io::Error` of kind `NotConnected`); writing after the reader has gone
/// fails with `BrokenPipe`.
pub struct PipeWriter {
    file: Option<File>,
    fifo: Option<FifoNode>,
}

/// Create a connected anonymous pipe.
///
/// Both descriptors are close-on-exec, so children only see them when they
/// are explicitly handed over. Where `pipe2` exists the flag is set
/// atomically; elsewhere a fork on another thread between `pipe` and
/// `fcntl` can still inherit the descriptors.
pub fn anonymous_pipe() -> Result<(PipeReader, PipeWriter)> {
    let fds = create_pipe().map_err(anonymous_create_error)?;

    // SAFETY: the pipe call succeeded, so both descriptors are open and owned
    // solely by this function until they are wrapped.
    let (read_fd, write_fd) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
    #[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
    {
        set_cloexec(&read_fd).map_err(anonymous_create_error)?;
        set_cloexec(&write_fd).map_err(anonymous_create_error)?;
    }

    debug!(read_fd = fds[0], write_fd = fds[1], "created anonymous pipe");

    Ok((PipeReader::from_fd(read_fd), PipeWriter::from_fd(write_fd)))
}

#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
fn create_pipe() -> io::Result<[libc::c_int; 2]> {
    let mut fds = [0 as libc::c_int; 2];
    // SAFETY: `fds` is a writable array of two descriptors as pipe2(2) requires.
    if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(fds)
}

#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
fn create_pipe() -> io::Result<[libc::c_int; 2]> {
    let mut fds = [0 as libc::c_int; 2];
    // SAFETY: `fds` is a writable array of two descriptors as pipe(2) requires.
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(fds)
}

fn anonymous_create_error(source: io::Error) -> PipeError {
    PipeError::Create {
        name: "<anonymous>".to_string(),
        source,
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
fn set_cloexec(fd: &OwnedFd) -> io::Result<()> {
    use std::os::fd::AsRawFd;

    let raw = fd.as_raw_fd();
    // SAFETY: `raw` stays open for the duration of both calls because `fd`
    // is borrowed.
    let flags = unsafe { libc::fcntl(raw, libc::F_GETFD) };
    if flags == -1 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: as above.
    let rc = unsafe { libc::fcntl(raw, libc::F_SETFD, flags | libc::FD_CLOEXEC) };
    if rc == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

impl PipeReader {
    /// Wrap an already-open read descriptor.
    pub fn from_fd(fd: OwnedFd) -> Self {
        Self {
            file: Some(File::from(fd)),
            fifo: None,
        }
    }

    pub(crate) fn from_fifo(file: File, fifo: FifoNode) -> Self {
        Self {
            file: Some(file),
            fifo: Some(fifo),
        }
    }

    /// Close the read end. Idempotent.
    ///
    /// A writer still attached to the other end will start seeing
    /// `BrokenPipe` on its next write.
    pub fn close(&mut self) {
        if self.file.take().is_some() {
            debug!(name = ?self.name(), "closed pipe read end");
        }
        self.fifo = None;
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.file.is_none()
    }

    /// Filesystem path of the named pipe, `None` for anonymous pipes.
    pub fn name(&self) -> Option<&Path> {
        self.fifo.as_ref().map(FifoNode::path)
    }
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.file {
            Some(file) => file.read(buf),
            None => Ok(0),
        }
    }
}

impl From<std::process::ChildStdout> for PipeReader {
    fn from(stdout: std::process::ChildStdout) -> Self {
        Self::from_fd(OwnedFd::from(stdout))
    }
}

impl std::fmt::Debug for PipeReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeReader")
            .field("name", &self.name())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl PipeWriter {
    /// Wrap an already-open write descriptor.
    pub fn from_fd(fd: OwnedFd) -> Self {
        Self {
            file: Some(File::from(fd)),
            fifo: None,
        }
    }

    pub(crate) fn from_fifo(file: File, fifo: FifoNode) -> Self {
        Self {
            file: Some(file),
            fifo: Some(fifo),
        }
    }

    /// Close the write end. Idempotent.
    ///
    /// The paired reader observes end-of-stream once it has drained the
    /// bytes already written.
    pub fn close(&mut self) {
        if self.file.take().is_some() {
            debug!(name = ?self.name(), "closed pipe write end");
        }
        self.fifo = None;
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.file.is_none()
    }

    /// Filesystem path of the named pipe, `None` for anonymous pipes.
    pub fn name(&self) -> Option<&Path> {
        self.fifo.as_ref().map(FifoNode::path)
    }

    /// Write all of `bytes`, blocking as needed.
    pub fn send(&mut self, bytes: &[u8]) -> Result<()> {
        match &mut self.file {
            Some(file) => file.write_all(bytes).map_err(PipeError::Io),
            None => Err(PipeError::Closed),
        }
    }
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.file {
            Some(file) => file.write(buf),
            None => Err(PipeError::closed_io()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.file {
            Some(file) => file.flush(),
            None => Err(PipeError::closed_io()),
        }
    }
}

impl std::fmt::Debug for PipeWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeWriter")
            .field("name", &self.name())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::io::{ErrorKind, Read, Write};
    use std::os::fd::AsRawFd;

    use super::*;

    #[test]
    fn anonymous_pipe_delivers_bytes_in_order() {
        let (mut reader, mut writer) = anonymous_pipe().unwrap();

        writer.write_all(b"first ").unwrap();
        writer.write_all(b"second ").unwrap();
        writer.write_all(b"third").unwrap();
        writer.close();

        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"first second third");
    }

    #[test]
    fn read_after_eof_returns_zero() {
        let (mut reader, mut writer) = anonymous_pipe().unwrap();
        writer.write_all(b"x").unwrap();
        writer.close();

        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf).unwrap(), 1);
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn dropping_writer_signals_eof() {
        let (mut reader, writer) = anonymous_pipe().unwrap();
        drop(writer);

        let mut buf = [0u8; 4];
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn close_is_idempotent() {
        let (_reader, mut writer) = anonymous_pipe().unwrap();
        writer.close();
        writer.close();
        assert!(writer.is_closed());
    }

    #[test]
    fn write_after_close_fails() {
        let (_reader, mut writer) = anonymous_pipe().unwrap();
        writer.close();

        let err = writer.write(b"late").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotConnected);
        assert!(PipeError::is_closed_io(&err));
        assert!(matches!(writer.send(b"late"), Err(PipeError::Closed)));
    }

    #[test]
    fn write_after_reader_closed_is_broken_pipe() {
        let (mut reader, mut writer) = anonymous_pipe().unwrap();
        reader.close();

        let err = writer.write_all(b"nobody listening").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BrokenPipe);
    }

    #[test]
    fn closed_reader_reads_nothing() {
        let (mut reader, mut writer) = anonymous_pipe().unwrap();
        writer.write_all(b"pending").unwrap();
        reader.close();

        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn descriptors_are_close_on_exec() {
        let (reader, writer) = anonymous_pipe().unwrap();
        for raw in [
            reader.file.as_ref().unwrap().as_raw_fd(),
            writer.file.as_ref().unwrap().as_raw_fd(),
        ] {
            // SAFETY: the descriptor is kept open by the endpoints above.
            let flags = unsafe { libc::fcntl(raw, libc::F_GETFD) };
            assert!(flags & libc::FD_CLOEXEC != 0);
        }
    }

    #[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
    #[test]
    fn eof_is_not_delayed_by_concurrent_spawns() {
        use std::process::{Command, Stdio};
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;
        use std::time::{Duration, Instant};

        let stop = Arc::new(AtomicBool::new(false));
        let spawner = {
            let stop = stop.clone();
            std::thread::spawn(move || {
                let mut children = Vec::new();
                while !stop.load(Ordering::Relaxed) {
                    let child = Command::new("sleep")
                        .arg("1")
                        .stdin(Stdio::null())
                        .stdout(Stdio::null())
                        .spawn()
                        .unwrap();
                    children.push(child);
                    children.retain_mut(|c| c.try_wait().unwrap().is_none());
                }
                for mut child in children {
                    let _ = child.kill();
                    let _ = child.wait();
                }
            })
        };

        let mut slow = 0;
        for _ in 0..1000 {
            let (mut reader, writer) = anonymous_pipe().unwrap();
            drop(writer);
            let start = Instant::now();
            let mut buf = [0u8; 1];
            assert_eq!(reader.read(&mut buf).unwrap(), 0);
            if start.elapsed() > Duration::from_millis(300) {
                slow += 1;
            }
        }
        stop.store(true, Ordering::Relaxed);
        spawner.join().unwrap();

        assert_eq!(slow, 0, "a spawned child inherited a pipe write end");
    }

    #[test]
    fn concurrent_reader_and_writer_threads() {
        let (mut reader, mut writer) = anonymous_pipe().unwrap();

        let reader_thread = std::thread::spawn(move || {
            let mut out = Vec::new();
            reader.read_to_end(&mut out).unwrap();
            out
        });

        // Larger than a typical pipe buffer, so the writer blocks at least once.
        let mut expected = Vec::new();
        for i in 0..20_000u32 {
            let chunk = i.to_le_bytes();
            writer.write_all(&chunk).unwrap();
            expected.extend_from_slice(&chunk);
        }
        writer.close();

        assert_eq!(reader_thread.join().unwrap(), expected);
    }

    #[test]
    fn anonymous_endpoints_have_no_name() {
        let (reader, writer) = anonymous_pipe().unwrap();
        assert!(reader.name().is_none());
        assert!(writer.name().is_none());
    }
}
