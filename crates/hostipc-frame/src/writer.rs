use std::io::{ErrorKind, Write};

use bytes::BytesMut;
#[cfg(unix)]
use hostipc_pipe::PipeWriter;
use tracing::trace;

use crate::codec::{encode_message, Message};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Writes complete messages to any `Write` stream.
///
/// One logical writer per stream: interleaving two writers on the same
/// endpoint corrupts the framing.
pub struct MessageWriter<T> {
    inner: T,
    buf: BytesMut,
}

impl<T: Write> MessageWriter<T> {
    /// Create a new message writer.
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
        }
    }

    /// Encode and write a complete message (blocking).
    pub fn send(&mut self, message: &Message) -> Result<()> {
        self.buf.clear();
        encode_message(message, &mut self.buf);

        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(FrameError::Closed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
        trace!(tag = message.tag(), size = offset, "wrote message");

        self.flush()
    }

    /// Send an unsigned 32-bit integer.
    pub fn send_u32(&mut self, value: u32) -> Result<()> {
        self.send(&Message::UInt32(value))
    }

    /// Send a double-precision float.
    pub fn send_f64(&mut self, value: f64) -> Result<()> {
        self.send(&Message::Float64(value))
    }

    /// Send a UTF-8 string.
    pub fn send_str(&mut self, value: &str) -> Result<()> {
        self.send(&Message::String(value.to_string()))
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

#[cfg(unix)]
impl MessageWriter<PipeWriter> {
    /// Flush and close the pipe so the reader sees end-of-stream.
    ///
    /// Closing an already closed pipe is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.inner.is_closed() {
            return Ok(());
        }
        self.flush()?;
        self.inner.close();
        Ok(())
    }
}
