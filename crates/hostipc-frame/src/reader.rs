use std::io::{ErrorKind, Read};
use std::iter::FusedIterator;

use bytes::BytesMut;
use tracing::trace;

use crate::codec::{decode_message, FrameConfig, Message};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete messages from any `Read` stream.
///
/// Handles partial reads internally; callers always get complete messages.
/// Used as an [`Iterator`], it yields messages until the stream reaches
/// end-of-stream on a message boundary, and stops for good after the end or
/// the first error.
pub struct MessageReader<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
    finished: bool,
}

impl<T: Read> MessageReader<T> {
    /// Create a new message reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new message reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
            finished: false,
        }
    }

    /// Read the next complete message (blocking).
    ///
    /// Returns `Ok(None)` when the stream ends cleanly between messages and
    /// `Err(FrameError::Truncated)` when it ends inside one.
    pub fn read_message(&mut self) -> Result<Option<Message>> {
        loop {
            if let Some(message) = decode_message(&mut self.buf, &self.config)? {
                trace!(tag = message.tag(), "decoded message");
                return Ok(Some(message));
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(FrameError::Truncated {
                    buffered: self.buf.len(),
                });
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    /// Bytes read from the stream but not yet decoded.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    ///
    /// Buffered bytes that were not decoded yet are discarded.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current message reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl<T: Read> Iterator for MessageReader<T> {
    type Item = Result<Message>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.read_message() {
            Ok(Some(message)) => Some(Ok(message)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(err) => {
                self.finished = true;
                Some(Err(err))
            }
        }
    }
}

impl<T: Read> FusedIterator for MessageReader<T> {}
