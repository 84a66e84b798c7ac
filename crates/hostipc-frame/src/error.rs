/// Errors that can occur during message encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The tag does not name a known message type.
    #[error("unknown message tag {0}")]
    UnknownTag(u32),

    /// A string length prefix exceeds the configured maximum.
    #[error("string too long ({size} bytes, max {max})")]
    StringTooLong { size: u64, max: usize },

    /// A string payload is not valid UTF-8.
    #[error("string payload is not valid utf-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// The stream ended in the middle of a message.
    #[error("stream ended inside a message ({buffered} bytes buffered)")]
    Truncated { buffered: usize },

    /// The stream accepted zero bytes while a message was being written.
    #[error("stream closed while writing a message")]
    Closed,

    /// An I/O error occurred while reading or writing messages.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error parsing the `kind:value` text form of a message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseMessageError {
    #[error("expected `u32:<n>`, `f64:<x>` or `str:<text>`, got {0:?}")]
    MissingKind(String),

    #[error("unknown message kind {0:?}")]
    UnknownKind(String),

    #[error("invalid {kind} value {value:?}")]
    InvalidValue { kind: &'static str, value: String },
}

pub type Result<T> = std::result::Result<T, FrameError>;
