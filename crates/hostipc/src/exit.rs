use std::fmt;
use std::io;

use hostipc_frame::FrameError;
use hostipc_pipe::PipeError;
use hostipc_process::ProcessError;
use hostipc_sync::SyncError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const HEALTH_CHECK_FAILED: i32 = 30;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::BrokenPipe | io::ErrorKind::NotConnected => TRANSPORT_ERROR,
        io::ErrorKind::NotFound => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn pipe_error(context: &str, err: PipeError) -> CliError {
    match err {
        PipeError::Create { source, .. }
        | PipeError::Open { source, .. }
        | PipeError::Io(source) => io_error(context, source),
        PipeError::InvalidName { .. } => CliError::new(USAGE, format!("{context}: {err}")),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::UnknownTag(_)
        | FrameError::StringTooLong { .. }
        | FrameError::InvalidUtf8(_)
        | FrameError::Truncated { .. } => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        FrameError::Closed => CliError::new(TRANSPORT_ERROR, format!("{context}: {err}")),
    }
}

pub fn sync_error(context: &str, err: SyncError) -> CliError {
    match err {
        SyncError::Create { source, .. } | SyncError::Io(source) => io_error(context, source),
        SyncError::Timeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        SyncError::InvalidName { .. } | SyncError::ZeroSize | SyncError::OutOfBounds { .. } => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        SyncError::KindMismatch { .. } | SyncError::SizeMismatch { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
    }
}

pub fn process_error(context: &str, err: ProcessError) -> CliError {
    match err {
        ProcessError::Spawn { source, .. }
        | ProcessError::Wait { source, .. }
        | ProcessError::Kill { source, .. }
        | ProcessError::Stdout(source) => io_error(context, source),
        ProcessError::UnexpectedExit { .. } => CliError::new(FAILURE, format!("{context}: {err}")),
        ProcessError::NotCaptured => CliError::new(INTERNAL, format!("{context}: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn timeouts_map_to_timeout_code() {
        let err = sync_error("lock failed", SyncError::Timeout(Duration::from_millis(5)));
        assert_eq!(err.code, TIMEOUT);
        assert!(err.message.starts_with("lock failed: "));
    }

    #[test]
    fn corrupt_stream_is_data_invalid() {
        assert_eq!(frame_error("recv", FrameError::UnknownTag(9)).code, DATA_INVALID);
        assert_eq!(
            frame_error("recv", FrameError::Truncated { buffered: 2 }).code,
            DATA_INVALID
        );
    }

    #[test]
    fn permission_denied_is_preserved() {
        let err = pipe_error(
            "open failed",
            PipeError::Io(io::Error::from(io::ErrorKind::PermissionDenied)),
        );
        assert_eq!(err.code, PERMISSION_DENIED);
    }

    #[test]
    fn bad_names_are_usage_errors() {
        let err = pipe_error(
            "send",
            PipeError::InvalidName {
                name: "a/b".to_string(),
                reason: "relative names must not contain '/'",
            },
        );
        assert_eq!(err.code, USAGE);
    }
}
