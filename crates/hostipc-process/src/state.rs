use std::fmt;

/// Lifecycle of a child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitState {
    /// Not yet observed to finish.
    Running,
    /// Returned normally with this exit code.
    Exited(i32),
    /// Terminated by this signal.
    Killed(i32),
}

impl ExitState {
    pub fn is_running(self) -> bool {
        matches!(self, Self::Running)
    }

    /// Exit code in shell convention: `128 + signal` for a killed child.
    pub fn code(self) -> Option<i32> {
        match self {
            Self::Running => None,
            Self::Exited(code) => Some(code),
            Self::Killed(signal) => Some(128 + signal),
        }
    }

    pub fn success(self) -> bool {
        self == Self::Exited(0)
    }
}

impl fmt::Display for ExitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "is still running"),
            Self::Exited(code) => write!(f, "exited with code {code}"),
            Self::Killed(signal) => write!(f, "was killed by signal {signal}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_style_codes() {
        assert_eq!(ExitState::Running.code(), None);
        assert_eq!(ExitState::Exited(3).code(), Some(3));
        assert_eq!(ExitState::Killed(9).code(), Some(137));
    }

    #[test]
    fn only_clean_exit_is_success() {
        assert!(ExitState::Exited(0).success());
        assert!(!ExitState::Exited(1).success());
        assert!(!ExitState::Killed(15).success());
        assert!(!ExitState::Running.success());
    }

    #[test]
    fn display_reads_as_sentence_tail() {
        assert_eq!(ExitState::Killed(9).to_string(), "was killed by signal 9");
        assert_eq!(ExitState::Exited(2).to_string(), "exited with code 2");
    }
}
