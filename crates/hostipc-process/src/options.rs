use std::path::{Path, PathBuf};

/// How a child process is started.
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    /// Connect the child's stdout to a pipe readable through the handle.
    pub capture_stdout: bool,
    /// Let the child write to this process's stderr; discard it otherwise.
    pub inherit_stderr: bool,
    /// Directory the child starts in. Defaults to ours.
    pub working_dir: Option<PathBuf>,
}

impl Default for SpawnOptions {
    fn default() -> Self {
        Self {
            capture_stdout: false,
            inherit_stderr: true,
            working_dir: None,
        }
    }
}

impl SpawnOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn capture_stdout(mut self, capture: bool) -> Self {
        self.capture_stdout = capture;
        self
    }

    pub fn inherit_stderr(mut self, inherit: bool) -> Self {
        self.inherit_stderr = inherit;
        self
    }

    pub fn working_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.working_dir = Some(dir.as_ref().to_path_buf());
        self
    }
}
