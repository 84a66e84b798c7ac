use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{PipeError, Result};
use crate::stream::{PipeReader, PipeWriter};

/// Environment variable overriding the directory that holds named pipes.
pub const FIFO_DIR_ENV: &str = "HOSTIPC_FIFO_DIR";

/// Permission mode for created FIFO nodes.
const FIFO_MODE: u32 = 0o600;

/// Map a pipe name to the filesystem path of its FIFO node.
///
/// Absolute paths are used verbatim. Any other name becomes
/// `<dir>/<name>.fifo`, where `<dir>` is `$HOSTIPC_FIFO_DIR` or the OS
/// temporary directory.
pub fn named_pipe_path(name: &str) -> Result<PathBuf> {
    let invalid = |reason| PipeError::InvalidName {
        name: name.to_string(),
        reason,
    };

    if name.is_empty() {
        return Err(invalid("name is empty"));
    }
    if name.contains('\0') {
        return Err(invalid("name contains a NUL byte"));
    }

    let path = Path::new(name);
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    if name.contains('/') {
        return Err(invalid("relative names must not contain '/'"));
    }

    let dir = std::env::var_os(FIFO_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir);
    Ok(dir.join(format!("{name}.fifo")))
}

/// The FIFO node backing a named pipe endpoint.
///
/// The node is removed on drop only when this endpoint created (or claimed)
/// it and the path still refers to the same inode.
pub(crate) struct FifoNode {
    path: PathBuf,
    created_inode: Option<(u64, u64)>,
}

impl FifoNode {
    /// Make sure a FIFO exists at the path for `name`.
    ///
    /// An existing FIFO is the rendezvous point and is reused. With `claim`
    /// set, a reused node is removed on drop as if this side had created it.
    fn ensure(name: &str, claim: bool) -> Result<Self> {
        let path = named_pipe_path(name)?;
        let c_path =
            CString::new(path.as_os_str().as_bytes()).map_err(|_| PipeError::InvalidName {
                name: name.to_string(),
                reason: "name contains a NUL byte",
            })?;

        // SAFETY: `c_path` is a valid NUL-terminated string for the duration of the call.
        let rc = unsafe { libc::mkfifo(c_path.as_ptr(), FIFO_MODE as libc::mode_t) };
        let created = if rc == 0 {
            true
        } else {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EEXIST) {
                return Err(PipeError::Create {
                    name: name.to_string(),
                    source: err,
                });
            }
            false
        };

        let metadata = std::fs::symlink_metadata(&path).map_err(|e| PipeError::Create {
            name: name.to_string(),
            source: e,
        })?;
        if !metadata.file_type().is_fifo() {
            return Err(PipeError::NotAFifo(path));
        }

        if created {
            // mkfifo honours the umask; pin the mode explicitly.
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(FIFO_MODE)).map_err(
                |e| PipeError::Create {
                    name: name.to_string(),
                    source: e,
                },
            )?;
            info!(?path, "created named pipe");
        } else {
            debug!(?path, "attaching to existing named pipe");
        }

        let created_inode = (created || claim).then(|| (metadata.dev(), metadata.ino()));
        Ok(Self {
            path,
            created_inode,
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self, options: &OpenOptions) -> Result<File> {
        options.open(&self.path).map_err(|e| PipeError::Open {
            path: self.path.clone(),
            source: e,
        })
    }
}

impl Drop for FifoNode {
    fn drop(&mut self) {
        let Some((expected_dev, expected_ino)) = self.created_inode else {
            return;
        };
        match std::fs::symlink_metadata(&self.path) {
            Ok(metadata)
                if metadata.file_type().is_fifo()
                    && metadata.dev() == expected_dev
                    && metadata.ino() == expected_ino =>
            {
                debug!(path = ?self.path, "removing named pipe");
                let _ = std::fs::remove_file(&self.path);
            }
            Ok(_) => {
                debug!(
                    path = ?self.path,
                    "skipping named pipe cleanup because the path was replaced"
                );
            }
            Err(_) => {}
        }
    }
}

impl PipeWriter {
    /// Create the named pipe `name` and open its write end.
    ///
    /// A stale FIFO left at the same path is reused and claimed, so it is
    /// removed when this endpoint goes away. Blocks until a reader opens the
    /// other end.
    pub fn create_named(name: &str) -> Result<Self> {
        Self::open_fifo(name, true)
    }

    /// Attach to the named pipe `name` as the writer.
    ///
    /// Creates the FIFO if the creator has not done so yet. Blocks until a
    /// reader opens the other end.
    pub fn open_named(name: &str) -> Result<Self> {
        Self::open_fifo(name, false)
    }

    fn open_fifo(name: &str, claim: bool) -> Result<Self> {
        let node = FifoNode::ensure(name, claim)?;
        let file = node.open(OpenOptions::new().write(true))?;
        debug!(path = ?node.path(), "opened named pipe for writing");
        Ok(Self::from_fifo(file, node))
    }
}

impl PipeReader {
    /// Create the named pipe `name` and open its read end.
    ///
    /// Blocks until a writer opens the other end.
    pub fn create_named(name: &str) -> Result<Self> {
        Self::open_fifo(name, true)
    }

    /// Attach to the named pipe `name` as the reader.
    ///
    /// Creates the FIFO if the creator has not done so yet. Blocks until a
    /// writer opens the other end.
    pub fn open_named(name: &str) -> Result<Self> {
        Self::open_fifo(name, false)
    }

    fn open_fifo(name: &str, claim: bool) -> Result<Self> {
        let node = FifoNode::ensure(name, claim)?;
        let file = node.open(OpenOptions::new().read(true))?;
        debug!(path = ?node.path(), "opened named pipe for reading");
        Ok(Self::from_fifo(file, node))
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    static COUNTER: AtomicUsize = AtomicUsize::new(0);

    fn unique_path(tag: &str) -> PathBuf {
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!(
            "hostipc-pipe-{tag}-{}-{n}.fifo",
            std::process::id()
        ))
    }

    fn as_name(path: &Path) -> &str {
        path.to_str().unwrap()
    }

    #[test]
    fn relative_names_land_in_fifo_dir() {
        let path = named_pipe_path("demo_pipe").unwrap();
        assert!(path.ends_with("demo_pipe.fifo"));
    }

    #[test]
    fn absolute_names_are_used_verbatim() {
        let path = named_pipe_path("/tmp/some.fifo").unwrap();
        assert_eq!(path, PathBuf::from("/tmp/some.fifo"));
    }

    #[test]
    fn rejects_invalid_names() {
        assert!(matches!(
            named_pipe_path(""),
            Err(PipeError::InvalidName { .. })
        ));
        assert!(matches!(
            named_pipe_path("a/b"),
            Err(PipeError::InvalidName { .. })
        ));
        assert!(matches!(
            named_pipe_path("nul\0byte"),
            Err(PipeError::InvalidName { .. })
        ));
    }

    #[test]
    fn named_pipe_roundtrip_between_threads() {
        let path = unique_path("roundtrip");
        let name = as_name(&path).to_string();

        let reader_name = name.clone();
        let reader_thread = std::thread::spawn(move || {
            let mut reader = PipeReader::open_named(&reader_name).unwrap();
            let mut out = Vec::new();
            reader.read_to_end(&mut out).unwrap();
            out
        });

        let mut writer = PipeWriter::create_named(&name).unwrap();
        assert_eq!(writer.name(), Some(path.as_path()));
        writer.write_all(b"over the fifo").unwrap();
        writer.close();

        assert_eq!(reader_thread.join().unwrap(), b"over the fifo");
    }

    #[test]
    fn creator_removes_node_on_drop() {
        let path = unique_path("cleanup");
        let name = as_name(&path).to_string();

        let writer_name = name.clone();
        let writer_thread = std::thread::spawn(move || {
            let mut writer = PipeWriter::open_named(&writer_name).unwrap();
            writer.write_all(b"bye").unwrap();
        });

        let mut reader = PipeReader::create_named(&name).unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        writer_thread.join().unwrap();
        assert_eq!(out, b"bye");

        drop(reader);
        assert!(!path.exists());
    }

    #[test]
    fn existing_regular_file_is_rejected() {
        let path = unique_path("regular");
        std::fs::write(&path, b"not a fifo").unwrap();

        let err = PipeWriter::create_named(as_name(&path)).unwrap_err();
        assert!(matches!(err, PipeError::NotAFifo(_)));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn cleanup_skips_replaced_node() {
        let path = unique_path("replaced");
        let node = FifoNode::ensure(as_name(&path), true).unwrap();

        std::fs::remove_file(&path).unwrap();
        std::fs::write(&path, b"replacement").unwrap();
        drop(node);

        assert!(path.exists());
        let _ = std::fs::remove_file(&path);
    }
}
