//! `/proc` based [`EnvironmentReader`].

use std::fs;
use std::io;
use std::path::PathBuf;

use error_stack::Report;
use tracing::trace;

use super::EnvironmentReadError;
use super::EnvironmentReader;
use crate::Pid;

const DEFAULT_PROC_ROOT: &str = "/proc";

/// Reads `<proc_root>/<pid>/environ`.
///
/// The file is opened, read to the end and closed inside a single call. The
/// kernel only lets the owner of a process (or a caller with
/// `CAP_SYS_PTRACE`) read it.
#[derive(Debug, Clone)]
pub struct ProcEnvironmentReader {
    proc_root: PathBuf,
}

impl Default for ProcEnvironmentReader {
    fn default() -> Self {
        Self::new(DEFAULT_PROC_ROOT)
    }
}

impl ProcEnvironmentReader {
    pub fn new(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
        }
    }

    fn environ_path(&self, pid: Pid) -> PathBuf {
        self.proc_root.join(pid.to_string()).join("environ")
    }
}

fn classify(pid: Pid, err: &io::Error) -> EnvironmentReadError {
    match err.kind() {
        io::ErrorKind::NotFound => EnvironmentReadError::NotFound { pid },
        io::ErrorKind::PermissionDenied => EnvironmentReadError::PermissionDenied { pid },
        // the process exited while its environ file was open
        _ if err.raw_os_error() == Some(libc::ESRCH) => EnvironmentReadError::NotFound { pid },
        _ => EnvironmentReadError::Io { pid },
    }
}

impl EnvironmentReader for ProcEnvironmentReader {
    fn read_raw_environment(&self, pid: Pid) -> Result<Vec<u8>, Report<EnvironmentReadError>> {
        let path = self.environ_path(pid);
        trace!(path = %path.display(), "Reading process environment");

        fs::read(&path).map_err(|e| {
            let kind = classify(pid, &e);
            Report::new(e)
                .change_context(kind)
                .attach_printable(format!("path: {}", path.display()))
        })
    }
}
