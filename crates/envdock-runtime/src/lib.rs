//! Package manager backends and environment discovery for envdock.
//!
//! This crate implements the execution layer: the pluggable `PackageManager`
//! trait with a conda backend that shells out to the `conda` binary and an
//! in-memory mock backend, environment-name resolution over the tool's path
//! listing (`Registry`), best-effort filesystem probes (disk usage, mtime,
//! interpreter version), and prerequisite checking for the tool binary.

pub mod backend;
pub mod conda;
pub mod mock;
pub mod prereq;
pub mod probe;
pub mod registry;

pub use backend::{select_backend, PackageManager};
pub use conda::CondaBackend;
pub use mock::MockBackend;
pub use prereq::{check_tool_prereqs, format_missing, MissingPrereq};
pub use registry::{env_name_from_path, EnvRecord, Registry};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("backend '{0}' is not available on this system")]
    BackendUnavailable(String),
    /// The external tool ran and exited non-zero. `stderr` is kept verbatim.
    #[error("`{command}` exited with status {exit_code}: {stderr}")]
    ToolFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },
    #[error("unexpected output from `{command}`: {reason}")]
    InvalidOutput { command: String, reason: String },
    #[error("`{command}` did not finish within {secs}s")]
    Timeout { command: String, secs: u64 },
    #[error("environment not found: {0}")]
    EnvNotFound(String),
}

impl RuntimeError {
    /// Diagnostic text the tool printed, if this error came from a tool run.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            Self::ToolFailed { stderr, .. } => Some(stderr),
            _ => None,
        }
    }
}
