//! Environment and package orchestration for envdock.
//!
//! This crate ties together manifest parsing, the environment registry, and
//! the package manager backend into `EnvService`, the API behind every HTTP
//! route: create, import, clone, delete, export, size and list environments;
//! list, install, bulk-install and uninstall packages. It also owns the
//! service configuration file and the error taxonomy mapped to HTTP statuses.

pub mod config;
pub mod packages;
pub mod service;
pub mod upload;

pub use config::ServiceConfig;
pub use packages::{InstallReport, Installer, Uninstalled};
pub use service::{validate_env_name, EnvService, EnvSummary, ImportOutcome, UNAVAILABLE};
pub use upload::Upload;

use envdock_runtime::RuntimeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{0}")]
    Validation(String),
    #[error("Environment '{0}' already exists. Please choose a different name.")]
    NameCollision(String),
    #[error("environment not found: {0}")]
    NotFound(String),
    #[error("manifest error: {0}")]
    Manifest(#[from] envdock_schema::ManifestError),
    /// A tool invocation failed while performing `action`.
    #[error("{action}: {source}")]
    Tool {
        action: &'static str,
        #[source]
        source: RuntimeError,
    },
    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// HTTP status this error is reported with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) | Self::NameCollision(_) | Self::Manifest(_) => 400,
            Self::NotFound(_)
            | Self::Runtime(RuntimeError::EnvNotFound(_))
            | Self::Tool {
                source: RuntimeError::EnvNotFound(_),
                ..
            } => 404,
            _ => 500,
        }
    }
}

/// Attach the failed action to a tool error.
pub(crate) trait ToolContext<T> {
    fn during(self, action: &'static str) -> Result<T, CoreError>;
}

impl<T> ToolContext<T> for Result<T, RuntimeError> {
    fn during(self, action: &'static str) -> Result<T, CoreError> {
        self.map_err(|source| CoreError::Tool { action, source })
    }
}
