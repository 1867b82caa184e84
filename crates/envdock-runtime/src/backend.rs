use crate::RuntimeError;
use envdock_schema::Package;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Operations envdock needs from the external environment manager.
///
/// Every method is one blocking tool invocation. Environment arguments are
/// names, never paths; the tool resolves them itself.
pub trait PackageManager: Send + Sync {
    fn name(&self) -> &str;

    fn available(&self) -> bool;

    /// Absolute paths of all environments, in the tool's listing order.
    fn env_paths(&self) -> Result<Vec<PathBuf>, RuntimeError>;

    /// Installation root; the base environment lives here.
    fn root_prefix(&self) -> Result<PathBuf, RuntimeError>;

    fn create_env(
        &self,
        name: &str,
        python_version: &str,
        channel: Option<&str>,
    ) -> Result<(), RuntimeError>;

    /// Create an environment from an environment file on disk. Without
    /// `name`, the tool takes the name from the file.
    fn create_env_from_file(&self, file: &Path, name: Option<&str>) -> Result<(), RuntimeError>;

    fn clone_env(&self, source: &str, target: &str) -> Result<(), RuntimeError>;

    fn remove_env(&self, name: &str) -> Result<(), RuntimeError>;

    /// Environment file text describing `name`.
    fn export_env(&self, name: &str) -> Result<String, RuntimeError>;

    fn list_packages(&self, env: &str) -> Result<Vec<Package>, RuntimeError>;

    fn install(&self, env: &str, specs: &[String], channels: &[String])
        -> Result<(), RuntimeError>;

    fn remove_package(&self, env: &str, package: &str) -> Result<(), RuntimeError>;

    fn pip_install(&self, env: &str, specs: &[String]) -> Result<(), RuntimeError>;

    fn pip_install_requirements(&self, env: &str, file: &Path) -> Result<(), RuntimeError>;

    fn pip_uninstall(&self, env: &str, package: &str) -> Result<(), RuntimeError>;
}

/// Shared backends, so a caller can keep a handle (e.g. to a mock) while a
/// service owns the boxed trait object.
impl<T: PackageManager + ?Sized> PackageManager for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn available(&self) -> bool {
        (**self).available()
    }

    fn env_paths(&self) -> Result<Vec<PathBuf>, RuntimeError> {
        (**self).env_paths()
    }

    fn root_prefix(&self) -> Result<PathBuf, RuntimeError> {
        (**self).root_prefix()
    }

    fn create_env(
        &self,
        name: &str,
        python_version: &str,
        channel: Option<&str>,
    ) -> Result<(), RuntimeError> {
        (**self).create_env(name, python_version, channel)
    }

    fn create_env_from_file(&self, file: &Path, name: Option<&str>) -> Result<(), RuntimeError> {
        (**self).create_env_from_file(file, name)
    }

    fn clone_env(&self, source: &str, target: &str) -> Result<(), RuntimeError> {
        (**self).clone_env(source, target)
    }

    fn remove_env(&self, name: &str) -> Result<(), RuntimeError> {
        (**self).remove_env(name)
    }

    fn export_env(&self, name: &str) -> Result<String, RuntimeError> {
        (**self).export_env(name)
    }

    fn list_packages(&self, env: &str) -> Result<Vec<Package>, RuntimeError> {
        (**self).list_packages(env)
    }

    fn install(
        &self,
        env: &str,
        specs: &[String],
        channels: &[String],
    ) -> Result<(), RuntimeError> {
        (**self).install(env, specs, channels)
    }

    fn remove_package(&self, env: &str, package: &str) -> Result<(), RuntimeError> {
        (**self).remove_package(env, package)
    }

    fn pip_install(&self, env: &str, specs: &[String]) -> Result<(), RuntimeError> {
        (**self).pip_install(env, specs)
    }

    fn pip_install_requirements(&self, env: &str, file: &Path) -> Result<(), RuntimeError> {
        (**self).pip_install_requirements(env, file)
    }

    fn pip_uninstall(&self, env: &str, package: &str) -> Result<(), RuntimeError> {
        (**self).pip_uninstall(env, package)
    }
}

pub fn select_backend(name: &str, tool: &Path) -> Result<Box<dyn PackageManager>, RuntimeError> {
    match name {
        "conda" => Ok(Box::new(crate::conda::CondaBackend::new(tool))),
        "mock" => Ok(Box::new(crate::mock::MockBackend::new())),
        other => Err(RuntimeError::BackendUnavailable(other.to_owned())),
    }
}
