use crate::config::ServiceConfig;
use crate::upload::Upload;
use crate::{CoreError, ToolContext};
use envdock_runtime::{env_name_from_path, probe, select_backend, PackageManager, Registry, RuntimeError};
use envdock_schema::{parse_environment_file, parse_requirements, ManifestFormat};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Placeholder for a listing field that could not be determined.
pub const UNAVAILABLE: &str = "N/A";

/// Conda's own name for the root environment; never deletable.
const RESERVED_BASE: &str = "base";

/// One row of the environment listing. Everything but `name` and `path`
/// is best effort.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvSummary {
    pub name: String,
    pub path: PathBuf,
    pub size: String,
    pub last_modified: String,
    pub python_version: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportOutcome {
    /// Name the environment was created under, when known before running the tool.
    pub name: Option<String>,
    pub format: ManifestFormat,
}

pub fn validate_env_name(name: &str) -> Result<(), CoreError> {
    if name.is_empty() || name.len() > 64 {
        return Err(CoreError::Validation(
            "environment name must be 1-64 characters".to_owned(),
        ));
    }
    if name.starts_with('-')
        || !name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-' || b == b'.')
    {
        return Err(CoreError::Validation(format!(
            "invalid environment name '{name}': use letters, digits, '.', '_' and '-', not starting with '-'"
        )));
    }
    Ok(())
}

/// Names of existing environments are only checked for shapes that would be
/// read as a command-line option.
pub(crate) fn validate_env_ref(name: &str) -> Result<(), CoreError> {
    if name.trim().is_empty() || name.starts_with('-') {
        return Err(CoreError::Validation(format!(
            "invalid environment name '{name}'"
        )));
    }
    Ok(())
}

pub(crate) fn validate_python_version(version: &str) -> Result<(), CoreError> {
    if version.is_empty()
        || !version
            .chars()
            .all(|c| c.is_ascii_digit() || c == '.' || c == '*')
    {
        return Err(CoreError::Validation(format!(
            "invalid Python version '{version}'"
        )));
    }
    Ok(())
}

fn best_effort(env: &str, field: &str, result: Result<String, RuntimeError>) -> String {
    result.unwrap_or_else(|e| {
        debug!("environment '{env}': {field} unavailable: {e}");
        UNAVAILABLE.to_owned()
    })
}

/// Environment and package operations over one package manager backend.
///
/// Holds no mutable state; all authoritative state lives in the tool.
pub struct EnvService {
    backend: Box<dyn PackageManager>,
    config: ServiceConfig,
}

impl EnvService {
    pub fn new(backend: Box<dyn PackageManager>, config: ServiceConfig) -> Self {
        Self { backend, config }
    }

    /// Build the service with the backend named in `config`.
    pub fn from_config(config: ServiceConfig) -> Result<Self, CoreError> {
        let backend = select_backend(&config.backend, &config.tool)?;
        Ok(Self::new(backend, config))
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn backend(&self) -> &dyn PackageManager {
        self.backend.as_ref()
    }

    pub fn registry(&self) -> Registry<'_> {
        Registry::new(self.backend.as_ref(), &self.config.base_name)
    }

    fn is_base(&self, name: &str) -> bool {
        name == self.config.base_name
    }

    /// Fail with `NameCollision` if `name` is taken. Runs before any
    /// mutating command so a rejected request leaves no trace.
    fn ensure_name_free(&self, name: &str) -> Result<(), CoreError> {
        validate_env_name(name)?;
        if self
            .registry()
            .name_exists(name)
            .during("Failed to check existing environments")?
        {
            return Err(CoreError::NameCollision(name.to_owned()));
        }
        Ok(())
    }

    pub fn list(&self) -> Result<Vec<EnvSummary>, CoreError> {
        let envs = self
            .registry()
            .list_environments()
            .during("Failed to list environments")?;
        let timeout = self.config.probe_timeout();

        Ok(envs
            .into_iter()
            .map(|env| {
                let size = best_effort(&env.name, "size", probe::disk_usage(&env.path));
                let last_modified =
                    best_effort(&env.name, "mtime", probe::last_modified(&env.path));
                let python_version = best_effort(
                    &env.name,
                    "python version",
                    probe::interpreter_version(&env.path, timeout),
                );
                EnvSummary {
                    name: env.name,
                    path: env.path,
                    size,
                    last_modified,
                    python_version,
                }
            })
            .collect())
    }

    pub fn create(&self, name: &str, python_version: Option<&str>) -> Result<(), CoreError> {
        let python = python_version.unwrap_or(&self.config.default_python);
        validate_python_version(python)?;
        self.ensure_name_free(name)?;

        info!("creating environment '{name}' with Python {python}");
        self.backend
            .create_env(name, python, self.config.create_channel.as_deref())
            .during("Failed to create environment")
    }

    /// Create an environment from an uploaded environment file or
    /// requirements list.
    ///
    /// A requirements import is two tool calls; if the install step fails,
    /// the freshly created environment is left in place.
    pub fn import(
        &self,
        upload: &Upload,
        name: Option<&str>,
        python_version: Option<&str>,
    ) -> Result<ImportOutcome, CoreError> {
        let format = upload.format()?;
        match format {
            ManifestFormat::Structured => {
                let manifest = parse_environment_file(&upload.data)?;
                let effective = name.map(str::to_owned).or(manifest.name);
                if let Some(target) = &effective {
                    self.ensure_name_free(target)?;
                }

                let file = upload.to_temp_file(format)?;
                info!(
                    "importing environment {} from {}",
                    effective.as_deref().unwrap_or("<unnamed>"),
                    upload.file_name
                );
                self.backend
                    .create_env_from_file(file.path(), name)
                    .during("Import failed")?;
                Ok(ImportOutcome {
                    name: effective,
                    format,
                })
            }
            ManifestFormat::Flat => {
                let Some(name) = name else {
                    return Err(CoreError::Validation(
                        "Environment name is required for requirements.txt import".to_owned(),
                    ));
                };
                let python = python_version.unwrap_or(&self.config.default_python);
                validate_python_version(python)?;
                let requirements = parse_requirements(&upload.data)?;
                self.ensure_name_free(name)?;

                let file = upload.to_temp_file(format)?;
                info!(
                    "importing environment '{name}' from {} ({} requirements)",
                    upload.file_name,
                    requirements.packages.total()
                );
                self.backend
                    .create_env(name, python, None)
                    .during("Import failed")?;
                self.backend
                    .pip_install_requirements(name, file.path())
                    .during("Import failed")?;
                Ok(ImportOutcome {
                    name: Some(name.to_owned()),
                    format,
                })
            }
        }
    }

    pub fn clone_env(&self, source: &str, new_name: &str) -> Result<(), CoreError> {
        validate_env_ref(source)?;
        validate_env_name(new_name)?;
        let names = self
            .registry()
            .names()
            .during("Failed to check existing environments")?;
        if names.iter().any(|n| n == new_name) {
            return Err(CoreError::NameCollision(new_name.to_owned()));
        }
        if !names.iter().any(|n| n == source) {
            return Err(CoreError::NotFound(source.to_owned()));
        }

        info!("cloning environment '{source}' to '{new_name}'");
        self.backend
            .clone_env(source, new_name)
            .during("Failed to clone environment")
    }

    /// `base` is refused even when the base environment goes by another name.
    pub fn delete(&self, name: &str) -> Result<(), CoreError> {
        if self.is_base(name) || name == RESERVED_BASE {
            return Err(CoreError::Validation(format!(
                "Cannot delete '{name}' environment."
            )));
        }
        validate_env_ref(name)?;
        if !self
            .registry()
            .name_exists(name)
            .during("Failed to delete environment")?
        {
            return Err(CoreError::NotFound(name.to_owned()));
        }

        info!("deleting environment '{name}'");
        self.backend
            .remove_env(name)
            .during("Failed to delete environment")
    }

    /// Environment file text for `name`.
    pub fn export(&self, name: &str) -> Result<String, CoreError> {
        validate_env_ref(name)?;
        self.backend
            .export_env(name)
            .during("Failed to export environment")
    }

    /// Disk usage of one environment. Unlike `list`, failures are errors.
    pub fn size(&self, name: &str) -> Result<String, CoreError> {
        validate_env_ref(name)?;
        let path = self.locate(name)?;
        probe::disk_usage(&path).during("Failed to get size")
    }

    /// Find an environment prefix by its last path segment.
    ///
    /// The base prefix rarely ends in the base name, so an unmatched base
    /// falls back to the root prefix and, if that query fails as well, to the
    /// first listed prefix. The last step is a positional guess.
    fn locate(&self, name: &str) -> Result<PathBuf, CoreError> {
        let paths = self
            .backend
            .env_paths()
            .during("Failed to get size")?;
        if let Some(found) = paths.iter().find(|p| env_name_from_path(p) == name) {
            return Ok(found.clone());
        }
        if !self.is_base(name) {
            return Err(CoreError::NotFound(name.to_owned()));
        }

        match self.backend.root_prefix() {
            Ok(root) => Ok(root),
            Err(e) => {
                warn!("root prefix lookup failed, using first listed environment as '{name}': {e}");
                paths
                    .first()
                    .cloned()
                    .ok_or_else(|| CoreError::NotFound(name.to_owned()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_name_rules() {
        assert!(validate_env_name("my-env_1.2").is_ok());
        assert!(validate_env_name(&"x".repeat(64)).is_ok());
        assert!(validate_env_name("").is_err());
        assert!(validate_env_name(&"x".repeat(65)).is_err());
        assert!(validate_env_name("has space").is_err());
        assert!(validate_env_name("has/slash").is_err());
        assert!(validate_env_name("--all").is_err());
    }

    #[test]
    fn env_ref_rejects_option_lookalikes() {
        assert!(validate_env_ref("legacy env").is_ok());
        assert!(validate_env_ref("-n").is_err());
        assert!(validate_env_ref("  ").is_err());
    }

    #[test]
    fn python_version_rules() {
        assert!(validate_python_version("3.9").is_ok());
        assert!(validate_python_version("3.11.*").is_ok());
        assert!(validate_python_version("").is_err());
        assert!(validate_python_version("3.9 -c evil").is_err());
    }

    #[test]
    fn best_effort_collapses_errors() {
        assert_eq!(best_effort("dev", "size", Ok("1.2G".to_owned())), "1.2G");
        assert_eq!(
            best_effort(
                "dev",
                "size",
                Err(RuntimeError::EnvNotFound("dev".to_owned()))
            ),
            UNAVAILABLE
        );
    }
}
