use crate::service::validate_env_ref;
use crate::upload::Upload;
use crate::{CoreError, EnvService, ToolContext};
use envdock_schema::{parse_manifest, ManifestFormat, Package, PackageFilter};
use serde::Serialize;
use std::fmt;
use tracing::{debug, info};

/// Which installer removed a package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Installer {
    Conda,
    Pip,
}

impl fmt::Display for Installer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Conda => f.write_str("conda"),
            Self::Pip => f.write_str("pip"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Uninstalled {
    pub installer: Installer,
}

/// Specifier counts handed to each installer by a bulk install.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InstallReport {
    pub conda_count: usize,
    pub pip_count: usize,
}

impl InstallReport {
    pub fn total(&self) -> usize {
        self.conda_count + self.pip_count
    }
}

fn validate_spec(kind: &str, spec: &str) -> Result<(), CoreError> {
    if spec.trim().is_empty() {
        return Err(CoreError::Validation(format!("{kind} must not be empty")));
    }
    if spec.starts_with('-') {
        return Err(CoreError::Validation(format!(
            "invalid {kind} '{spec}': must not start with '-'"
        )));
    }
    Ok(())
}

impl EnvService {
    pub fn list_packages(
        &self,
        env: &str,
        filter: PackageFilter,
    ) -> Result<Vec<Package>, CoreError> {
        validate_env_ref(env)?;
        let packages = self
            .backend()
            .list_packages(env)
            .during("Failed to list packages")?;
        Ok(filter.apply(packages))
    }

    /// Install one conda specifier, passed to the tool unchanged.
    pub fn install(&self, env: &str, spec: &str) -> Result<(), CoreError> {
        validate_env_ref(env)?;
        validate_spec("package specifier", spec)?;

        info!("installing '{spec}' into '{env}'");
        self.backend()
            .install(env, &[spec.to_owned()], &[])
            .during("Failed to install package")
    }

    /// Install everything an uploaded manifest lists.
    ///
    /// A requirements list goes to pip as a file. An environment file is
    /// split into one conda call (with the file's channels) and one pip call;
    /// either is skipped when it has nothing to install, and the pip call
    /// only runs after conda succeeded.
    pub fn install_from_file(
        &self,
        env: &str,
        upload: &Upload,
    ) -> Result<InstallReport, CoreError> {
        validate_env_ref(env)?;
        let format = upload.format()?;
        let manifest = parse_manifest(&upload.data, format)?;
        let packages = manifest.packages;
        let report = InstallReport {
            conda_count: packages.conda_packages.len(),
            pip_count: packages.pip_packages.len(),
        };
        if packages.is_empty() {
            debug!("{} lists no packages, nothing to install", upload.file_name);
            return Ok(report);
        }

        info!(
            "installing {} packages into '{env}' from {} ({} conda, {} pip)",
            report.total(),
            upload.file_name,
            report.conda_count,
            report.pip_count
        );
        match format {
            ManifestFormat::Flat => {
                let file = upload.to_temp_file(format)?;
                self.backend()
                    .pip_install_requirements(env, file.path())
                    .during("Failed to install packages")?;
            }
            ManifestFormat::Structured => {
                if !packages.conda_packages.is_empty() {
                    self.backend()
                        .install(env, &packages.conda_packages, &manifest.channels)
                        .during("Failed to install packages")?;
                }
                if !packages.pip_packages.is_empty() {
                    self.backend()
                        .pip_install(env, &packages.pip_packages)
                        .during("Failed to install packages")?;
                }
            }
        }
        Ok(report)
    }

    /// Remove a package with conda, falling back to pip exactly once.
    ///
    /// When both fail the pip error is reported; the conda error is only
    /// logged.
    pub fn uninstall(&self, env: &str, package: &str) -> Result<Uninstalled, CoreError> {
        validate_env_ref(env)?;
        validate_spec("package name", package)?;

        match self.backend().remove_package(env, package) {
            Ok(()) => {
                info!("removed '{package}' from '{env}' with conda");
                Ok(Uninstalled {
                    installer: Installer::Conda,
                })
            }
            Err(conda_err) => {
                debug!("conda could not remove '{package}' from '{env}', trying pip: {conda_err}");
                self.backend()
                    .pip_uninstall(env, package)
                    .during("Failed to uninstall package")?;
                info!("removed '{package}' from '{env}' with pip");
                Ok(Uninstalled {
                    installer: Installer::Pip,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_rules() {
        assert!(validate_spec("package specifier", "numpy>=1.26").is_ok());
        assert!(validate_spec("package specifier", "").is_err());
        assert!(validate_spec("package specifier", "   ").is_err());
        assert!(validate_spec("package specifier", "--force-reinstall").is_err());
    }

    #[test]
    fn installer_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Installer::Pip).unwrap(), "\"pip\"");
        assert_eq!(Installer::Conda.to_string(), "conda");
    }

    #[test]
    fn report_total() {
        let report = InstallReport {
            conda_count: 2,
            pip_count: 3,
        };
        assert_eq!(report.total(), 5);
    }
}
