use crate::backend::PackageManager;
use crate::RuntimeError;
use envdock_schema::Package;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// Backend that drives the `conda` command-line tool.
pub struct CondaBackend {
    tool: PathBuf,
}

#[derive(Debug, Deserialize)]
struct EnvList {
    #[serde(default)]
    envs: Vec<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct CondaInfo {
    root_prefix: Option<PathBuf>,
}

impl CondaBackend {
    pub fn new(tool: impl Into<PathBuf>) -> Self {
        Self { tool: tool.into() }
    }

    pub fn tool(&self) -> &Path {
        &self.tool
    }

    fn command_line(&self, args: &[String]) -> String {
        format!("{} {}", self.tool.display(), args.join(" "))
    }

    /// Run the tool and return its stdout. A non-zero exit becomes
    /// `ToolFailed` carrying stderr as printed.
    fn run(&self, args: &[String]) -> Result<String, RuntimeError> {
        let command = self.command_line(args);
        debug!("exec: {command}");

        let output = Command::new(&self.tool).args(args).output()?;
        if !output.status.success() {
            return Err(RuntimeError::ToolFailed {
                command,
                exit_code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim_end().to_owned(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn run_json<T: for<'de> Deserialize<'de>>(&self, args: &[String]) -> Result<T, RuntimeError> {
        let stdout = self.run(args)?;
        serde_json::from_str(&stdout).map_err(|e| RuntimeError::InvalidOutput {
            command: self.command_line(args),
            reason: e.to_string(),
        })
    }
}

fn argv<const N: usize>(fixed: [&str; N]) -> Vec<String> {
    fixed.iter().map(|s| (*s).to_owned()).collect()
}

pub(crate) fn env_list_args() -> Vec<String> {
    argv(["env", "list", "--json"])
}

pub(crate) fn info_args() -> Vec<String> {
    argv(["info", "--json"])
}

pub(crate) fn create_args(name: &str, python_version: &str, channel: Option<&str>) -> Vec<String> {
    let mut args = argv(["create", "-n", name]);
    args.push(format!("python={python_version}"));
    if let Some(channel) = channel {
        args.extend(argv(["-c", channel]));
    }
    args.push("-y".to_owned());
    args
}

pub(crate) fn create_from_file_args(file: &Path, name: Option<&str>) -> Vec<String> {
    let mut args = argv(["env", "create", "-f"]);
    args.push(file.display().to_string());
    if let Some(name) = name {
        args.extend(argv(["-n", name]));
    }
    args
}

pub(crate) fn clone_args(source: &str, target: &str) -> Vec<String> {
    argv(["create", "--name", target, "--clone", source, "-y"])
}

pub(crate) fn remove_env_args(name: &str) -> Vec<String> {
    argv(["remove", "--name", name, "--all", "-y"])
}

pub(crate) fn export_args(name: &str) -> Vec<String> {
    argv(["env", "export", "-n", name])
}

pub(crate) fn list_packages_args(env: &str) -> Vec<String> {
    argv(["list", "-n", env, "--json"])
}

pub(crate) fn install_args(env: &str, specs: &[String], channels: &[String]) -> Vec<String> {
    let mut args = argv(["install", "-n", env]);
    for channel in channels {
        args.extend(argv(["-c", channel.as_str()]));
    }
    args.extend(specs.iter().cloned());
    args.push("-y".to_owned());
    args
}

pub(crate) fn remove_package_args(env: &str, package: &str) -> Vec<String> {
    argv(["remove", "-n", env, package, "-y"])
}

/// pip runs inside the environment through `conda run`.
fn pip_args(env: &str, rest: &[String]) -> Vec<String> {
    let mut args = argv(["run", "-n", env, "pip"]);
    args.extend(rest.iter().cloned());
    args
}

pub(crate) fn pip_install_args(env: &str, specs: &[String]) -> Vec<String> {
    let mut rest = vec!["install".to_owned()];
    rest.extend(specs.iter().cloned());
    pip_args(env, &rest)
}

pub(crate) fn pip_requirements_args(env: &str, file: &Path) -> Vec<String> {
    pip_args(
        env,
        &["install".to_owned(), "-r".to_owned(), file.display().to_string()],
    )
}

pub(crate) fn pip_uninstall_args(env: &str, package: &str) -> Vec<String> {
    pip_args(env, &argv(["uninstall", package, "-y"]))
}

impl PackageManager for CondaBackend {
    fn name(&self) -> &'static str {
        "conda"
    }

    fn available(&self) -> bool {
        Command::new(&self.tool)
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn env_paths(&self) -> Result<Vec<PathBuf>, RuntimeError> {
        let list: EnvList = self.run_json(&env_list_args())?;
        Ok(list.envs)
    }

    fn root_prefix(&self) -> Result<PathBuf, RuntimeError> {
        let args = info_args();
        let info: CondaInfo = self.run_json(&args)?;
        info.root_prefix.ok_or_else(|| RuntimeError::InvalidOutput {
            command: self.command_line(&args),
            reason: "missing root_prefix".to_owned(),
        })
    }

    fn create_env(
        &self,
        name: &str,
        python_version: &str,
        channel: Option<&str>,
    ) -> Result<(), RuntimeError> {
        self.run(&create_args(name, python_version, channel))?;
        Ok(())
    }

    fn create_env_from_file(&self, file: &Path, name: Option<&str>) -> Result<(), RuntimeError> {
        self.run(&create_from_file_args(file, name))?;
        Ok(())
    }

    fn clone_env(&self, source: &str, target: &str) -> Result<(), RuntimeError> {
        self.run(&clone_args(source, target))?;
        Ok(())
    }

    fn remove_env(&self, name: &str) -> Result<(), RuntimeError> {
        self.run(&remove_env_args(name))?;
        Ok(())
    }

    fn export_env(&self, name: &str) -> Result<String, RuntimeError> {
        self.run(&export_args(name))
    }

    fn list_packages(&self, env: &str) -> Result<Vec<Package>, RuntimeError> {
        self.run_json(&list_packages_args(env))
    }

    fn install(
        &self,
        env: &str,
        specs: &[String],
        channels: &[String],
    ) -> Result<(), RuntimeError> {
        self.run(&install_args(env, specs, channels))?;
        Ok(())
    }

    fn remove_package(&self, env: &str, package: &str) -> Result<(), RuntimeError> {
        self.run(&remove_package_args(env, package))?;
        Ok(())
    }

    fn pip_install(&self, env: &str, specs: &[String]) -> Result<(), RuntimeError> {
        self.run(&pip_install_args(env, specs))?;
        Ok(())
    }

    fn pip_install_requirements(&self, env: &str, file: &Path) -> Result<(), RuntimeError> {
        self.run(&pip_requirements_args(env, file))?;
        Ok(())
    }

    fn pip_uninstall(&self, env: &str, package: &str) -> Result<(), RuntimeError> {
        self.run(&pip_uninstall_args(env, package))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_pins_python_and_channel() {
        assert_eq!(
            create_args("dev", "3.11", Some("conda-forge")),
            vec!["create", "-n", "dev", "python=3.11", "-c", "conda-forge", "-y"]
        );
        assert_eq!(
            create_args("dev", "3.9", None),
            vec!["create", "-n", "dev", "python=3.9", "-y"]
        );
    }

    #[test]
    fn create_from_file_name_is_optional() {
        let file = Path::new("/tmp/upload.yml");
        assert_eq!(
            create_from_file_args(file, None),
            vec!["env", "create", "-f", "/tmp/upload.yml"]
        );
        assert_eq!(
            create_from_file_args(file, Some("ml")),
            vec!["env", "create", "-f", "/tmp/upload.yml", "-n", "ml"]
        );
    }

    #[test]
    fn install_places_channels_before_specs() {
        let specs = vec!["numpy=1.2".to_owned(), "pandas".to_owned()];
        let channels = vec!["conda-forge".to_owned()];
        assert_eq!(
            install_args("dev", &specs, &channels),
            vec!["install", "-n", "dev", "-c", "conda-forge", "numpy=1.2", "pandas", "-y"]
        );
    }

    #[test]
    fn pip_commands_run_inside_env() {
        assert_eq!(
            pip_install_args("dev", &["flask".to_owned()]),
            vec!["run", "-n", "dev", "pip", "install", "flask"]
        );
        assert_eq!(
            pip_requirements_args("dev", Path::new("/tmp/req.txt")),
            vec!["run", "-n", "dev", "pip", "install", "-r", "/tmp/req.txt"]
        );
        assert_eq!(
            pip_uninstall_args("dev", "flask"),
            vec!["run", "-n", "dev", "pip", "uninstall", "flask", "-y"]
        );
    }

    #[test]
    fn environment_lifecycle_args() {
        assert_eq!(
            clone_args("dev", "dev-copy"),
            vec!["create", "--name", "dev-copy", "--clone", "dev", "-y"]
        );
        assert_eq!(
            remove_env_args("dev"),
            vec!["remove", "--name", "dev", "--all", "-y"]
        );
        assert_eq!(export_args("dev"), vec!["env", "export", "-n", "dev"]);
        assert_eq!(
            remove_package_args("dev", "numpy"),
            vec!["remove", "-n", "dev", "numpy", "-y"]
        );
        assert_eq!(list_packages_args("dev"), vec!["list", "-n", "dev", "--json"]);
        assert_eq!(env_list_args(), vec!["env", "list", "--json"]);
        assert_eq!(info_args(), vec!["info", "--json"]);
    }

    #[test]
    fn decodes_env_list_and_info() {
        let list: EnvList =
            serde_json::from_str(r#"{"envs": ["/opt/conda", "/opt/conda/envs/dev"]}"#).unwrap();
        assert_eq!(list.envs.len(), 2);

        let info: CondaInfo =
            serde_json::from_str(r#"{"root_prefix": "/opt/conda", "platform": "linux-64"}"#)
                .unwrap();
        assert_eq!(info.root_prefix, Some(PathBuf::from("/opt/conda")));
    }

    #[test]
    fn missing_tool_is_unavailable_and_errors() {
        let backend = CondaBackend::new("/nonexistent/envdock-test/conda");
        assert!(!backend.available());
        assert!(matches!(backend.env_paths(), Err(RuntimeError::Io(_))));
    }

    #[test]
    fn nonzero_exit_keeps_stderr() {
        // `sh -c` stands in for the tool so the failure path runs without conda.
        let backend = CondaBackend::new("sh");
        let err = backend
            .run(&argv(["-c", "echo 'PackagesNotFoundError: nope' >&2; exit 3"]))
            .unwrap_err();
        match err {
            RuntimeError::ToolFailed {
                exit_code, stderr, ..
            } => {
                assert_eq!(exit_code, 3);
                assert_eq!(stderr, "PackagesNotFoundError: nope");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn invalid_json_is_reported() {
        let backend = CondaBackend::new("sh");
        let err = backend
            .run_json::<EnvList>(&argv(["-c", "echo not-json"]))
            .unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidOutput { .. }));
    }
}
