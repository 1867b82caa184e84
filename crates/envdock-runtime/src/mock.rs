use crate::backend::PackageManager;
use crate::RuntimeError;
use envdock_schema::{parse_environment_file, parse_requirements, Package};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

const MOCK_BASE: &str = "base";

struct MockEnv {
    name: String,
    path: PathBuf,
    packages: Vec<Package>,
}

struct MockState {
    root: PathBuf,
    envs: Vec<MockEnv>,
    failures: HashMap<String, String>,
    calls: Vec<String>,
}

/// In-memory stand-in for conda.
///
/// Keeps environments and their packages in memory, records every call as
/// `"<op> <args...>"`, and can be told to fail a given operation with a
/// chosen stderr text. Nothing is written to disk.
pub struct MockBackend {
    state: Mutex<MockState>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::with_root(std::env::temp_dir().join("envdock-mock"))
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with only the base environment, rooted at `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let base = MockEnv {
            name: MOCK_BASE.to_owned(),
            path: root.clone(),
            packages: default_packages("3.12"),
        };
        Self {
            state: Mutex::new(MockState {
                root,
                envs: vec![base],
                failures: HashMap::new(),
                calls: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add an environment directly, without recording a call.
    pub fn add_env(&self, name: &str) -> PathBuf {
        let mut state = self.lock();
        let path = state.root.join("envs").join(name);
        state.envs.push(MockEnv {
            name: name.to_owned(),
            path: path.clone(),
            packages: default_packages("3.9"),
        });
        path
    }

    pub fn add_package(&self, env: &str, name: &str, version: &str, channel: &str) {
        let mut state = self.lock();
        if let Some(e) = state.envs.iter_mut().find(|e| e.name == env) {
            upsert(&mut e.packages, name, version, channel);
        }
    }

    /// Reorder the listing. Names not mentioned keep their relative order
    /// after the named ones.
    pub fn set_env_order(&self, order: &[&str]) {
        let mut state = self.lock();
        state.envs.sort_by_key(|e| {
            order
                .iter()
                .position(|n| *n == e.name)
                .unwrap_or(order.len())
        });
    }

    /// Make every subsequent call of `op` fail with `stderr`.
    pub fn fail(&self, op: &str, stderr: &str) {
        self.lock().failures.insert(op.to_owned(), stderr.to_owned());
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self, op: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.split(' ').next() == Some(op))
            .count()
    }

    /// Record the call and apply any configured failure.
    fn enter(&self, op: &str, args: &[&str]) -> Result<MutexGuard<'_, MockState>, RuntimeError> {
        let mut state = self.lock();
        let line = std::iter::once(op)
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ");
        state.calls.push(line.clone());
        if let Some(stderr) = state.failures.get(op) {
            return Err(tool_failed(&line, stderr));
        }
        Ok(state)
    }
}

impl MockState {
    fn find(&self, name: &str) -> Option<&MockEnv> {
        self.envs.iter().find(|e| e.name == name)
    }

    fn find_mut(&mut self, name: &str) -> Option<&mut MockEnv> {
        self.envs.iter_mut().find(|e| e.name == name)
    }

    fn require(&mut self, name: &str, line: &str) -> Result<&mut MockEnv, RuntimeError> {
        self.find_mut(name).ok_or_else(|| {
            tool_failed(
                line,
                &format!("EnvironmentLocationNotFound: Not a conda environment: {name}"),
            )
        })
    }

    fn insert_new(&mut self, name: &str, packages: Vec<Package>, line: &str) -> Result<(), RuntimeError> {
        let path = self.root.join("envs").join(name);
        if self.find(name).is_some() {
            return Err(tool_failed(
                line,
                &format!("CondaValueError: prefix already exists: {}", path.display()),
            ));
        }
        self.envs.push(MockEnv {
            name: name.to_owned(),
            path,
            packages,
        });
        Ok(())
    }
}

fn tool_failed(line: &str, stderr: &str) -> RuntimeError {
    RuntimeError::ToolFailed {
        command: format!("conda {line}"),
        exit_code: 1,
        stderr: stderr.to_owned(),
    }
}

fn package(name: &str, version: &str, channel: &str) -> Package {
    Package {
        name: name.to_owned(),
        version: version.to_owned(),
        channel: channel.to_owned(),
        build_string: if channel == "pypi" {
            String::new()
        } else {
            "mock_0".to_owned()
        },
    }
}

fn default_packages(python_version: &str) -> Vec<Package> {
    vec![
        package("openssl", "3.1.4", "conda-forge"),
        package("pip", "23.3.1", "conda-forge"),
        package("python", python_version, "conda-forge"),
        package("setuptools", "68.2.2", "conda-forge"),
        package("sqlite", "3.44.2", "conda-forge"),
        package("wheel", "0.42.0", "conda-forge"),
    ]
}

fn upsert(packages: &mut Vec<Package>, name: &str, version: &str, channel: &str) {
    packages.retain(|p| p.name != name);
    packages.push(package(name, version, channel));
    packages.sort_by(|a, b| a.name.cmp(&b.name));
}

/// Split a conda or pip specifier into name and a best-guess version.
fn split_spec(spec: &str) -> (&str, &str) {
    let spec = spec.trim();
    match spec.find(|c: char| "=<>!~ [;".contains(c)) {
        Some(idx) => {
            let version = spec[idx..].trim_start_matches(|c: char| "=<>!~ ".contains(c));
            let version = version.split('=').next().unwrap_or_default();
            (&spec[..idx], if version.is_empty() { "0.0.0-mock" } else { version })
        }
        None => (spec, "0.0.0-mock"),
    }
}

fn install_specs<'a>(env: &mut MockEnv, specs: impl IntoIterator<Item = &'a String>, channel: &str) {
    for spec in specs {
        let (name, version) = split_spec(spec);
        upsert(&mut env.packages, name, version, channel);
    }
}

impl PackageManager for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn available(&self) -> bool {
        true
    }

    fn env_paths(&self) -> Result<Vec<PathBuf>, RuntimeError> {
        let state = self.enter("env_paths", &[])?;
        Ok(state.envs.iter().map(|e| e.path.clone()).collect())
    }

    fn root_prefix(&self) -> Result<PathBuf, RuntimeError> {
        let state = self.enter("root_prefix", &[])?;
        Ok(state.root.clone())
    }

    fn create_env(
        &self,
        name: &str,
        python_version: &str,
        channel: Option<&str>,
    ) -> Result<(), RuntimeError> {
        let mut state = self.enter(
            "create_env",
            &[name, python_version, channel.unwrap_or("-")],
        )?;
        state.insert_new(name, default_packages(python_version), &format!("create -n {name}"))
    }

    fn create_env_from_file(&self, file: &Path, name: Option<&str>) -> Result<(), RuntimeError> {
        let file_arg = file.display().to_string();
        let line = format!("env create -f {file_arg}");
        let mut state = self.enter("create_env_from_file", &[file_arg.as_str(), name.unwrap_or("-")])?;

        let content = std::fs::read(file)?;
        let manifest = parse_environment_file(&content)
            .map_err(|e| tool_failed(&line, &format!("EnvironmentFileNotFound: {e}")))?;
        let Some(env_name) = name.map(str::to_owned).or(manifest.name) else {
            return Err(tool_failed(
                &line,
                "CondaValueError: Unable to determine environment name",
            ));
        };

        let mut env = MockEnv {
            name: env_name.clone(),
            path: PathBuf::new(),
            packages: default_packages("3.9"),
        };
        let channel = manifest
            .channels
            .first()
            .map_or("conda-forge", String::as_str);
        install_specs(&mut env, &manifest.packages.conda_packages, channel);
        install_specs(&mut env, &manifest.packages.pip_packages, "pypi");
        state.insert_new(&env_name, env.packages, &line)
    }

    fn clone_env(&self, source: &str, target: &str) -> Result<(), RuntimeError> {
        let line = format!("create --name {target} --clone {source}");
        let mut state = self.enter("clone_env", &[source, target])?;
        let packages = state
            .find(source)
            .map(|e| e.packages.clone())
            .ok_or_else(|| {
                tool_failed(
                    &line,
                    &format!("CondaEnvironmentNotFoundError: Could not find conda environment: {source}"),
                )
            })?;
        state.insert_new(target, packages, &line)
    }

    fn remove_env(&self, name: &str) -> Result<(), RuntimeError> {
        let line = format!("remove --name {name} --all");
        let mut state = self.enter("remove_env", &[name])?;
        state.require(name, &line)?;
        state.envs.retain(|e| e.name != name);
        Ok(())
    }

    fn export_env(&self, name: &str) -> Result<String, RuntimeError> {
        let line = format!("env export -n {name}");
        let mut state = self.enter("export_env", &[name])?;
        let env = state.require(name, &line)?;

        let mut out = format!("name: {}\nchannels:\n  - conda-forge\ndependencies:\n", env.name);
        let mut pip = Vec::new();
        for p in &env.packages {
            if p.is_pip() {
                pip.push(format!("{}=={}", p.name, p.version));
            } else {
                let _ = writeln!(out, "  - {}={}={}", p.name, p.version, p.build_string);
            }
        }
        if !pip.is_empty() {
            out.push_str("  - pip:\n");
            for spec in pip {
                let _ = writeln!(out, "    - {spec}");
            }
        }
        let _ = writeln!(out, "prefix: {}", env.path.display());
        Ok(out)
    }

    fn list_packages(&self, env: &str) -> Result<Vec<Package>, RuntimeError> {
        let line = format!("list -n {env} --json");
        let mut state = self.enter("list_packages", &[env])?;
        Ok(state.require(env, &line)?.packages.clone())
    }

    fn install(
        &self,
        env: &str,
        specs: &[String],
        channels: &[String],
    ) -> Result<(), RuntimeError> {
        let line = format!("install -n {env}");
        let mut args = vec![env];
        args.extend(channels.iter().map(String::as_str));
        args.extend(specs.iter().map(String::as_str));
        let mut state = self.enter("install", &args)?;
        let target = state.require(env, &line)?;
        let channel = channels.first().map_or("conda-forge", String::as_str);
        install_specs(target, specs, channel);
        Ok(())
    }

    fn remove_package(&self, env: &str, package: &str) -> Result<(), RuntimeError> {
        let line = format!("remove -n {env} {package}");
        let mut state = self.enter("remove_package", &[env, package])?;
        let target = state.require(env, &line)?;
        let Some(idx) = target
            .packages
            .iter()
            .position(|p| p.name == package && !p.is_pip())
        else {
            return Err(tool_failed(
                &line,
                &format!(
                    "PackagesNotFoundError: The following packages are missing from the target environment:\n  - {package}"
                ),
            ));
        };
        target.packages.remove(idx);
        Ok(())
    }

    fn pip_install(&self, env: &str, specs: &[String]) -> Result<(), RuntimeError> {
        let line = format!("run -n {env} pip install");
        let mut args = vec![env];
        args.extend(specs.iter().map(String::as_str));
        let mut state = self.enter("pip_install", &args)?;
        let target = state.require(env, &line)?;
        install_specs(target, specs, "pypi");
        Ok(())
    }

    fn pip_install_requirements(&self, env: &str, file: &Path) -> Result<(), RuntimeError> {
        let file_arg = file.display().to_string();
        let line = format!("run -n {env} pip install -r {file_arg}");
        let mut state = self.enter("pip_install_requirements", &[env, file_arg.as_str()])?;
        let content = std::fs::read(file)?;
        let manifest = parse_requirements(&content)
            .map_err(|e| tool_failed(&line, &format!("ERROR: Invalid requirement: {e}")))?;
        let target = state.require(env, &line)?;
        install_specs(target, &manifest.packages.pip_packages, "pypi");
        Ok(())
    }

    fn pip_uninstall(&self, env: &str, package: &str) -> Result<(), RuntimeError> {
        let line = format!("run -n {env} pip uninstall {package}");
        let mut state = self.enter("pip_uninstall", &[env, package])?;
        let target = state.require(env, &line)?;
        let Some(idx) = target
            .packages
            .iter()
            .position(|p| p.name == package && p.is_pip())
        else {
            return Err(tool_failed(
                &line,
                &format!("ERROR: {package} is not installed by pip"),
            ));
        };
        target.packages.remove(idx);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(pkgs: &[Package]) -> Vec<&str> {
        pkgs.iter().map(|p| p.name.as_str()).collect()
    }

    #[test]
    fn split_spec_variants() {
        assert_eq!(split_spec("numpy"), ("numpy", "0.0.0-mock"));
        assert_eq!(split_spec("numpy=1.2"), ("numpy", "1.2"));
        assert_eq!(split_spec("numpy=1.2=0"), ("numpy", "1.2"));
        assert_eq!(split_spec("requests==2.31.0"), ("requests", "2.31.0"));
        assert_eq!(split_spec("flask>=3"), ("flask", "3"));
    }

    #[test]
    fn mock_env_lifecycle() {
        let backend = MockBackend::with_root("/opt/conda");
        backend.create_env("dev", "3.11", Some("conda-forge")).unwrap();
        assert_eq!(backend.env_paths().unwrap().len(), 2);

        assert!(backend.create_env("dev", "3.11", None).is_err());

        backend.clone_env("dev", "dev-copy").unwrap();
        let pkgs = backend.list_packages("dev-copy").unwrap();
        assert!(pkgs.iter().any(|p| p.name == "python" && p.version == "3.11"));

        backend.remove_env("dev").unwrap();
        assert!(backend.remove_env("dev").is_err());
        assert_eq!(backend.call_count("remove_env"), 2);
    }

    #[test]
    fn mock_install_and_remove_by_installer() {
        let backend = MockBackend::with_root("/opt/conda");
        backend.add_env("dev");
        backend
            .install("dev", &["numpy=1.26".to_owned()], &[])
            .unwrap();
        backend.pip_install("dev", &["flask".to_owned()]).unwrap();

        assert!(backend.remove_package("dev", "flask").is_err());
        backend.pip_uninstall("dev", "flask").unwrap();
        assert!(backend.pip_uninstall("dev", "numpy").is_err());
        backend.remove_package("dev", "numpy").unwrap();

        let pkgs = backend.list_packages("dev").unwrap();
        assert!(!names(&pkgs).contains(&"numpy"));
        assert!(!names(&pkgs).contains(&"flask"));
    }

    #[test]
    fn mock_failure_injection_records_call() {
        let backend = MockBackend::with_root("/opt/conda");
        backend.fail("export_env", "CondaError: boom");
        let err = backend.export_env("base").unwrap_err();
        assert_eq!(err.stderr(), Some("CondaError: boom"));
        assert_eq!(backend.calls(), vec!["export_env base"]);

        backend.clear_failures();
        let yaml = backend.export_env("base").unwrap();
        assert!(yaml.starts_with("name: base\n"));
        assert!(yaml.contains("  - python=3.12=mock_0\n"));
    }

    #[test]
    fn mock_create_from_file_reads_name() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("environment.yml");
        std::fs::write(
            &file,
            "name: from-file\ndependencies:\n  - scipy=1.11\n  - pip:\n    - rich\n",
        )
        .unwrap();

        let backend = MockBackend::with_root("/opt/conda");
        backend.create_env_from_file(&file, None).unwrap();
        let pkgs = backend.list_packages("from-file").unwrap();
        assert!(names(&pkgs).contains(&"scipy"));
        assert!(pkgs.iter().any(|p| p.name == "rich" && p.is_pip()));

        backend.create_env_from_file(&file, Some("renamed")).unwrap();
        assert!(backend.list_packages("renamed").is_ok());
    }
}
