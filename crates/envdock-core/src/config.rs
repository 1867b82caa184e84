use crate::CoreError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Service settings. Every field has a default, so a partial file is valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServiceConfig {
    /// `conda` or `mock`.
    pub backend: String,
    /// Path or name of the conda binary.
    pub tool: PathBuf,
    /// Name reported for the root environment; it can never be deleted.
    pub base_name: String,
    /// Channel passed to `conda create`. `null` uses the tool's own defaults.
    pub create_channel: Option<String>,
    /// Python version used when a request does not name one.
    pub default_python: String,
    /// Upper bound for one interpreter-version probe while listing.
    pub probe_timeout_secs: u64,
    /// Value of `Access-Control-Allow-Origin`. `null` omits the header.
    pub cors_origin: Option<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            backend: "conda".to_owned(),
            tool: PathBuf::from("conda"),
            base_name: "base".to_owned(),
            create_channel: Some("conda-forge".to_owned()),
            default_python: "3.9".to_owned(),
            probe_timeout_secs: 5,
            cors_origin: Some("*".to_owned()),
        }
    }
}

impl ServiceConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    /// Load `~/.config/envdock/config.json`, or defaults if it does not exist.
    pub fn load_default() -> Result<Self, CoreError> {
        let path = default_config_path()?;
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| CoreError::Config(format!("invalid config {}: {e}", path.display())))
    }

    pub fn save(&self, path: &Path) -> Result<(), CoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| CoreError::Config(format!("cannot serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

pub fn default_config_path() -> Result<PathBuf, CoreError> {
    let home = std::env::var("HOME").map_err(|_| CoreError::Config("HOME not set".to_owned()))?;
    Ok(PathBuf::from(home).join(".config/envdock/config.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.json");

        let config = ServiceConfig {
            tool: PathBuf::from("/opt/miniforge/bin/conda"),
            probe_timeout_secs: 2,
            ..ServiceConfig::default()
        };
        config.save(&path).unwrap();

        let loaded = ServiceConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"backend": "mock", "cors_origin": null}"#).unwrap();

        let loaded = ServiceConfig::load(&path).unwrap();
        assert_eq!(loaded.backend, "mock");
        assert_eq!(loaded.cors_origin, None);
        assert_eq!(loaded.base_name, "base");
        assert_eq!(loaded.create_channel.as_deref(), Some("conda-forge"));
        assert_eq!(loaded.probe_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn invalid_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            ServiceConfig::load(&path),
            Err(CoreError::Config(_))
        ));
    }
}
