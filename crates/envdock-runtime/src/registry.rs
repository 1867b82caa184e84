//! Environment names from the tool's path-only listing.
//!
//! `conda env list` reports absolute prefixes without saying which one is the
//! base environment. The base is the prefix equal to `conda info`'s root
//! prefix; every other environment is named after its last path segment.

use crate::backend::PackageManager;
use crate::RuntimeError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvRecord {
    pub name: String,
    pub path: PathBuf,
}

/// Last path segment of an environment prefix, ignoring trailing slashes.
pub fn env_name_from_path(path: &Path) -> String {
    path.file_name().map_or_else(
        || path.to_string_lossy().into_owned(),
        |n| n.to_string_lossy().into_owned(),
    )
}

pub struct Registry<'a> {
    backend: &'a dyn PackageManager,
    base_name: &'a str,
}

impl<'a> Registry<'a> {
    pub fn new(backend: &'a dyn PackageManager, base_name: &'a str) -> Self {
        Self { backend, base_name }
    }

    pub fn base_name(&self) -> &str {
        self.base_name
    }

    /// All environments in listing order.
    ///
    /// If the root prefix cannot be queried, the first listed prefix is taken
    /// as base. That is a positional guess, not something the tool promises.
    pub fn list_environments(&self) -> Result<Vec<EnvRecord>, RuntimeError> {
        let paths = self.backend.env_paths()?;
        let root = match self.backend.root_prefix() {
            Ok(root) => Some(root),
            Err(e) => {
                warn!("root prefix lookup failed, assuming first listed environment is base: {e}");
                None
            }
        };

        Ok(paths
            .into_iter()
            .enumerate()
            .map(|(idx, path)| {
                let is_base = match &root {
                    Some(root) => same_prefix(&path, root),
                    None => idx == 0,
                };
                let name = if is_base {
                    self.base_name.to_owned()
                } else {
                    env_name_from_path(&path)
                };
                EnvRecord { name, path }
            })
            .collect())
    }

    pub fn names(&self) -> Result<Vec<String>, RuntimeError> {
        Ok(self
            .list_environments()?
            .into_iter()
            .map(|e| e.name)
            .collect())
    }

    pub fn name_exists(&self, name: &str) -> Result<bool, RuntimeError> {
        Ok(self.names()?.iter().any(|n| n == name))
    }

    pub fn resolve_path(&self, name: &str) -> Result<PathBuf, RuntimeError> {
        self.list_environments()?
            .into_iter()
            .find(|e| e.name == name)
            .map(|e| e.path)
            .ok_or_else(|| RuntimeError::EnvNotFound(name.to_owned()))
    }
}

fn same_prefix(a: &Path, b: &Path) -> bool {
    a.components().eq(b.components())
}
