use crate::partition::{partition_dependencies, PartitionedPackages};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to parse environment file: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("environment file must be a mapping at the top level")]
    NotAMapping,
    #[error("'dependencies' must be a sequence")]
    DependenciesNotASequence,
    #[error("manifest is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
    #[error("unsupported file format: '{0}'. Use .yml, .yaml, or .txt")]
    UnsupportedFormat(String),
}

/// Shape of an uploaded manifest, decided by its file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManifestFormat {
    /// conda environment file (`.yml` / `.yaml`).
    Structured,
    /// pip requirements list (`.txt`), one specifier per line.
    Flat,
}

impl ManifestFormat {
    pub fn from_file_name(file_name: &str) -> Result<Self, ManifestError> {
        let lower = file_name.to_ascii_lowercase();
        if lower.ends_with(".yml") || lower.ends_with(".yaml") {
            Ok(Self::Structured)
        } else if lower.ends_with(".txt") {
            Ok(Self::Flat)
        } else {
            Err(ManifestError::UnsupportedFormat(file_name.to_owned()))
        }
    }

    /// File suffix to use when the upload has to be handed to the tool on disk.
    pub fn suffix(self) -> &'static str {
        match self {
            Self::Structured => ".yml",
            Self::Flat => ".txt",
        }
    }
}

impl fmt::Display for ManifestFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Structured => f.write_str("environment file"),
            Self::Flat => f.write_str("requirements file"),
        }
    }
}

/// A parsed upload. Only structured manifests carry a name or channels.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParsedManifest {
    pub name: Option<String>,
    pub channels: Vec<String>,
    pub packages: PartitionedPackages,
}

pub fn parse_manifest(input: &[u8], format: ManifestFormat) -> Result<ParsedManifest, ManifestError> {
    match format {
        ManifestFormat::Structured => parse_environment_file(input),
        ManifestFormat::Flat => parse_requirements(input),
    }
}

/// Parse a conda environment file and partition its `dependencies`.
///
/// The top level must be a mapping. A missing or empty `dependencies` key
/// yields no packages; any other non-sequence value is rejected rather than
/// partially parsed.
pub fn parse_environment_file(input: &[u8]) -> Result<ParsedManifest, ManifestError> {
    let doc: Value = serde_yaml::from_slice(input)?;
    let Value::Mapping(root) = doc else {
        return Err(ManifestError::NotAMapping);
    };

    let packages = match root.get("dependencies") {
        None | Some(Value::Null) => PartitionedPackages::default(),
        Some(Value::Sequence(entries)) => partition_dependencies(entries),
        Some(_) => return Err(ManifestError::DependenciesNotASequence),
    };

    let name = root
        .get("name")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_owned);

    let channels = match root.get("channels") {
        Some(Value::Sequence(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_owned)
            .collect(),
        _ => Vec::new(),
    };

    Ok(ParsedManifest {
        name,
        channels,
        packages,
    })
}

/// Parse a requirements list: every non-blank line goes to pip unchanged.
pub fn parse_requirements(input: &[u8]) -> Result<ParsedManifest, ManifestError> {
    let text = std::str::from_utf8(input)?;
    let pip_packages = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect();

    Ok(ParsedManifest {
        packages: PartitionedPackages {
            conda_packages: Vec::new(),
            pip_packages,
        },
        ..ParsedManifest::default()
    })
}
