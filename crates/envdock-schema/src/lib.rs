//! Manifest parsing, dependency partitioning, and package records for envdock.
//!
//! This crate defines the schema layer: uploaded manifest formats
//! (`ManifestFormat`), conda environment-file and requirements-list parsing
//! (`parse_manifest`), the conda/pip split of an environment file's
//! dependencies (`PartitionedPackages`), and the `Package` record with the
//! core-package filter used by package listings.

pub mod manifest;
pub mod package;
pub mod partition;

pub use manifest::{
    parse_environment_file, parse_manifest, parse_requirements, ManifestError, ManifestFormat,
    ParsedManifest,
};
pub use package::{is_core_package, Package, PackageFilter, CORE_PACKAGES};
pub use partition::{
    is_interpreter_spec, partition_dependencies, strip_build_string, PartitionedPackages, PIP_KEY,
};
