//! Splitting environment-file dependencies between conda and pip.
//!
//! conda-native entries go to `conda install`, entries nested under a `pip:`
//! key go to `pip install`. The interpreter is never part of a bulk install:
//! its version is fixed when the environment is created.

use serde::Serialize;
use serde_yaml::Value;

/// Key that marks a nested list of pip requirements inside `dependencies`.
pub const PIP_KEY: &str = "pip";

/// Specifiers destined for each installer, in manifest order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PartitionedPackages {
    pub conda_packages: Vec<String>,
    pub pip_packages: Vec<String>,
}

impl PartitionedPackages {
    pub fn total(&self) -> usize {
        self.conda_packages.len() + self.pip_packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Partition a `dependencies` sequence.
///
/// Entries that are neither a string nor a mapping with a `pip` key are
/// skipped; the tool rejects genuinely invalid specifiers later.
pub fn partition_dependencies(entries: &[Value]) -> PartitionedPackages {
    let mut out = PartitionedPackages::default();

    for entry in entries {
        match entry {
            Value::String(spec) => {
                if is_interpreter_spec(spec) {
                    continue;
                }
                out.conda_packages.push(strip_build_string(spec));
            }
            Value::Mapping(map) => {
                if let Some(Value::Sequence(pip)) = map.get(PIP_KEY) {
                    out.pip_packages
                        .extend(pip.iter().filter_map(Value::as_str).map(str::to_owned));
                }
            }
            _ => {}
        }
    }

    out
}

/// True when a conda specifier names the Python interpreter itself
/// (`python`, `python=3.9`, `python 3.9.*`, `python>=3.9`) or one of its variants
/// (`python_abi`, `python-dateutil` style prefixed names).
pub fn is_interpreter_spec(spec: &str) -> bool {
    let lower = spec.trim().to_ascii_lowercase();
    lower == "python"
        || lower.starts_with("python=")
        || lower.starts_with("python ")
        || lower.starts_with("python_abi")
        || lower.starts_with("python-")
        || lower
            .strip_prefix("python")
            .is_some_and(|rest| rest.starts_with(['<', '>', '!', '~']))
}

/// Reduce `name=version=build` to `name=version`.
///
/// Specifiers without `=` pass through unchanged, as do pip-style exact pins
/// (`name==version`), which would otherwise lose their version.
pub fn strip_build_string(spec: &str) -> String {
    if spec.contains("==") {
        return spec.to_owned();
    }
    let mut fields = spec.splitn(3, '=');
    match (fields.next(), fields.next()) {
        (Some(name), Some(version)) => format!("{name}={version}"),
        _ => spec.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq(yaml: &str) -> Vec<Value> {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn partitions_in_source_order() {
        let entries = seq(
            r"
- zlib=1.2.13=h5eee18b_0
- pip:
  - flask
  - gunicorn
- numpy
- pip:
  - requests
",
        );
        let out = partition_dependencies(&entries);
        assert_eq!(out.conda_packages, vec!["zlib=1.2.13", "numpy"]);
        assert_eq!(out.pip_packages, vec!["flask", "gunicorn", "requests"]);
        assert_eq!(out.total(), 5);
    }

    #[test]
    fn excludes_every_interpreter_form() {
        let entries = seq(
            r"
- python
- python=3.11.4=hab00c5b_0_cpython
- Python 3.9.*
- python_abi=3.11=4_cp311
- python-tzdata=2023.3
- PYTHON=3.10
- scipy
",
        );
        let out = partition_dependencies(&entries);
        assert_eq!(out.conda_packages, vec!["scipy"]);
    }

    #[test]
    fn excludes_interpreter_range_pins() {
        for spec in ["python>=3.9", "python<3.12", "Python~=3.11", "python!=3.10.0", "python >=3.9"] {
            assert!(is_interpreter_spec(spec), "{spec} should be excluded");
        }
        let entries = seq("- python>=3.9\n- numpy\n- python<3.12\n");
        assert_eq!(partition_dependencies(&entries).conda_packages, vec!["numpy"]);
    }

    #[test]
    fn interpreter_match_is_not_a_substring_match() {
        assert!(!is_interpreter_spec("ipython"));
        assert!(!is_interpreter_spec("pythonnet"));
        assert!(!is_interpreter_spec("cpython"));
        assert!(is_interpreter_spec("python"));
    }

    #[test]
    fn skips_unrecognized_entries() {
        let entries = seq(
            r"
- 42
- null
- [nested, list]
- other: [x]
- pip: not-a-list
- pandas
",
        );
        let out = partition_dependencies(&entries);
        assert_eq!(out.conda_packages, vec!["pandas"]);
        assert!(out.pip_packages.is_empty());
    }

    #[test]
    fn pip_list_skips_non_strings() {
        let entries = seq("- pip: [flask, 3, {a: b}, click]\n");
        let out = partition_dependencies(&entries);
        assert_eq!(out.pip_packages, vec!["flask", "click"]);
    }

    #[test]
    fn strip_build_string_truncates_to_name_and_version() {
        assert_eq!(strip_build_string("numpy=1.2=0"), "numpy=1.2");
        assert_eq!(strip_build_string("numpy=1.2"), "numpy=1.2");
        assert_eq!(strip_build_string("a=b=c=d"), "a=b");
    }

    #[test]
    fn specifiers_without_equals_are_unchanged() {
        for spec in ["numpy", "scipy>=1.10", "conda-forge::pandas", "r-base 4.2.*"] {
            assert_eq!(strip_build_string(spec), spec);
            assert_eq!(strip_build_string(&strip_build_string(spec)), spec);
        }
    }

    #[test]
    fn exact_pins_are_unchanged() {
        assert_eq!(strip_build_string("requests==2.31.0"), "requests==2.31.0");
    }
}
