use serde::{Deserialize, Serialize};

/// A package installed in one environment, as reported by `conda list --json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Package {
    pub name: String,
    pub version: String,
    /// `pypi` for packages installed through pip.
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub build_string: String,
}

impl Package {
    pub fn is_pip(&self) -> bool {
        self.channel == "pypi"
    }
}

/// Interpreter, packaging, and runtime-library packages every environment
/// carries. Hidden from the default package listing.
pub const CORE_PACKAGES: &[&str] = &[
    "_libgcc_mutex",
    "_openmp_mutex",
    "bzip2",
    "ca-certificates",
    "certifi",
    "ld_impl_linux-64",
    "libexpat",
    "libffi",
    "libgcc",
    "libgcc-ng",
    "libgomp",
    "libnsl",
    "libsqlite",
    "libstdcxx-ng",
    "libuuid",
    "libxcrypt",
    "libzlib",
    "ncurses",
    "openssl",
    "pip",
    "python",
    "python_abi",
    "readline",
    "setuptools",
    "sqlite",
    "tk",
    "tzdata",
    "wheel",
    "xz",
    "zlib",
];

pub fn is_core_package(name: &str) -> bool {
    CORE_PACKAGES.contains(&name) || name.starts_with("python-")
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PackageFilter {
    /// Hide core packages.
    #[default]
    User,
    All,
}

impl PackageFilter {
    pub fn apply(self, packages: Vec<Package>) -> Vec<Package> {
        match self {
            Self::All => packages,
            Self::User => packages
                .into_iter()
                .filter(|p| !is_core_package(&p.name))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pkg(name: &str) -> Package {
        Package {
            name: name.to_owned(),
            version: "1.0".to_owned(),
            channel: "conda-forge".to_owned(),
            build_string: String::new(),
        }
    }

    #[test]
    fn user_filter_drops_core_and_prefixed_names() {
        let input: Vec<Package> = [
            "numpy",
            "sqlite",
            "openssl",
            "flask",
            "pip",
            "python",
            "python-dateutil",
            "pandas",
            "libffi",
        ]
        .into_iter()
        .map(pkg)
        .collect();

        let names: Vec<String> = PackageFilter::User
            .apply(input)
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["numpy", "flask", "pandas"]);
    }

    #[test]
    fn all_filter_keeps_everything_in_order() {
        let input: Vec<Package> = ["python", "numpy", "pip"].into_iter().map(pkg).collect();
        assert_eq!(PackageFilter::All.apply(input.clone()), input);
    }

    #[test]
    fn every_core_name_is_filtered() {
        for name in CORE_PACKAGES {
            assert!(is_core_package(name), "{name} should be core");
        }
        assert!(!is_core_package("ipython"));
        assert!(!is_core_package("pythonnet"));
    }

    #[test]
    fn decodes_conda_list_entry_with_extra_fields() {
        let json = r#"{
            "base_url": "https://conda.anaconda.org/conda-forge",
            "build_number": 0,
            "build_string": "pyhd8ed1ab_0",
            "channel": "conda-forge",
            "dist_name": "flask-3.0.0-pyhd8ed1ab_0",
            "name": "flask",
            "platform": "noarch",
            "version": "3.0.0"
        }"#;
        let p: Package = serde_json::from_str(json).unwrap();
        assert_eq!(p.name, "flask");
        assert_eq!(p.version, "3.0.0");
        assert_eq!(p.build_string, "pyhd8ed1ab_0");
        assert!(!p.is_pip());
    }

    #[test]
    fn decodes_pip_entry_without_build_string() {
        let json = r#"{"name": "requests", "version": "2.31.0", "channel": "pypi", "build_number": 0}"#;
        let p: Package = serde_json::from_str(json).unwrap();
        assert!(p.is_pip());
        assert!(p.build_string.is_empty());
    }
}
