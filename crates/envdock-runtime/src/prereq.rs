use std::fmt;
use std::path::Path;
use std::process::Command;

/// A missing prerequisite with actionable install instructions.
#[derive(Debug)]
pub struct MissingPrereq {
    pub name: String,
    pub purpose: &'static str,
    pub install_hint: &'static str,
}

impl fmt::Display for MissingPrereq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  - {}: {} (install: {})",
            self.name, self.purpose, self.install_hint
        )
    }
}

fn command_exists(name: &str) -> bool {
    Command::new("which")
        .arg(name)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn tool_exists(tool: &Path) -> bool {
    if tool.components().count() > 1 {
        tool.is_file()
    } else {
        command_exists(&tool.to_string_lossy())
    }
}

/// Check everything the conda backend shells out to.
/// Empty list means all prerequisites are met.
pub fn check_tool_prereqs(tool: &Path) -> Vec<MissingPrereq> {
    let mut missing = Vec::new();

    if !tool_exists(tool) {
        missing.push(MissingPrereq {
            name: tool.display().to_string(),
            purpose: "environment and package management",
            install_hint: "install Miniforge or Miniconda, or pass --tool with the full path to conda",
        });
    }

    if !command_exists("du") {
        missing.push(MissingPrereq {
            name: "du".to_owned(),
            purpose: "environment size reporting",
            install_hint: "part of coreutils (usually pre-installed)",
        });
    }

    missing
}

/// Format a list of missing prerequisites into a user-friendly message.
pub fn format_missing(missing: &[MissingPrereq]) -> String {
    use fmt::Write as _;
    let mut msg = String::from("missing prerequisites:\n");
    for m in missing {
        let _ = writeln!(msg, "{m}");
    }
    msg.push_str("\nenvdock needs these tools to manage environments.");
    msg
}
