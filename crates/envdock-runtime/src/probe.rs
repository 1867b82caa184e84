//! Best-effort facts about an environment prefix.
//!
//! These read the filesystem or run the environment's own interpreter rather
//! than going through the package manager, which is much slower. Callers
//! decide what a failure means; nothing here logs or substitutes defaults.

use crate::RuntimeError;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Human-readable disk usage as reported by `du -sh`.
pub fn disk_usage(path: &Path) -> Result<String, RuntimeError> {
    let output = Command::new("du").arg("-sh").arg(path).output()?;
    let command = format!("du -sh {}", path.display());
    if !output.status.success() {
        return Err(RuntimeError::ToolFailed {
            command,
            exit_code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim_end().to_owned(),
        });
    }
    String::from_utf8_lossy(&output.stdout)
        .split_whitespace()
        .next()
        .map(str::to_owned)
        .ok_or_else(|| RuntimeError::InvalidOutput {
            command,
            reason: "empty output".to_owned(),
        })
}

/// Modification time of the prefix directory, local time, minute precision.
pub fn last_modified(path: &Path) -> Result<String, RuntimeError> {
    let modified = std::fs::metadata(path)?.modified()?;
    let local: chrono::DateTime<chrono::Local> = modified.into();
    Ok(local.format("%Y-%m-%d %H:%M").to_string())
}

/// Interpreter version of the environment, from `<prefix>/bin/python --version`.
pub fn interpreter_version(prefix: &Path, timeout: Duration) -> Result<String, RuntimeError> {
    let python = prefix.join("bin").join("python");
    if !python.exists() {
        return Err(RuntimeError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("interpreter not found at {}", python.display()),
        )));
    }

    let mut cmd = Command::new(&python);
    cmd.arg("--version");
    let command = format!("{} --version", python.display());
    let output = output_with_timeout(&mut cmd, timeout, &command)?;
    if !output.status.success() {
        return Err(RuntimeError::ToolFailed {
            command,
            exit_code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim_end().to_owned(),
        });
    }

    parse_python_version(
        &String::from_utf8_lossy(&output.stdout),
        &String::from_utf8_lossy(&output.stderr),
    )
    .ok_or_else(|| RuntimeError::InvalidOutput {
        command,
        reason: "no version string".to_owned(),
    })
}

/// Extract `3.11.4` from `Python 3.11.4`. Python 2 printed to stderr.
pub fn parse_python_version(stdout: &str, stderr: &str) -> Option<String> {
    let text = if stdout.trim().is_empty() {
        stderr.trim()
    } else {
        stdout.trim()
    };
    text.strip_prefix("Python ")
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}

/// Run `cmd` to completion, killing it if it outlives `timeout`.
///
/// Output is collected after exit, so this is only suitable for commands
/// that print little, such as version probes.
pub fn output_with_timeout(
    cmd: &mut Command,
    timeout: Duration,
    command: &str,
) -> Result<Output, RuntimeError> {
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let deadline = Instant::now() + timeout;
    loop {
        if child.try_wait()?.is_some() {
            return Ok(child.wait_with_output()?);
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(RuntimeError::Timeout {
                command: command.to_owned(),
                secs: timeout.as_secs(),
            });
        }
        thread::sleep(POLL_INTERVAL);
    }
}
