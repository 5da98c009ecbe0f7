//! Command execution primitives with consistent error handling.

use std::path::Path;
use std::process::{Command, Output};

use serde::Serialize;

use crate::error::{CommandFailedDetails, Error, Result};

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
    pub exit_code: i32,
}

impl CommandOutput {
    fn from_output(output: &Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            success: output.status.success(),
            exit_code: output.status.code().unwrap_or(-1),
        }
    }

    /// Package this output as error details for `command`.
    pub fn into_failure(self, command: impl Into<String>) -> CommandFailedDetails {
        CommandFailedDetails {
            command: command.into(),
            exit_code: self.exit_code,
            stdout: self.stdout.trim().to_string(),
            stderr: self.stderr.trim().to_string(),
        }
    }
}

/// Run a program in a directory and capture everything, never failing.
///
/// Spawn errors are reported as a failed output with exit code -1.
pub fn capture_in(dir: &Path, program: &str, args: &[&str]) -> CommandOutput {
    let output = Command::new(program).args(args).current_dir(dir).output();
    match output {
        Ok(out) => CommandOutput::from_output(&out),
        Err(e) => CommandOutput {
            stdout: String::new(),
            stderr: format!("Command error: {}", e),
            success: false,
            exit_code: -1,
        },
    }
}

/// Run a shell command line (`sh -c`) in a directory and capture its output.
pub fn shell_in(dir: &Path, command: &str) -> CommandOutput {
    #[cfg(windows)]
    {
        capture_in(dir, "cmd", &["/C", command])
    }

    #[cfg(not(windows))]
    {
        capture_in(dir, "sh", &["-c", command])
    }
}

/// Run a command in a specific directory.
///
/// Returns trimmed stdout if the command succeeds.
/// Returns an error with stderr (or stdout fallback) if it fails.
pub fn run_in(dir: &Path, program: &str, args: &[&str], context: &str) -> Result<String> {
    let output = Command::new(program)
        .args(args)
        .current_dir(dir)
        .output()
        .map_err(|e| {
            Error::internal_io(
                format!("Failed to run {}: {}", context, e),
                Some(context.to_string()),
            )
        })?;

    if !output.status.success() {
        return Err(Error::internal_io(
            format!("{} failed: {}", context, error_text(&output)),
            Some(context.to_string()),
        ));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Run a command in a directory, returning None on failure or empty output.
pub fn run_in_optional(dir: &Path, program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program)
        .args(args)
        .current_dir(dir)
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if stdout.is_empty() {
        None
    } else {
        Some(stdout)
    }
}

/// Extract error text from command output.
///
/// Prefers stderr, falls back to stdout if stderr is empty.
pub fn error_text(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        stderr.trim().to_string()
    } else {
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp() -> &'static Path {
        Path::new("/tmp")
    }

    #[test]
    fn run_in_returns_trimmed_stdout() {
        let result = run_in(tmp(), "echo", &["hello"], "echo test");
        assert_eq!(result.unwrap(), "hello");
    }

    #[test]
    fn run_in_fails_with_invalid_command() {
        let result = run_in(tmp(), "nonexistent_command_xyz", &[], "test");
        assert!(result.is_err());
    }

    #[test]
    fn run_in_optional_returns_none_on_failure() {
        assert!(run_in_optional(tmp(), "false", &[]).is_none());
    }

    #[test]
    fn shell_in_captures_exit_code_and_stderr() {
        let out = shell_in(tmp(), "echo oops >&2; exit 3");
        assert!(!out.success);
        assert_eq!(out.exit_code, 3);
        assert_eq!(out.stderr.trim(), "oops");
    }

    #[test]
    fn capture_in_reports_spawn_errors() {
        let out = capture_in(tmp(), "nonexistent_command_xyz", &[]);
        assert!(!out.success);
        assert_eq!(out.exit_code, -1);
        assert!(out.stderr.starts_with("Command error"));
    }

    #[test]
    fn into_failure_trims_streams() {
        let out = CommandOutput {
            stdout: "  done\n".to_string(),
            stderr: "\nbad\n".to_string(),
            success: false,
            exit_code: 2,
        };
        let details = out.into_failure("npm ci");
        assert_eq!(details.command, "npm ci");
        assert_eq!(details.stdout, "done");
        assert_eq!(details.stderr, "bad");
        assert_eq!(details.exit_code, 2);
    }

    #[test]
    fn error_text_prefers_stderr() {
        let output = Output {
            status: std::process::ExitStatus::default(),
            stdout: b"stdout content".to_vec(),
            stderr: b"stderr content".to_vec(),
        };
        assert_eq!(error_text(&output), "stderr content");
    }
}
