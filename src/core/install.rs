//! Dependency installation via a configured shell command.

use std::path::PathBuf;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::pipeline::DependencyInstaller;
use crate::utils::command;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum InstallOutcome {
    Installed { command: String },
    Skipped,
}

/// Runs e.g. `pip install -r requirements.txt` in the working copy.
///
/// With no command configured the step is a successful no-op.
#[derive(Debug, Clone)]
pub struct ShellInstaller {
    pub command: Option<String>,
    pub working_dir: PathBuf,
}

impl ShellInstaller {
    pub fn new(command: Option<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            command: command.filter(|c| !c.trim().is_empty()),
            working_dir: working_dir.into(),
        }
    }
}

impl DependencyInstaller for ShellInstaller {
    fn install(&self) -> Result<InstallOutcome> {
        let Some(ref cmd) = self.command else {
            log_status!("install", "No install command configured, skipping");
            return Ok(InstallOutcome::Skipped);
        };

        log_status!("install", "Running: {}", cmd);
        let output = command::shell_in(&self.working_dir, cmd);
        if !output.success {
            return Err(Error::install_failed(output.into_failure(cmd.clone())));
        }

        Ok(InstallOutcome::Installed {
            command: cmd.clone(),
        })
    }
}
