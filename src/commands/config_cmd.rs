use clap::{Args, Subcommand};
use serde::Serialize;

use redeploy::config::Settings;

use super::{CmdResult, GlobalArgs};

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommand,
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Display resolved settings (defaults + file + environment), token masked
    Show,
    /// Show which settings file was loaded, if any
    Path,
}

#[derive(Debug, Serialize)]
pub struct ConfigOutput {
    command: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    settings: Option<Settings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    missing: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<String>,
}

pub fn run(args: ConfigArgs, global: &GlobalArgs) -> CmdResult<ConfigOutput> {
    let settings = global.load_settings()?;

    match args.command {
        ConfigCommand::Show => Ok((
            ConfigOutput {
                command: "config.show",
                missing: Some(settings.missing_for_run()),
                settings: Some(settings.redacted()),
                path: None,
            },
            0,
        )),
        ConfigCommand::Path => Ok((
            ConfigOutput {
                command: "config.path",
                settings: None,
                missing: None,
                path: settings.source,
            },
            0,
        )),
    }
}
