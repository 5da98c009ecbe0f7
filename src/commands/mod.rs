use clap::Args;
use std::path::PathBuf;

use redeploy::config::{self, LoadOptions, Settings};

pub type CmdResult<T> = redeploy::Result<(T, i32)>;

/// Flags accepted by every subcommand.
#[derive(Args, Debug, Default)]
pub struct GlobalArgs {
    /// Settings file (JSON). Defaults to <workdir>/redeploy.json when present
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Working copy to deploy
    #[arg(long, global = true, value_name = "DIR")]
    pub workdir: Option<PathBuf>,

    /// Print progress to stderr even when it is not a terminal
    #[arg(long, short = 'v', global = true, env = "REDEPLOY_VERBOSE")]
    pub verbose: bool,
}

impl GlobalArgs {
    pub fn load_settings(&self) -> redeploy::Result<Settings> {
        config::load(&LoadOptions {
            config_path: self.config.clone(),
            workdir: self.workdir.clone(),
        })
    }
}

pub mod config_cmd;
pub mod notify;
pub mod run;
pub mod status;
pub mod stop;

/// Dispatch a command to its handler and map result to JSON.
macro_rules! dispatch {
    ($args:expr, $global:expr, $module:ident) => {
        crate::output::map_cmd_result_to_json($module::run($args, $global))
    };
}

pub(crate) fn run_json(
    command: crate::Commands,
    global: &GlobalArgs,
) -> (redeploy::Result<serde_json::Value>, i32) {
    match command {
        crate::Commands::Run(args) => dispatch!(args, global, run),
        crate::Commands::Status(args) => dispatch!(args, global, status),
        crate::Commands::Stop(args) => dispatch!(args, global, stop),
        crate::Commands::Notify(args) => dispatch!(args, global, notify),
        crate::Commands::Config(args) => dispatch!(args, global, config_cmd),
    }
}
