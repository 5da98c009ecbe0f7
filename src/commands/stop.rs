use clap::Args;
use serde::Serialize;

use redeploy::supervisor::{ProcessSupervisor, StopOutcome, Supervisor};

use super::{CmdResult, GlobalArgs};

#[derive(Args)]
pub struct StopArgs {
    /// Instance to stop (defaults to the configured instance)
    #[arg(long)]
    pub instance: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StopOutput {
    pub instance: String,
    pub outcome: StopOutcome,
}

pub fn run(args: StopArgs, global: &GlobalArgs) -> CmdResult<StopOutput> {
    let settings = global.load_settings()?;
    let instance = args.instance.unwrap_or_else(|| settings.instance.clone());

    let mut supervisor = ProcessSupervisor::new(settings.state_dir_path()?, settings.stop_timeout());
    let outcome = supervisor.stop(&instance)?;

    Ok((StopOutput { instance, outcome }, 0))
}
