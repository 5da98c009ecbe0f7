use clap::Args;

use redeploy::supervisor::{InstanceStatus, ProcessSupervisor};

use super::{CmdResult, GlobalArgs};

#[derive(Args)]
pub struct StatusArgs {
    /// Instance to inspect (defaults to the configured instance)
    #[arg(long)]
    pub instance: Option<String>,
}

/// Exit code is 0 when the instance is running and 1 otherwise.
pub fn run(args: StatusArgs, global: &GlobalArgs) -> CmdResult<InstanceStatus> {
    let settings = global.load_settings()?;
    let name = args.instance.unwrap_or_else(|| settings.instance.clone());

    let mut supervisor = ProcessSupervisor::new(settings.state_dir_path()?, settings.stop_timeout());
    let status = supervisor.status(&name)?;
    let exit_code = if status.running { 0 } else { 1 };

    Ok((status, exit_code))
}
