use clap::{Parser, Subcommand};

mod commands;
mod output;

use commands::{config_cmd, notify, run, status, stop, GlobalArgs};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "redeploy")]
#[command(version = VERSION)]
#[command(about = "Pull, install, restart and announce a long-running application")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the branch, install dependencies, restart the instance and notify
    Run(run::RunArgs),
    /// Show whether the supervised instance is running
    Status(status::StatusArgs),
    /// Stop the supervised instance
    Stop(stop::StopArgs),
    /// Send the deployment message for the current revision
    Notify(notify::NotifyArgs),
    /// Inspect resolved settings
    Config(config_cmd::ConfigArgs),
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    redeploy::set_verbose(cli.global.verbose);

    let (json_result, exit_code) = commands::run_json(cli.command, &cli.global);
    if let Err(err) = output::print_json_result(json_result) {
        eprintln!("{}", err);
        return std::process::ExitCode::from(1);
    }

    std::process::ExitCode::from(exit_code_to_u8(exit_code))
}

fn exit_code_to_u8(code: i32) -> u8 {
    if code <= 0 {
        0
    } else if code >= 255 {
        255
    } else {
        code as u8
    }
}
