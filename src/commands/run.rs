use clap::Args;

use redeploy::git::GitFetcher;
use redeploy::install::ShellInstaller;
use redeploy::notify::{Notifier, TelegramTransport};
use redeploy::pipeline::{self, Collaborators, DeployPlan, DeployReport};
use redeploy::revision::GitRevisionSource;
use redeploy::supervisor::{self, ProcessSupervisor};

use super::{CmdResult, GlobalArgs};

#[derive(Args)]
pub struct RunArgs {
    /// Branch to deploy (overrides REDEPLOY_BRANCH)
    #[arg(long)]
    pub branch: Option<String>,

    /// Supervised instance name (overrides REDEPLOY_INSTANCE)
    #[arg(long)]
    pub instance: Option<String>,

    /// Seconds to wait after start before checking the instance
    #[arg(long, value_name = "SECS")]
    pub grace_secs: Option<u64>,

    /// Deploy without sending the success notification
    #[arg(long)]
    pub no_notify: bool,
}

pub fn run(args: RunArgs, global: &GlobalArgs) -> CmdResult<DeployReport> {
    let mut settings = global.load_settings()?;
    if let Some(branch) = args.branch {
        settings.branch = branch;
    }
    if let Some(instance) = args.instance {
        settings.instance = instance;
    }
    if let Some(grace) = args.grace_secs {
        settings.grace_secs = grace;
    }

    supervisor::validate_name(&settings.instance)?;

    let repo = settings.workdir_path();
    let plan = DeployPlan {
        instance: settings.instance.clone(),
        repo: repo.clone(),
        launch: settings.launch_spec()?,
        verify: settings.verify_policy(),
        target: settings.notification_target(),
        notify: !args.no_notify,
    };

    let fetcher = GitFetcher::new(&repo, &settings.remote, &settings.branch, settings.sync);
    let installer = ShellInstaller::new(settings.install_command.clone(), &repo);
    let mut supervisor = ProcessSupervisor::new(settings.state_dir_path()?, settings.stop_timeout());
    let notifier = Notifier::new(TelegramTransport::new(&settings.telegram.api_url));

    redeploy::log_status!(
        "deploy",
        "Deploying {}/{} to '{}'",
        settings.remote,
        settings.branch,
        plan.instance
    );

    let report = pipeline::run(
        &plan,
        Collaborators {
            fetcher: &fetcher,
            installer: &installer,
            supervisor: &mut supervisor,
            revisions: &GitRevisionSource,
            notifier: &notifier,
        },
    )?;

    Ok((report, 0))
}
