use clap::Args;
use serde::Serialize;

use redeploy::notify::{DeployOutcome, Notifier, NotifyOutcome, TelegramTransport};
use redeploy::revision::{GitRevisionSource, RevisionSource, RevisionSummary};

use super::{CmdResult, GlobalArgs};

#[derive(Args)]
pub struct NotifyArgs {
    /// Instance name shown in the message (defaults to the configured instance)
    #[arg(long)]
    pub instance: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct NotifyOutput {
    pub revision: RevisionSummary,
    pub notification: NotifyOutcome,
}

/// Send the success message for the working copy's current revision.
///
/// Exits 1 unless the message was delivered.
pub fn run(args: NotifyArgs, global: &GlobalArgs) -> CmdResult<NotifyOutput> {
    let settings = global.load_settings()?;
    let instance = args.instance.unwrap_or_else(|| settings.instance.clone());

    let revision = GitRevisionSource.extract(&settings.workdir_path())?;
    let notifier = Notifier::new(TelegramTransport::new(&settings.telegram.api_url));
    let notification = notifier.deliver(
        &settings.notification_target(),
        &revision.escaped(),
        &DeployOutcome { instance },
    );

    let exit_code = if notification.is_sent() { 0 } else { 1 };
    Ok((
        NotifyOutput {
            revision,
            notification,
        },
        exit_code,
    ))
}
