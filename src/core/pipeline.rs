//! Deployment orchestration.
//!
//! fetch → install → stop → start → verify, then (best effort) extract
//! revision metadata and notify. Any failure up to and including verify aborts
//! the run; nothing after verify can fail it.

use serde::Serialize;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::git::FetchOutcome;
use crate::install::InstallOutcome;
use crate::notify::{DeployOutcome, NotificationTarget, Notifier, NotifyOutcome, Transport};
use crate::revision::{RevisionSource, RevisionSummary};
use crate::supervisor::{InstanceRecord, LaunchSpec, StopOutcome, Supervisor};

/// Brings the working copy to the latest revision of the tracked branch.
pub trait RevisionFetcher {
    fn fetch(&self) -> Result<FetchOutcome>;
}

/// Makes the application's declared dependencies available.
pub trait DependencyInstaller {
    fn install(&self) -> Result<InstallOutcome>;
}

/// Post-start liveness policy.
///
/// After `grace`, the instance must be alive at each of `attempts` checks
/// spaced `interval` apart.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VerifyPolicy {
    pub grace: Duration,
    pub attempts: u32,
    pub interval: Duration,
}

/// Everything fixed for one deployment run.
#[derive(Debug, Clone)]
pub struct DeployPlan {
    pub instance: String,
    pub repo: PathBuf,
    pub launch: LaunchSpec,
    pub verify: VerifyPolicy,
    pub target: NotificationTarget,
    pub notify: bool,
}

/// Collaborators the pipeline drives.
pub struct Collaborators<'a, T: Transport> {
    pub fetcher: &'a dyn RevisionFetcher,
    pub installer: &'a dyn DependencyInstaller,
    pub supervisor: &'a mut dyn Supervisor,
    pub revisions: &'a dyn RevisionSource,
    pub notifier: &'a Notifier<T>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeployReport {
    pub instance: String,
    pub fetch: FetchOutcome,
    pub install: InstallOutcome,
    pub stopped: StopOutcome,
    pub started: InstanceRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision: Option<RevisionSummary>,
    pub notification: NotifyOutcome,
}

/// Run one deployment.
///
/// Returns `Err` only for fatal failures (fetch, install, launch, already
/// running, verification). Metadata and notification problems are reported
/// in [`DeployReport::notification`].
pub fn run<T: Transport>(plan: &DeployPlan, steps: Collaborators<'_, T>) -> Result<DeployReport> {
    let Collaborators {
        fetcher,
        installer,
        supervisor,
        revisions,
        notifier,
    } = steps;

    let fetch = fetcher.fetch().map_err(|e| step_failed("fetch", e))?;
    let install = installer.install().map_err(|e| step_failed("install", e))?;

    let stopped = supervisor
        .stop(&plan.instance)
        .map_err(|e| step_failed("stop", e))?;
    let started = supervisor
        .start(&plan.instance, &plan.launch)
        .map_err(|e| step_failed("start", e))?;

    verify(supervisor, &started, &plan.verify).map_err(|e| step_failed("verify", e))?;
    log_status!(
        "deploy",
        "'{}' is live (pid {})",
        started.name,
        started.pid
    );

    let (revision, notification) = announce(plan, &started, revisions, notifier);

    Ok(DeployReport {
        instance: plan.instance.clone(),
        fetch,
        install,
        stopped,
        started,
        revision,
        notification,
    })
}

/// Wait out the grace period, then require the instance to be alive.
pub fn verify(
    supervisor: &mut dyn Supervisor,
    record: &InstanceRecord,
    policy: &VerifyPolicy,
) -> Result<()> {
    log_status!(
        "verify",
        "Waiting {}s before checking '{}'",
        policy.grace.as_secs_f32(),
        record.name
    );
    thread::sleep(policy.grace);

    let attempts = policy.attempts.max(1);
    for attempt in 1..=attempts {
        if !supervisor.is_running(&record.name)? {
            return Err(Error::verification_timeout(
                &record.name,
                record.pid,
                Some(record.log_path.clone()),
            ));
        }
        if attempt < attempts {
            thread::sleep(policy.interval);
        }
    }
    Ok(())
}

fn announce<T: Transport>(
    plan: &DeployPlan,
    started: &InstanceRecord,
    revisions: &dyn RevisionSource,
    notifier: &Notifier<T>,
) -> (Option<RevisionSummary>, NotifyOutcome) {
    if !plan.notify {
        return (None, NotifyOutcome::skipped("notifications disabled for this run"));
    }

    let summary = match revisions.extract(&plan.repo) {
        Ok(summary) => summary,
        Err(err) => {
            log_status!("notify", "{}; skipping notification", err.message);
            return (None, NotifyOutcome::skipped(err.message));
        }
    };

    let outcome = DeployOutcome {
        instance: started.name.clone(),
    };
    let notification = notifier.deliver(&plan.target, &summary.escaped(), &outcome);
    (Some(summary), notification)
}

fn step_failed(step: &str, err: Error) -> Error {
    log_status!("deploy", "{} failed: {}", step, err.message);
    err
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FlakySupervisor {
        answers: Vec<bool>,
        checks: usize,
    }

    impl Supervisor for FlakySupervisor {
        fn stop(&mut self, _name: &str) -> Result<StopOutcome> {
            Ok(StopOutcome::NotRunning)
        }

        fn start(&mut self, _name: &str, _spec: &LaunchSpec) -> Result<InstanceRecord> {
            unreachable!("verify never starts instances")
        }

        fn is_running(&mut self, _name: &str) -> Result<bool> {
            let answer = self.answers.get(self.checks).copied().unwrap_or(false);
            self.checks += 1;
            Ok(answer)
        }
    }

    fn record() -> InstanceRecord {
        InstanceRecord {
            name: "app".to_string(),
            pid: 99,
            command: "./server".to_string(),
            working_dir: "/srv/app".to_string(),
            log_path: "/tmp/app.log".to_string(),
            started_at: "2026-01-01T00:00:00+00:00".to_string(),
            boot_id: None,
            start_ticks: None,
        }
    }

    fn policy(attempts: u32) -> VerifyPolicy {
        VerifyPolicy {
            grace: Duration::ZERO,
            attempts,
            interval: Duration::ZERO,
        }
    }

    #[test]
    fn single_check_passes_when_alive() {
        let mut sup = FlakySupervisor {
            answers: vec![true],
            checks: 0,
        };
        verify(&mut sup, &record(), &policy(1)).unwrap();
        assert_eq!(sup.checks, 1);
    }

    #[test]
    fn dead_instance_fails_verification() {
        let mut sup = FlakySupervisor {
            answers: vec![false],
            checks: 0,
        };
        let err = verify(&mut sup, &record(), &policy(1)).unwrap_err();

        assert_eq!(err.code.as_str(), "supervisor.verification_timeout");
        assert_eq!(err.details["logPath"], "/tmp/app.log");
    }

    #[test]
    fn every_check_must_see_the_instance() {
        let mut sup = FlakySupervisor {
            answers: vec![true, true, false],
            checks: 0,
        };
        assert!(verify(&mut sup, &record(), &policy(3)).is_err());
        assert_eq!(sup.checks, 3);
    }

    #[test]
    fn zero_attempts_still_checks_once() {
        let mut sup = FlakySupervisor {
            answers: vec![true],
            checks: 0,
        };
        verify(&mut sup, &record(), &policy(0)).unwrap();
        assert_eq!(sup.checks, 1);
    }
}
