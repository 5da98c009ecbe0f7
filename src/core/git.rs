//! Git-backed revision fetcher.
//!
//! Brings a working copy to the latest revision of the tracked branch:
//! `git fetch <remote> <branch>`, `git checkout <branch>`, then either a
//! fast-forward merge or a hard reset onto `<remote>/<branch>`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::pipeline::RevisionFetcher;
use crate::utils::command;

/// How the working copy is moved onto the fetched branch head.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Fast-forward only; diverged local history fails the fetch.
    #[default]
    Pull,
    /// Discard local commits and changes.
    Reset,
}

impl FromStr for SyncMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pull" => Ok(SyncMode::Pull),
            "reset" => Ok(SyncMode::Reset),
            other => Err(Error::config_invalid_value(
                "sync",
                Some(other.to_string()),
                "expected 'pull' or 'reset'",
            )),
        }
    }
}

/// Result of a successful fetch.
#[derive(Debug, Clone, Serialize)]
pub struct FetchOutcome {
    pub branch: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_head: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub head: Option<String>,
}

impl FetchOutcome {
    pub fn changed(&self) -> bool {
        self.previous_head != self.head
    }
}

#[derive(Debug, Clone)]
pub struct GitFetcher {
    pub repo: PathBuf,
    pub remote: String,
    pub branch: String,
    pub mode: SyncMode,
}

impl GitFetcher {
    pub fn new(
        repo: impl Into<PathBuf>,
        remote: impl Into<String>,
        branch: impl Into<String>,
        mode: SyncMode,
    ) -> Self {
        Self {
            repo: repo.into(),
            remote: remote.into(),
            branch: branch.into(),
            mode,
        }
    }

    fn git(&self, args: &[&str]) -> Result<()> {
        let output = command::capture_in(&self.repo, "git", args);
        if output.success {
            Ok(())
        } else {
            Err(Error::fetch_failed(
                output.into_failure(format!("git {}", args.join(" "))),
            ))
        }
    }
}

impl RevisionFetcher for GitFetcher {
    fn fetch(&self) -> Result<FetchOutcome> {
        let previous_head = head_revision(&self.repo);
        let upstream = format!("{}/{}", self.remote, self.branch);

        log_status!("fetch", "Fetching {} from {}", self.branch, self.remote);
        self.git(&["fetch", &self.remote, &self.branch])?;
        self.git(&["checkout", &self.branch])?;

        match self.mode {
            SyncMode::Pull => self.git(&["merge", "--ff-only", &upstream])?,
            SyncMode::Reset => self.git(&["reset", "--hard", &upstream])?,
        }

        let outcome = FetchOutcome {
            branch: self.branch.clone(),
            previous_head,
            head: head_revision(&self.repo),
        };

        if outcome.changed() {
            log_status!(
                "fetch",
                "{} moved {} -> {}",
                self.branch,
                outcome.previous_head.as_deref().unwrap_or("(none)"),
                outcome.head.as_deref().unwrap_or("(none)")
            );
        } else {
            log_status!("fetch", "{} already up to date", self.branch);
        }

        Ok(outcome)
    }
}

/// Abbreviated hash of HEAD, or None outside a repository or before the first commit.
pub fn head_revision(repo: &Path) -> Option<String> {
    command::run_in_optional(repo, "git", &["rev-parse", "--short", "HEAD"])
}

/// Current branch name; `HEAD` when detached.
pub fn current_branch(repo: &Path) -> Result<String> {
    command::run_in(
        repo,
        "git",
        &["rev-parse", "--abbrev-ref", "HEAD"],
        "git rev-parse",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::process::Command;

    fn git(dir: &Path, args: &[&str]) {
        let status = Command::new("git")
            .args(["-c", "user.name=Test", "-c", "user.email=test@example.com"])
            .args(args)
            .current_dir(dir)
            .output()
            .unwrap();
        assert!(status.status.success(), "git {:?} failed", args);
    }

    fn commit(dir: &Path, file: &str, message: &str) {
        fs::write(dir.join(file), message).unwrap();
        git(dir, &["add", "."]);
        git(dir, &["commit", "-q", "-m", message]);
    }

    /// Bare-ish upstream plus a clone tracking `main`.
    fn upstream_and_clone() -> (tempfile::TempDir, PathBuf, PathBuf) {
        let root = tempfile::tempdir().unwrap();
        let upstream = root.path().join("upstream");
        let clone = root.path().join("clone");
        fs::create_dir(&upstream).unwrap();

        git(&upstream, &["init", "-q", "-b", "main"]);
        commit(&upstream, "a.txt", "first");
        git(
            root.path(),
            &["clone", "-q", upstream.to_str().unwrap(), clone.to_str().unwrap()],
        );
        (root, upstream, clone)
    }

    #[test]
    fn sync_mode_parses_case_insensitively() {
        assert_eq!("Reset".parse::<SyncMode>().unwrap(), SyncMode::Reset);
        assert_eq!("pull".parse::<SyncMode>().unwrap(), SyncMode::Pull);
        assert!("rebase".parse::<SyncMode>().is_err());
    }

    #[test]
    fn fetch_fast_forwards_to_upstream() {
        let (_root, upstream, clone) = upstream_and_clone();
        commit(&upstream, "b.txt", "second");

        let fetcher = GitFetcher::new(&clone, "origin", "main", SyncMode::Pull);
        let outcome = fetcher.fetch().unwrap();

        assert!(outcome.changed());
        assert_eq!(outcome.head, head_revision(&upstream));
        assert!(clone.join("b.txt").exists());
    }

    #[test]
    fn fetch_without_new_commits_is_unchanged() {
        let (_root, _upstream, clone) = upstream_and_clone();
        let fetcher = GitFetcher::new(&clone, "origin", "main", SyncMode::Pull);
        assert!(!fetcher.fetch().unwrap().changed());
    }

    #[test]
    fn unknown_branch_is_a_fetch_error() {
        let (_root, _upstream, clone) = upstream_and_clone();
        let fetcher = GitFetcher::new(&clone, "origin", "no-such-branch", SyncMode::Pull);
        let err = fetcher.fetch().unwrap_err();
        assert_eq!(err.code.as_str(), "deploy.fetch_failed");
        assert!(err.message.starts_with("git fetch origin no-such-branch failed"));
    }

    #[test]
    fn reset_discards_local_commits() {
        let (_root, upstream, clone) = upstream_and_clone();
        commit(&clone, "local.txt", "local only");
        commit(&upstream, "b.txt", "second");

        let fetcher = GitFetcher::new(&clone, "origin", "main", SyncMode::Reset);
        let outcome = fetcher.fetch().unwrap();

        assert_eq!(outcome.head, head_revision(&upstream));
        assert!(!clone.join("local.txt").exists());
    }

    #[test]
    fn current_branch_reports_checked_out_branch() {
        let (_root, _upstream, clone) = upstream_and_clone();
        assert_eq!(current_branch(&clone).unwrap(), "main");
    }
}
