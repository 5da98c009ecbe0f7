//! Revision metadata for deployment notifications.

use serde::Serialize;
use std::path::Path;

use crate::error::{Error, Result};
use crate::git;
use crate::utils::command;

// ASCII unit separator; cannot appear in commit subjects or author names.
const FIELD_SEP: char = '\u{1f}';
const LOG_FORMAT: &str = "--format=%s%x1f%h%x1f%an%x1f%ar";

/// Facts about the most recent commit, exactly as git reports them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RevisionSummary {
    pub subject: String,
    pub short_hash: String,
    pub author: String,
    pub relative_time: String,
    pub branch: String,
}

/// Markup-safe copy of a [`RevisionSummary`]. Only this form is ever sent.
#[derive(Debug, Clone, PartialEq)]
pub struct EscapedSummary {
    pub subject: String,
    pub short_hash: String,
    pub author: String,
    pub relative_time: String,
    pub branch: String,
}

impl RevisionSummary {
    /// Escape the author-controlled fields; hash and relative time pass through.
    pub fn escaped(&self) -> EscapedSummary {
        EscapedSummary {
            subject: escape_markup(&self.subject),
            short_hash: self.short_hash.clone(),
            author: escape_markup(&self.author),
            relative_time: self.relative_time.clone(),
            branch: escape_markup(&self.branch),
        }
    }
}

/// Replace `&`, `<`, `>` with HTML entities, ampersand first.
pub fn escape_markup(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Source of the latest revision's metadata.
pub trait RevisionSource {
    fn extract(&self, repo: &Path) -> Result<RevisionSummary>;
}

/// Reads metadata with `git log -1` and `git rev-parse`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitRevisionSource;

impl RevisionSource for GitRevisionSource {
    fn extract(&self, repo: &Path) -> Result<RevisionSummary> {
        let raw = command::run_in(
            repo,
            "git",
            &["log", "-1", "--no-show-signature", "--no-color", LOG_FORMAT],
            "git log",
        )
            .map_err(|e| Error::metadata_unavailable(describe(&e), Some("git log".to_string())))?;

        let branch = git::current_branch(repo).map_err(|e| {
            Error::metadata_unavailable(describe(&e), Some("git rev-parse".to_string()))
        })?;

        parse_log_line(&raw, branch)
    }
}

fn describe(err: &Error) -> String {
    err.details
        .get("error")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| err.message.clone())
}

fn parse_log_line(raw: &str, branch: String) -> Result<RevisionSummary> {
    let line = raw.lines().next().unwrap_or_default();
    let mut fields = line.split(FIELD_SEP);

    let (Some(subject), Some(short_hash), Some(author), Some(relative_time)) =
        (fields.next(), fields.next(), fields.next(), fields.next())
    else {
        return Err(Error::metadata_unavailable(
            format!("unexpected git log output: {:?}", raw),
            Some("git log".to_string()),
        ));
    };

    if short_hash.trim().is_empty() {
        return Err(Error::metadata_unavailable(
            "no commit found",
            Some("git log".to_string()),
        ));
    }

    Ok(RevisionSummary {
        subject: subject.trim().to_string(),
        short_hash: short_hash.trim().to_string(),
        author: author.trim().to_string(),
        relative_time: relative_time.trim().to_string(),
        branch: branch.trim().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::process::Command;

    fn git(dir: &Path, args: &[&str]) {
        let out = Command::new("git")
            .args(["-c", "user.name=Jane Doe", "-c", "user.email=jane@example.com"])
            .args(args)
            .current_dir(dir)
            .output()
            .unwrap();
        assert!(out.status.success(), "git {:?} failed", args);
    }

    #[test]
    fn escape_replaces_ampersand_first() {
        assert_eq!(escape_markup("a & b"), "a &amp; b");
        assert_eq!(escape_markup("<b>"), "&lt;b&gt;");
        assert_eq!(escape_markup("&lt;"), "&amp;lt;");
        assert_eq!(escape_markup("plain"), "plain");
    }

    #[test]
    fn escape_never_double_escapes() {
        let samples = ["&", "&&<>", "<&>", "x < y && y > z", "&amp;", "<<&>>", ""];
        for original in samples {
            let escaped = escape_markup(original);
            assert!(!escaped.contains('<') && !escaped.contains('>'));
            assert_eq!(
                escaped.matches("&amp;").count(),
                original.matches('&').count(),
                "{:?}",
                original
            );
            let unescaped = escaped
                .replace("&lt;", "<")
                .replace("&gt;", ">")
                .replace("&amp;", "&");
            assert_eq!(unescaped, original);
        }
    }

    #[test]
    fn escaped_summary_leaves_hash_and_time_alone() {
        let summary = RevisionSummary {
            subject: "Fix <script> & stuff".to_string(),
            short_hash: "abc1234".to_string(),
            author: "A & B".to_string(),
            relative_time: "2 minutes ago".to_string(),
            branch: "feature/<x>".to_string(),
        };
        let escaped = summary.escaped();

        assert_eq!(escaped.subject, "Fix &lt;script&gt; &amp; stuff");
        assert_eq!(escaped.author, "A &amp; B");
        assert_eq!(escaped.branch, "feature/&lt;x&gt;");
        assert_eq!(escaped.short_hash, "abc1234");
        assert_eq!(escaped.relative_time, "2 minutes ago");
    }

    #[test]
    fn parse_splits_on_unit_separator() {
        let raw = "Fix | pipes\u{1f}abc1234\u{1f}Jane Doe\u{1f}2 minutes ago";
        let summary = parse_log_line(raw, "development".to_string()).unwrap();

        assert_eq!(summary.subject, "Fix | pipes");
        assert_eq!(summary.short_hash, "abc1234");
        assert_eq!(summary.author, "Jane Doe");
        assert_eq!(summary.relative_time, "2 minutes ago");
        assert_eq!(summary.branch, "development");
    }

    #[test]
    fn parse_rejects_truncated_output() {
        let err = parse_log_line("just a subject", "main".to_string()).unwrap_err();
        assert_eq!(err.code.as_str(), "revision.metadata_unavailable");
    }

    #[test]
    fn extract_reads_latest_commit() {
        let dir = tempfile::tempdir().unwrap();
        git(dir.path(), &["init", "-q", "-b", "development"]);
        fs::write(dir.path().join("a.txt"), "a").unwrap();
        git(dir.path(), &["add", "."]);
        git(dir.path(), &["commit", "-q", "-m", "First"]);
        fs::write(dir.path().join("b.txt"), "b").unwrap();
        git(dir.path(), &["add", "."]);
        git(
            dir.path(),
            &["commit", "-q", "-m", "Fix payment webhook\n\nLonger body here."],
        );

        let summary = GitRevisionSource.extract(dir.path()).unwrap();

        assert_eq!(summary.subject, "Fix payment webhook");
        assert_eq!(summary.author, "Jane Doe");
        assert_eq!(summary.branch, "development");
        assert!(!summary.short_hash.is_empty());
        assert!(summary.relative_time.ends_with("ago"));
    }

    #[test]
    fn extract_ignores_signature_and_color_settings() {
        let dir = tempfile::tempdir().unwrap();
        git(dir.path(), &["init", "-q", "-b", "main"]);
        git(dir.path(), &["config", "log.showSignature", "true"]);
        git(dir.path(), &["config", "color.ui", "always"]);
        fs::write(dir.path().join("a.txt"), "a").unwrap();
        git(dir.path(), &["add", "."]);
        git(dir.path(), &["commit", "-q", "-m", "Ship it"]);

        let summary = GitRevisionSource.extract(dir.path()).unwrap();

        assert_eq!(summary.subject, "Ship it");
        assert!(!summary.short_hash.contains('\u{1b}'));
    }

    #[test]
    fn extract_without_commits_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        git(dir.path(), &["init", "-q"]);

        let err = GitRevisionSource.extract(dir.path()).unwrap_err();
        assert_eq!(err.code.as_str(), "revision.metadata_unavailable");
    }

    #[test]
    fn extract_outside_repository_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        assert!(GitRevisionSource.extract(dir.path()).is_err());
    }
}
