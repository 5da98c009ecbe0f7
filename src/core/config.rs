//! Layered run settings.
//!
//! Resolution order (later wins): built-in defaults, optional JSON settings
//! file, environment variables, CLI overrides applied by the caller. Settings
//! are resolved once at the start of a run.

use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::git::SyncMode;
use crate::notify::NotificationTarget;
use crate::paths;
use crate::pipeline::VerifyPolicy;
use crate::supervisor::LaunchSpec;
use crate::utils::io;

pub const DEFAULT_TELEGRAM_API_URL: &str = "https://api.telegram.org";

const REDACTED: &str = "********";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_workdir")]
    pub workdir: String,

    #[serde(default = "default_remote")]
    pub remote: String,

    #[serde(default = "default_branch")]
    pub branch: String,

    #[serde(default)]
    pub sync: SyncMode,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_command: Option<String>,

    #[serde(default = "default_instance")]
    pub instance: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launch_command: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launch_dir: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<String>,

    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,

    #[serde(default = "default_verify_attempts")]
    pub verify_attempts: u32,

    #[serde(default = "default_verify_interval_ms")]
    pub verify_interval_ms: u64,

    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,

    #[serde(default)]
    pub telegram: TelegramSettings,

    /// Settings file this configuration was read from, if any.
    #[serde(skip_deserializing, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_token: Option<String>,

    #[serde(
        default,
        deserialize_with = "string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub chat_id: Option<String>,

    #[serde(
        default,
        deserialize_with = "string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub thread_id: Option<String>,

    #[serde(default = "default_api_url")]
    pub api_url: String,
}

impl Default for TelegramSettings {
    fn default() -> Self {
        Self {
            bot_token: None,
            chat_id: None,
            thread_id: None,
            api_url: default_api_url(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            workdir: default_workdir(),
            remote: default_remote(),
            branch: default_branch(),
            sync: SyncMode::default(),
            install_command: None,
            instance: default_instance(),
            launch_command: None,
            launch_dir: None,
            state_dir: None,
            grace_secs: default_grace_secs(),
            verify_attempts: default_verify_attempts(),
            verify_interval_ms: default_verify_interval_ms(),
            stop_timeout_secs: default_stop_timeout_secs(),
            telegram: TelegramSettings::default(),
            source: None,
        }
    }
}

// =============================================================================
// Default value functions
// =============================================================================

fn default_workdir() -> String {
    ".".to_string()
}

fn default_remote() -> String {
    "origin".to_string()
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_instance() -> String {
    "app".to_string()
}

fn default_grace_secs() -> u64 {
    5
}

fn default_verify_attempts() -> u32 {
    1
}

fn default_verify_interval_ms() -> u64 {
    1000
}

fn default_stop_timeout_secs() -> u64 {
    10
}

fn default_api_url() -> String {
    DEFAULT_TELEGRAM_API_URL.to_string()
}

/// Accept chat and thread ids written either as JSON strings or numbers.
fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(i64),
    }

    Ok(Option::<Raw>::deserialize(deserializer)?.map(|raw| match raw {
        Raw::Text(s) => s,
        Raw::Number(n) => n.to_string(),
    }))
}

// =============================================================================
// Loading
// =============================================================================

/// Where to look for settings before environment overrides apply.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Explicit settings file; must exist when given.
    pub config_path: Option<PathBuf>,
    /// Working copy override; also where `redeploy.json` is looked up.
    pub workdir: Option<PathBuf>,
}

/// Resolve settings from the process environment.
pub fn load(options: &LoadOptions) -> Result<Settings> {
    load_with_env(options, |key| std::env::var(key).ok())
}

/// Resolve settings with an injectable environment lookup.
pub fn load_with_env<F>(options: &LoadOptions, env: F) -> Result<Settings>
where
    F: Fn(&str) -> Option<String>,
{
    let lookup = |key: &str| env(key).filter(|v| !v.trim().is_empty());

    let workdir_hint = options
        .workdir
        .clone()
        .or_else(|| lookup("REDEPLOY_WORKDIR").map(|w| paths::expand(&w)))
        .unwrap_or_else(|| PathBuf::from(default_workdir()));

    let explicit = options
        .config_path
        .clone()
        .or_else(|| lookup("REDEPLOY_CONFIG").map(|p| paths::expand(&p)));

    let file = match explicit {
        Some(path) => {
            if !path.exists() {
                return Err(Error::config_missing_key(
                    "config",
                    Some(path.display().to_string()),
                )
                .with_hint("The settings file named by --config or REDEPLOY_CONFIG does not exist"));
            }
            Some(path)
        }
        None => Some(paths::local_settings(&workdir_hint)).filter(|p| p.exists()),
    };

    let mut settings = match file {
        Some(ref path) => {
            let mut parsed = parse_file(path)?;
            parsed.source = Some(path.display().to_string());
            parsed
        }
        None => Settings::default(),
    };

    apply_env(&mut settings, &lookup)?;

    if let Some(ref workdir) = options.workdir {
        settings.workdir = workdir.display().to_string();
    }

    settings.validate()?;
    Ok(settings)
}

fn parse_file(path: &Path) -> Result<Settings> {
    let content = io::read_file(path, &format!("read {}", path.display()))?;
    serde_json::from_str(&content).map_err(|e| Error::config_invalid_json(path.display().to_string(), e))
}

fn apply_env<F>(settings: &mut Settings, lookup: &F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("REDEPLOY_WORKDIR") {
        settings.workdir = v;
    }
    if let Some(v) = lookup("REDEPLOY_REMOTE") {
        settings.remote = v;
    }
    if let Some(v) = lookup("REDEPLOY_BRANCH") {
        settings.branch = v;
    }
    if let Some(v) = lookup("REDEPLOY_SYNC") {
        settings.sync = v.parse()?;
    }
    if let Some(v) = lookup("REDEPLOY_INSTALL_COMMAND") {
        settings.install_command = Some(v);
    }
    if let Some(v) = lookup("REDEPLOY_INSTANCE") {
        settings.instance = v;
    }
    if let Some(v) = lookup("REDEPLOY_LAUNCH_COMMAND") {
        settings.launch_command = Some(v);
    }
    if let Some(v) = lookup("REDEPLOY_LAUNCH_DIR") {
        settings.launch_dir = Some(v);
    }
    if let Some(v) = lookup("REDEPLOY_STATE_DIR") {
        settings.state_dir = Some(v);
    }
    if let Some(v) = lookup("REDEPLOY_GRACE_SECS") {
        settings.grace_secs = parse_number("REDEPLOY_GRACE_SECS", &v)?;
    }
    if let Some(v) = lookup("REDEPLOY_VERIFY_ATTEMPTS") {
        settings.verify_attempts = parse_number("REDEPLOY_VERIFY_ATTEMPTS", &v)?;
    }
    if let Some(v) = lookup("TELEGRAM_BOT_TOKEN") {
        settings.telegram.bot_token = Some(v);
    }
    if let Some(v) = lookup("TELEGRAM_CHAT_ID") {
        settings.telegram.chat_id = Some(v);
    }
    if let Some(v) = lookup("TELEGRAM_THREAD_ID") {
        settings.telegram.thread_id = Some(v);
    }
    if let Some(v) = lookup("TELEGRAM_API_URL") {
        settings.telegram.api_url = v;
    }
    Ok(())
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        Error::config_invalid_value(key, Some(value.to_string()), "expected a non-negative integer")
    })
}

impl Settings {
    fn validate(&self) -> Result<()> {
        if self.verify_attempts == 0 {
            return Err(Error::config_invalid_value(
                "verify_attempts",
                Some("0".to_string()),
                "at least one liveness check is required",
            ));
        }
        Ok(())
    }

    pub fn workdir_path(&self) -> PathBuf {
        paths::expand(&self.workdir)
    }

    pub fn state_dir_path(&self) -> Result<PathBuf> {
        match self.state_dir {
            Some(ref dir) => Ok(paths::expand(dir)),
            None => paths::instances(),
        }
    }

    /// Command line and directory for the application, required for a deploy.
    pub fn launch_spec(&self) -> Result<LaunchSpec> {
        let command = self
            .launch_command
            .clone()
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| {
                Error::config_missing_key("launch_command", self.source.clone())
                    .with_hint("Set REDEPLOY_LAUNCH_COMMAND or \"launch_command\" in redeploy.json")
            })?;

        let working_dir = match self.launch_dir {
            Some(ref dir) => paths::expand(dir),
            None => self.workdir_path(),
        };

        Ok(LaunchSpec {
            command,
            working_dir,
        })
    }

    pub fn verify_policy(&self) -> VerifyPolicy {
        VerifyPolicy {
            grace: Duration::from_secs(self.grace_secs),
            attempts: self.verify_attempts,
            interval: Duration::from_millis(self.verify_interval_ms),
        }
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    /// Messaging target for this run.
    ///
    /// A thread id that is not numeric is dropped with a warning; the message
    /// then goes to the chat itself.
    pub fn notification_target(&self) -> NotificationTarget {
        let thread_id = self.telegram.thread_id.as_deref().and_then(|raw| {
            let parsed = raw.trim().parse().ok();
            if parsed.is_none() {
                log_status!(
                    "config",
                    "Ignoring telegram.thread_id {:?}: expected a numeric topic id",
                    raw
                );
            }
            parsed
        });

        NotificationTarget {
            bot_token: self.telegram.bot_token.clone(),
            chat_id: self.telegram.chat_id.clone(),
            thread_id,
        }
    }

    /// Copy safe to print: the bot token is masked.
    pub fn redacted(&self) -> Settings {
        let mut copy = self.clone();
        if copy.telegram.bot_token.is_some() {
            copy.telegram.bot_token = Some(REDACTED.to_string());
        }
        copy
    }

    /// Settings a full deployment needs that are currently absent or blank.
    pub fn missing_for_run(&self) -> Vec<String> {
        let mut missing = Vec::new();
        if is_blank(self.launch_command.as_deref()) {
            missing.push("launch_command".to_string());
        }
        if is_blank(self.telegram.bot_token.as_deref()) {
            missing.push("telegram.bot_token".to_string());
        }
        if is_blank(self.telegram.chat_id.as_deref()) {
            missing.push("telegram.chat_id".to_string());
        }
        missing
    }
}

fn is_blank(value: Option<&str>) -> bool {
    value.is_none_or(|v| v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn in_dir(dir: &Path) -> LoadOptions {
        LoadOptions {
            config_path: None,
            workdir: Some(dir.to_path_buf()),
        }
    }

    #[test]
    fn defaults_without_file_or_env() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_with_env(&in_dir(dir.path()), env_from(&[])).unwrap();

        assert_eq!(settings.remote, "origin");
        assert_eq!(settings.branch, "main");
        assert_eq!(settings.instance, "app");
        assert_eq!(settings.grace_secs, 5);
        assert_eq!(settings.verify_attempts, 1);
        assert_eq!(settings.telegram.api_url, DEFAULT_TELEGRAM_API_URL);
        assert!(settings.source.is_none());
    }

    #[test]
    fn local_file_is_picked_up_from_workdir() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("redeploy.json"),
            r#"{"branch": "development", "launch_command": "python3 app.py",
                "telegram": {"chat_id": -1001234, "thread_id": 7}}"#,
        )
        .unwrap();

        let settings = load_with_env(&in_dir(dir.path()), env_from(&[])).unwrap();

        assert_eq!(settings.branch, "development");
        assert_eq!(settings.launch_command.as_deref(), Some("python3 app.py"));
        assert_eq!(settings.telegram.chat_id.as_deref(), Some("-1001234"));
        assert_eq!(settings.notification_target().thread_id, Some(7));
        assert!(settings.source.is_some());
    }

    #[test]
    fn environment_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("redeploy.json"),
            r#"{"branch": "development", "telegram": {"bot_token": "from-file"}}"#,
        )
        .unwrap();

        let env = env_from(&[
            ("REDEPLOY_BRANCH", "release"),
            ("TELEGRAM_BOT_TOKEN", "from-env"),
            ("TELEGRAM_CHAT_ID", "42"),
        ]);
        let settings = load_with_env(&in_dir(dir.path()), env).unwrap();

        assert_eq!(settings.branch, "release");
        assert_eq!(settings.telegram.bot_token.as_deref(), Some("from-env"));
        assert_eq!(settings.telegram.chat_id.as_deref(), Some("42"));
    }

    #[test]
    fn empty_environment_values_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let env = env_from(&[("TELEGRAM_BOT_TOKEN", ""), ("REDEPLOY_BRANCH", "  ")]);
        let settings = load_with_env(&in_dir(dir.path()), env).unwrap();

        assert!(settings.telegram.bot_token.is_none());
        assert_eq!(settings.branch, "main");
    }

    #[test]
    fn explicit_config_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let options = LoadOptions {
            config_path: Some(dir.path().join("missing.json")),
            workdir: Some(dir.path().to_path_buf()),
        };
        let err = load_with_env(&options, env_from(&[])).unwrap_err();
        assert_eq!(err.code.as_str(), "config.missing_key");
    }

    #[test]
    fn invalid_json_is_reported_with_path() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("redeploy.json"), "{ not json").unwrap();

        let err = load_with_env(&in_dir(dir.path()), env_from(&[])).unwrap_err();
        assert_eq!(err.code.as_str(), "config.invalid_json");
    }

    #[test]
    fn non_numeric_grace_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let env = env_from(&[("REDEPLOY_GRACE_SECS", "soon")]);
        let err = load_with_env(&in_dir(dir.path()), env).unwrap_err();
        assert_eq!(err.code.as_str(), "config.invalid_value");
    }

    #[test]
    fn zero_verify_attempts_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let env = env_from(&[("REDEPLOY_VERIFY_ATTEMPTS", "0")]);
        assert!(load_with_env(&in_dir(dir.path()), env).is_err());
    }

    #[test]
    fn launch_spec_requires_command_and_defaults_to_workdir() {
        let mut settings = Settings::default();
        let err = settings.launch_spec().unwrap_err();
        assert_eq!(err.code.as_str(), "config.missing_key");

        settings.workdir = "/srv/app".to_string();
        settings.launch_command = Some("./server".to_string());
        let spec = settings.launch_spec().unwrap();
        assert_eq!(spec.working_dir, PathBuf::from("/srv/app"));
        assert_eq!(spec.command, "./server");
    }

    #[test]
    fn redacted_masks_token_only() {
        let mut settings = Settings::default();
        settings.telegram.bot_token = Some("123:secret".to_string());
        settings.telegram.chat_id = Some("42".to_string());

        let shown = settings.redacted();
        assert_eq!(shown.telegram.bot_token.as_deref(), Some(REDACTED));
        assert_eq!(shown.telegram.chat_id.as_deref(), Some("42"));
    }

    #[test]
    fn missing_for_run_lists_absent_keys() {
        let settings = Settings::default();
        assert_eq!(
            settings.missing_for_run(),
            vec!["launch_command", "telegram.bot_token", "telegram.chat_id"]
        );
    }

    #[test]
    fn non_numeric_thread_id_does_not_block_a_run() {
        let dir = tempfile::tempdir().unwrap();
        let env = env_from(&[
            ("REDEPLOY_LAUNCH_COMMAND", "./server"),
            ("TELEGRAM_BOT_TOKEN", "123:abc"),
            ("TELEGRAM_CHAT_ID", "-1001"),
            ("TELEGRAM_THREAD_ID", "general"),
        ]);
        let settings = load_with_env(&in_dir(dir.path()), env).unwrap();

        assert!(settings.launch_spec().is_ok());
        let target = settings.notification_target();
        assert_eq!(target.thread_id, None);
        assert_eq!(target.credentials(), Some(("123:abc", "-1001")));
    }

    #[test]
    fn blank_credentials_in_file_count_as_missing() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("redeploy.json"),
            r#"{"launch_command": "./server",
                "telegram": {"bot_token": "", "chat_id": "  "}}"#,
        )
        .unwrap();

        let settings = load_with_env(&in_dir(dir.path()), env_from(&[])).unwrap();

        assert_eq!(
            settings.missing_for_run(),
            vec!["telegram.bot_token", "telegram.chat_id"]
        );
        assert!(settings.notification_target().credentials().is_none());
    }
}
