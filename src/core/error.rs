use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigMissingKey,
    ConfigInvalidJson,
    ConfigInvalidValue,

    ValidationInvalidArgument,

    DeployFetchFailed,
    DeployInstallFailed,

    SupervisorLaunchFailed,
    SupervisorAlreadyRunning,
    SupervisorVerificationTimeout,

    RevisionMetadataUnavailable,
    NotifyTransportFailed,

    InternalIoError,
    InternalJsonError,
    InternalUnexpected,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigMissingKey => "config.missing_key",
            ErrorCode::ConfigInvalidJson => "config.invalid_json",
            ErrorCode::ConfigInvalidValue => "config.invalid_value",

            ErrorCode::ValidationInvalidArgument => "validation.invalid_argument",

            ErrorCode::DeployFetchFailed => "deploy.fetch_failed",
            ErrorCode::DeployInstallFailed => "deploy.install_failed",

            ErrorCode::SupervisorLaunchFailed => "supervisor.launch_failed",
            ErrorCode::SupervisorAlreadyRunning => "supervisor.already_running",
            ErrorCode::SupervisorVerificationTimeout => "supervisor.verification_timeout",

            ErrorCode::RevisionMetadataUnavailable => "revision.metadata_unavailable",
            ErrorCode::NotifyTransportFailed => "notify.transport_failed",

            ErrorCode::InternalIoError => "internal.io_error",
            ErrorCode::InternalJsonError => "internal.json_error",
            ErrorCode::InternalUnexpected => "internal.unexpected",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hint {
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMissingKeyDetails {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidJsonDetails {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidValueDetails {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub problem: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidArgumentDetails {
    pub field: String,
    pub problem: String,
}

/// Output of an external collaborator command that failed.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandFailedDetails {
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceDetails {
    pub instance: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_path: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalIoErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalJsonErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    pub details: Value,
    pub hints: Vec<Hint>,
    pub retryable: Option<bool>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

fn to_details<T: Serialize>(details: T) -> Value {
    serde_json::to_value(details).unwrap_or_else(|_| Value::Object(serde_json::Map::new()))
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>, details: Value) -> Self {
        Self {
            code,
            message: message.into(),
            details,
            hints: Vec::new(),
            retryable: None,
        }
    }

    pub fn validation_invalid_argument(
        field: impl Into<String>,
        problem: impl Into<String>,
    ) -> Self {
        let problem = problem.into();
        let details = to_details(InvalidArgumentDetails {
            field: field.into(),
            problem: problem.clone(),
        });

        Self::new(
            ErrorCode::ValidationInvalidArgument,
            format!("Invalid argument: {}", problem),
            details,
        )
    }

    pub fn fetch_failed(details: CommandFailedDetails) -> Self {
        let message = format!("{} failed: {}", details.command, first_line(&details));
        Self::new(ErrorCode::DeployFetchFailed, message, to_details(details)).retryable(true)
    }

    pub fn install_failed(details: CommandFailedDetails) -> Self {
        let message = format!(
            "Dependency install failed (exit {}): {}",
            details.exit_code,
            first_line(&details)
        );
        Self::new(ErrorCode::DeployInstallFailed, message, to_details(details))
    }

    pub fn launch_failed(
        instance: impl Into<String>,
        command: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        let instance = instance.into();
        let error = error.into();
        let message = format!("Failed to launch '{}': {}", instance, error);
        let details = to_details(InstanceDetails {
            instance,
            pid: None,
            command: Some(command.into()),
            error: Some(error),
            log_path: None,
        });

        Self::new(ErrorCode::SupervisorLaunchFailed, message, details)
    }

    pub fn already_running(instance: impl Into<String>, pid: u32) -> Self {
        let instance = instance.into();
        let details = to_details(InstanceDetails {
            instance: instance.clone(),
            pid: Some(pid),
            command: None,
            error: None,
            log_path: None,
        });

        Self::new(
            ErrorCode::SupervisorAlreadyRunning,
            format!("Instance '{}' is already running (pid {})", instance, pid),
            details,
        )
        .with_hint(format!(
            "Run 'redeploy stop --instance {}' before starting it again",
            instance
        ))
    }

    pub fn verification_timeout(
        instance: impl Into<String>,
        pid: u32,
        log_path: Option<String>,
    ) -> Self {
        let instance = instance.into();
        let hint = log_path
            .as_ref()
            .map(|p| format!("Check the application log at {}", p));
        let details = to_details(InstanceDetails {
            instance: instance.clone(),
            pid: Some(pid),
            command: None,
            error: None,
            log_path,
        });

        let err = Self::new(
            ErrorCode::SupervisorVerificationTimeout,
            format!(
                "Instance '{}' (pid {}) is not running after the grace period",
                instance, pid
            ),
            details,
        );
        match hint {
            Some(hint) => err.with_hint(hint),
            None => err,
        }
    }

    pub fn metadata_unavailable(error: impl Into<String>, context: Option<String>) -> Self {
        let error = error.into();
        let details = to_details(InternalIoErrorDetails {
            error: error.clone(),
            context,
        });

        Self::new(
            ErrorCode::RevisionMetadataUnavailable,
            format!("Revision metadata unavailable: {}", error),
            details,
        )
    }

    pub fn notify_transport(error: impl Into<String>, status: Option<u16>) -> Self {
        let error = error.into();
        Self::new(
            ErrorCode::NotifyTransportFailed,
            format!("Notification delivery failed: {}", error),
            serde_json::json!({ "error": error, "status": status }),
        )
        .retryable(true)
    }

    pub fn config_missing_key(key: impl Into<String>, path: Option<String>) -> Self {
        let key = key.into();
        let details = to_details(ConfigMissingKeyDetails {
            key: key.clone(),
            path,
        });

        Self::new(
            ErrorCode::ConfigMissingKey,
            format!("Missing required configuration key '{}'", key),
            details,
        )
    }

    pub fn config_invalid_json(path: impl Into<String>, err: serde_json::Error) -> Self {
        let path = path.into();
        let details = to_details(ConfigInvalidJsonDetails {
            path: path.clone(),
            error: err.to_string(),
        });

        Self::new(
            ErrorCode::ConfigInvalidJson,
            format!("Invalid JSON in settings file {}", path),
            details,
        )
    }

    pub fn config_invalid_value(
        key: impl Into<String>,
        value: Option<String>,
        problem: impl Into<String>,
    ) -> Self {
        let key = key.into();
        let problem = problem.into();
        let details = to_details(ConfigInvalidValueDetails {
            key: key.clone(),
            value,
            problem: problem.clone(),
        });

        Self::new(
            ErrorCode::ConfigInvalidValue,
            format!("Invalid configuration value for '{}': {}", key, problem),
            details,
        )
    }

    pub fn internal_io(error: impl Into<String>, context: Option<String>) -> Self {
        let details = to_details(InternalIoErrorDetails {
            error: error.into(),
            context,
        });

        Self::new(ErrorCode::InternalIoError, "IO error", details)
    }

    pub fn internal_json(error: impl Into<String>, context: Option<String>) -> Self {
        let details = to_details(InternalJsonErrorDetails {
            error: error.into(),
            context,
        });

        Self::new(ErrorCode::InternalJsonError, "JSON error", details)
    }

    pub fn internal_unexpected(error: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::InternalUnexpected,
            "Unexpected error",
            serde_json::json!({ "error": error.into() }),
        )
    }

    pub fn with_hint(mut self, message: impl Into<String>) -> Self {
        self.hints.push(Hint {
            message: message.into(),
        });
        self
    }

    fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = Some(retryable);
        self
    }
}

fn first_line(details: &CommandFailedDetails) -> String {
    let text = if details.stderr.trim().is_empty() {
        &details.stdout
    } else {
        &details.stderr
    };
    text.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("no output")
        .to_string()
}
