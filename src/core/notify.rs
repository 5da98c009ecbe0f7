//! Deployment notifications over the Telegram Bot API.
//!
//! Notification is best effort: missing credentials skip it silently and
//! delivery failures are logged, never propagated to the deployment result.

use reqwest::blocking::Client;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::revision::{escape_markup, EscapedSummary};

const PARSE_MODE: &str = "HTML";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Where deployment messages go. Any field may be absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotificationTarget {
    pub bot_token: Option<String>,
    pub chat_id: Option<String>,
    pub thread_id: Option<i64>,
}

impl NotificationTarget {
    /// Token and chat id when both are present and non-blank.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        let token = self.bot_token.as_deref().filter(|t| !t.trim().is_empty())?;
        let chat = self.chat_id.as_deref().filter(|c| !c.trim().is_empty())?;
        Some((token, chat))
    }
}

/// The deployment being reported.
#[derive(Debug, Clone, Serialize)]
pub struct DeployOutcome {
    pub instance: String,
}

/// `sendMessage` request body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutgoingMessage {
    pub chat_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_thread_id: Option<i64>,
    pub text: String,
    pub parse_mode: &'static str,
    pub disable_web_page_preview: bool,
}

/// Delivers a message to the messaging endpoint.
pub trait Transport {
    fn send(&self, bot_token: &str, message: &OutgoingMessage) -> Result<()>;
}

/// Transport for `https://api.telegram.org/bot<token>/sendMessage`.
///
/// A client that cannot be built is reported like any other delivery failure.
pub struct TelegramTransport {
    api_url: String,
}

impl TelegramTransport {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
        }
    }

    fn endpoint(&self, bot_token: &str) -> String {
        format!(
            "{}/bot{}/sendMessage",
            self.api_url.trim_end_matches('/'),
            bot_token
        )
    }
}

impl Transport for TelegramTransport {
    fn send(&self, bot_token: &str, message: &OutgoingMessage) -> Result<()> {
        let client = Client::builder()
            .user_agent(concat!("redeploy/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::notify_transport(e.without_url().to_string(), None))?;

        // reqwest errors embed the URL, which carries the token.
        let response = client
            .post(self.endpoint(bot_token))
            .json(message)
            .send()
            .map_err(|e| Error::notify_transport(e.without_url().to_string(), None))?;

        let status = response.status();
        let body: Value = response.json().unwrap_or(Value::Null);
        let ok = body.get("ok").and_then(Value::as_bool).unwrap_or(false);

        if status.is_success() && ok {
            return Ok(());
        }

        let description = body
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or("endpoint rejected the message");
        Err(Error::notify_transport(
            format!("HTTP {}: {}", status.as_u16(), description),
            Some(status.as_u16()),
        ))
    }
}

/// What happened to a notification attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum NotifyOutcome {
    Sent,
    Skipped { reason: String },
    Failed { error: String },
}

impl NotifyOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, NotifyOutcome::Sent)
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        NotifyOutcome::Skipped {
            reason: reason.into(),
        }
    }
}

/// Render the success message body.
///
/// Layout: banner, blank, branch/commit/author/time block, blank, changelog
/// label, subject.
pub fn compose_message(summary: &EscapedSummary, outcome: &DeployOutcome) -> String {
    format!(
        "✅ <b>Deployment successful</b> · <code>{instance}</code>\n\
         \n\
         Branch: {branch}\n\
         Commit: {hash}\n\
         Author: {author}\n\
         Time: {time}\n\
         \n\
         <b>Changelog:</b>\n\
         <code>{subject}</code>",
        instance = escape_markup(&outcome.instance),
        branch = summary.branch,
        hash = summary.short_hash,
        author = summary.author,
        time = summary.relative_time,
        subject = summary.subject,
    )
}

pub struct Notifier<T: Transport> {
    transport: T,
}

impl<T: Transport> Notifier<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Send the deployment message, reporting what happened.
    pub fn deliver(
        &self,
        target: &NotificationTarget,
        summary: &EscapedSummary,
        outcome: &DeployOutcome,
    ) -> NotifyOutcome {
        let Some((token, chat_id)) = target.credentials() else {
            log_status!("notify", "No bot token or chat id configured, skipping");
            return NotifyOutcome::skipped("notification target not configured");
        };

        let message = OutgoingMessage {
            chat_id: chat_id.to_string(),
            message_thread_id: target.thread_id,
            text: compose_message(summary, outcome),
            parse_mode: PARSE_MODE,
            disable_web_page_preview: true,
        };

        match self.transport.send(token, &message) {
            Ok(()) => {
                log_status!("notify", "Deployment message sent to {}", chat_id);
                NotifyOutcome::Sent
            }
            Err(err) => {
                log_status!("notify", "{}", err.message);
                NotifyOutcome::Failed { error: err.message }
            }
        }
    }

    /// Send the deployment message; `true` only when it was delivered.
    pub fn notify(
        &self,
        target: &NotificationTarget,
        summary: &EscapedSummary,
        outcome: &DeployOutcome,
    ) -> bool {
        self.deliver(target, summary, outcome).is_sent()
    }
}
