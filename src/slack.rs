//! Best-effort Slack webhook notifications. Never fatal: failures are
//! logged and swallowed, matching `send_kubernetes_event`'s swallow-on-
//! failure style.

use std::time::Duration;

use tracing::{info, warn};

use crate::config::Config;

pub enum Severity {
    Info,
    Error,
}

pub struct SlackNotifier {
    webhook_url: Option<String>,
    channel: String,
    prefix: Option<String>,
    suffix: Option<String>,
    client: reqwest::Client,
    http_timeout: Duration,
}

impl SlackNotifier {
    pub fn from_config(config: &Config) -> Self {
        Self {
            webhook_url: config.slack_webhook_url.clone(),
            channel: config.slack_channel.clone(),
            prefix: config.slack_message_prefix.clone(),
            suffix: config.slack_message_suffix.clone(),
            client: reqwest::Client::new(),
            http_timeout: config.http_timeout,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.webhook_url.is_some()
    }

    pub async fn send(&self, message: &str, severity: Severity) {
        let Some(url) = self.webhook_url.as_ref() else {
            return;
        };

        let icon = match severity {
            Severity::Info => ":white_check_mark:",
            Severity::Error => ":x:",
        };

        let mut text = String::new();
        if let Some(prefix) = &self.prefix {
            text.push_str(prefix);
            text.push(' ');
        }
        text.push_str(&format!("{} {}", icon, message));
        if let Some(suffix) = &self.suffix {
            text.push(' ');
            text.push_str(suffix);
        }

        info!(channel = %self.channel, "sending slack message");

        let body = serde_json::json!({
            "channel": self.channel,
            "text": text,
        });

        if let Err(e) = self.client.post(url).json(&body).timeout(self.http_timeout).send().await {
            warn!(error = %e, "failed to send slack message");
        }
    }
}
