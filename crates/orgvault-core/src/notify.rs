//! Run-summary and error notifications over Slack and generic webhooks.
//!
//! Delivery is best effort: every enabled channel is attempted and a failed
//! delivery is logged at `WARN`, never returned to the caller.

use chrono::Local;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde_json::{Value, json};
use sha2::Sha256;
use tracing::{info, warn};

use orgvault_config::NotificationsConfig;

use crate::secrets::{Environment, SecretValue};
use crate::summary::RunSummary;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the webhook body signature.
pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";

/// Failed backups listed in a Slack message before truncation.
const SLACK_FAILURE_LIMIT: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{channel} returned {status}")]
    Status { channel: &'static str, status: u16 },
}

struct SlackChannel {
    webhook_url: SecretValue,
    channel: String,
}

struct WebhookChannel {
    url: SecretValue,
    secret: Option<SecretValue>,
}

pub struct Notifier {
    client: Client,
    slack: Option<SlackChannel>,
    webhook: Option<WebhookChannel>,
}

impl Notifier {
    /// A notifier with no channels.
    pub fn disabled(client: Client) -> Self {
        Self {
            client,
            slack: None,
            webhook: None,
        }
    }

    /// Build the enabled channels. A channel whose URL cannot be resolved
    /// is disabled with a warning.
    pub fn from_config(config: &NotificationsConfig, env: &Environment, client: Client) -> Self {
        let mut notifier = Self::disabled(client);

        if config.slack.enabled {
            match env.resolve_optional(&config.slack.webhook_url) {
                Ok(Some(webhook_url)) => {
                    notifier.slack = Some(SlackChannel {
                        webhook_url,
                        channel: config.slack.channel.clone(),
                    })
                }
                Ok(None) => warn!("Slack notifications enabled without a webhook_url"),
                Err(e) => warn!(error = %e, "Slack notifications disabled"),
            }
        }

        if config.webhook.enabled {
            let secret = match config.webhook.secret.as_deref().map(|s| env.resolve_optional(s)) {
                Some(Ok(secret)) => secret,
                Some(Err(e)) => {
                    warn!(error = %e, "Webhook secret unavailable, sending unsigned");
                    None
                }
                None => None,
            };
            match env.resolve_optional(&config.webhook.url) {
                Ok(Some(url)) => notifier.webhook = Some(WebhookChannel { url, secret }),
                Ok(None) => warn!("Webhook notifications enabled without a url"),
                Err(e) => warn!(error = %e, "Webhook notifications disabled"),
            }
        }
        notifier
    }

    pub fn is_enabled(&self) -> bool {
        self.slack.is_some() || self.webhook.is_some()
    }

    pub async fn send_summary(&self, summary: &RunSummary) {
        if let Some(slack) = &self.slack {
            let message = slack_summary(summary, &slack.channel);
            self.deliver_slack(slack, &message).await;
        }
        if let Some(webhook) = &self.webhook {
            let payload = webhook_payload(
                &summary.started_at.to_rfc3339(),
                "backup_summary",
                summary.to_json(),
            );
            self.deliver_webhook(webhook, &payload).await;
        }
    }

    pub async fn send_error(&self, message: &str) {
        let timestamp = Local::now().to_rfc3339();
        if let Some(slack) = &self.slack {
            let body = slack_error(message, &timestamp, &slack.channel);
            self.deliver_slack(slack, &body).await;
        }
        if let Some(webhook) = &self.webhook {
            let data = json!({"error": message, "timestamp": timestamp});
            let payload = webhook_payload(&timestamp, "error", data);
            self.deliver_webhook(webhook, &payload).await;
        }
    }

    async fn deliver_slack(&self, slack: &SlackChannel, message: &Value) {
        let result: Result<(), NotifyError> = async {
            let resp = self
                .client
                .post(slack.webhook_url.expose())
                .json(message)
                .send()
                .await?;
            check_status("slack", resp)
        }
        .await;
        match result {
            Ok(()) => info!("Slack notification sent"),
            Err(e) => warn!(error = %e, "Failed to send Slack notification"),
        }
    }

    async fn deliver_webhook(&self, webhook: &WebhookChannel, payload: &Value) {
        let body = payload.to_string();
        let mut request = self
            .client
            .post(webhook.url.expose())
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(secret) = &webhook.secret {
            request = request.header(SIGNATURE_HEADER, sign(secret.expose(), body.as_bytes()));
        }

        let result: Result<(), NotifyError> = async {
            let resp = request.body(body).send().await?;
            check_status("webhook", resp)
        }
        .await;
        match result {
            Ok(()) => info!("Webhook notification sent"),
            Err(e) => warn!(error = %e, "Failed to send webhook notification"),
        }
    }
}

fn check_status(channel: &'static str, resp: reqwest::Response) -> Result<(), NotifyError> {
    if resp.status().is_success() {
        Ok(())
    } else {
        Err(NotifyError::Status {
            channel,
            status: resp.status().as_u16(),
        })
    }
}

/// `sha256=<hex HMAC-SHA256 of body>`.
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC key of any length is valid"),
    };
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Envelope sent to the generic webhook.
pub fn webhook_payload(timestamp: &str, kind: &str, data: Value) -> Value {
    json!({
        "timestamp": timestamp,
        "type": kind,
        "data": data,
    })
}

/// Slack attachment color: all good, nothing succeeded, or mixed.
pub fn summary_color(summary: &RunSummary) -> &'static str {
    if summary.failed() == 0 {
        "good"
    } else if summary.succeeded() == 0 {
        "danger"
    } else {
        "warning"
    }
}

fn field(title: &str, value: impl Into<String>, short: bool) -> Value {
    json!({"title": title, "value": value.into(), "short": short})
}

/// Slack incoming-webhook message for a run summary.
pub fn slack_summary(summary: &RunSummary, channel: &str) -> Value {
    let mut fields = vec![
        field("Total Backups", summary.total().to_string(), true),
        field("Successful", summary.succeeded().to_string(), true),
        field("Failed", summary.failed().to_string(), true),
        field(
            "Duration",
            format!("{:.2} seconds", summary.duration.as_secs_f64()),
            true,
        ),
    ];
    if summary.dry_run() > 0 {
        fields.push(field("Dry Run", summary.dry_run().to_string(), true));
    }

    if !summary.per_target.is_empty() {
        let breakdown: String = summary
            .per_target
            .iter()
            .map(|(name, s)| format!("• {name}: {}✓ {}✗\n", s.succeeded, s.failed))
            .collect();
        fields.push(field("Target Breakdown", breakdown, false));
    }

    let failed = summary.failed();
    if failed > 0 {
        let mut text: String = summary
            .failures()
            .take(SLACK_FAILURE_LIMIT)
            .map(|(r, reason)| format!("• {} → {}: {reason}\n", r.repository, r.target))
            .collect();
        if failed > SLACK_FAILURE_LIMIT {
            text.push_str(&format!("... and {} more", failed - SLACK_FAILURE_LIMIT));
        }
        fields.push(field("Failed Backups", text, false));
    }

    json!({
        "channel": channel,
        "attachments": [{
            "color": summary_color(summary),
            "title": "GitHub Organization Backup Summary",
            "text": format!("Backup completed at {}", summary.started_at.format("%Y-%m-%d %H:%M:%S")),
            "fields": fields,
            "footer": "orgvault",
        }],
    })
}

/// Slack incoming-webhook message for a failed cycle.
pub fn slack_error(message: &str, timestamp: &str, channel: &str) -> Value {
    json!({
        "channel": channel,
        "attachments": [{
            "color": "danger",
            "title": "GitHub Backup Error",
            "text": format!("Error occurred at {timestamp}"),
            "fields": [field("Error", message, false)],
            "footer": "orgvault",
        }],
    })
}
