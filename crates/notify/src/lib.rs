//! Per-user webhook notifications for job lifecycle events. Every failure
//! here is logged and swallowed — a notification never affects a job's
//! outcome.

use std::future::Future;

use serde::Serialize;

const COLOR_STARTED: u32 = 0x0099ff;
const COLOR_COMPLETED: u32 = 0x00ff00;
const COLOR_FAILED: u32 = 0xff0000;

const MAX_ERROR_FIELD_LEN: usize = 500;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("webhook request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("webhook endpoint returned {status}")]
    Api { status: reqwest::StatusCode },
}

pub type Result<T> = std::result::Result<T, Error>;

/// The seam a notifier posts through. Narrow on purpose so it can be
/// swapped for a mock in tests without dragging in a real HTTP stack.
pub trait WebhookSink: Send + Sync {
    fn post(&self, url: &str, payload: WebhookPayload) -> impl Future<Output = Result<()>> + Send;
}

pub struct ReqwestWebhookSink {
    http: reqwest::Client,
}

impl ReqwestWebhookSink {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

impl WebhookSink for ReqwestWebhookSink {
    async fn post(&self, url: &str, payload: WebhookPayload) -> Result<()> {
        let response = self.http.post(url).json(&payload).send().await?;
        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            tracing::warn!(%url, "webhook endpoint rate-limited this notification");
            return Err(Error::Api { status });
        }

        if !status.is_success() {
            return Err(Error::Api { status });
        }

        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct WebhookPayload {
    pub username: String,
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Serialize)]
pub struct Embed {
    pub title: String,
    pub description: String,
    pub color: u32,
    pub fields: Vec<EmbedField>,
    pub footer: EmbedFooter,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Serialize)]
pub struct EmbedFooter {
    pub text: String,
}

fn field(name: &str, value: impl Into<String>) -> EmbedField {
    EmbedField { name: name.to_string(), value: value.into(), inline: true }
}

pub struct Notifier<S> {
    sink: S,
    username: String,
}

impl<S: WebhookSink> Notifier<S> {
    pub fn new(sink: S, username: impl Into<String>) -> Self {
        Self { sink, username: username.into() }
    }

    pub async fn job_started(&self, webhook_url: &str, filename: &str) {
        let embed = Embed {
            title: "Transcription started".to_string(),
            description: filename.to_string(),
            color: COLOR_STARTED,
            fields: vec![field("File", filename)],
            footer: EmbedFooter { text: "retrace".to_string() },
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        self.send(webhook_url, embed).await;
    }

    pub async fn job_completed(
        &self,
        webhook_url: &str,
        filename: &str,
        processing_time_ms: i64,
        corrections_applied: usize,
    ) {
        let embed = Embed {
            title: "Transcription completed".to_string(),
            description: filename.to_string(),
            color: COLOR_COMPLETED,
            fields: vec![
                field("File", filename),
                field("Processing time", format!("{processing_time_ms} ms")),
                field("Corrections applied", corrections_applied.to_string()),
            ],
            footer: EmbedFooter { text: "retrace".to_string() },
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        self.send(webhook_url, embed).await;
    }

    pub async fn job_failed(&self, webhook_url: &str, filename: &str, error_message: &str) {
        let truncated: String = error_message.chars().take(MAX_ERROR_FIELD_LEN).collect();
        let embed = Embed {
            title: "Transcription failed".to_string(),
            description: filename.to_string(),
            color: COLOR_FAILED,
            fields: vec![field("File", filename), field("Error", truncated)],
            footer: EmbedFooter { text: "retrace".to_string() },
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        self.send(webhook_url, embed).await;
    }

    async fn send(&self, webhook_url: &str, embed: Embed) {
        let payload = WebhookPayload { username: self.username.clone(), embeds: vec![embed] };
        if let Err(err) = self.sink.post(webhook_url, payload).await {
            tracing::warn!(%webhook_url, %err, "webhook notification failed");
        }
    }
}
