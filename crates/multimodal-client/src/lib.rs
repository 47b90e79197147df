//! Client for the second-pass multimodal corrector. Given a short clip, it
//! asks the model to re-transcribe literally, then strips the
//! conversational preambles these models like to prepend.

use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

const TEMPERATURE: f64 = 0.1;
const MAX_TOKENS: u32 = 500;

const SYSTEM_INSTRUCTION: &str =
    "You are a literal audio transcriber. Transcribe exactly what is said, \
     with no commentary, no translation, and no preamble. If the audio is \
     inaudible or unintelligible, respond with exactly [unintelligible].";

const USER_PROMPT: &str = "Transcribe this audio clip. Output only the raw \
     transcription text, nothing else. Use [unintelligible] for any part \
     you cannot make out.";

/// Leading conversational phrases the model tends to prepend, checked
/// case-insensitively with optional trailing colon/whitespace. Order
/// matters only in that longer variants are listed ahead of their
/// shorter prefixes.
const STRIPPED_PREAMBLES: &[&str] = &[
    "the speaker says:",
    "the speaker says",
    "here is the transcription:",
    "here's the transcription:",
    "transcription:",
    "the audio says:",
    "the text is:",
    "transcript:",
];

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read clip {path}: {source}")]
    ReadFile { path: String, source: std::io::Error },

    #[error("request to multimodal endpoint failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("multimodal endpoint returned {status}: {body}")]
    Api { status: reqwest::StatusCode, body: String },

    #[error("multimodal response had no choices")]
    EmptyResponse,
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: MessageContent,
}

#[derive(Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ContentPart {
    Audio { audio: String },
    Text { text: String },
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: String,
}

pub struct MultimodalClient {
    http: reqwest::Client,
    url: String,
    model: String,
}

impl MultimodalClient {
    pub fn new(http: reqwest::Client, url: impl Into<String>, model: impl Into<String>) -> Self {
        Self { http, url: url.into(), model: model.into() }
    }

    pub async fn retranscribe(&self, clip_path: &Path) -> Result<String> {
        let bytes = tokio::fs::read(clip_path).await.map_err(|source| Error::ReadFile {
            path: clip_path.display().to_string(),
            source,
        })?;
        let encoded = BASE64.encode(bytes);

        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: MessageContent::Text(SYSTEM_INSTRUCTION.to_string()),
                },
                ChatMessage {
                    role: "user",
                    content: MessageContent::Parts(vec![
                        ContentPart::Audio { audio: encoded },
                        ContentPart::Text { text: USER_PROMPT.to_string() },
                    ]),
                },
            ],
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        };

        let response = self.http.post(&self.url).json(&request).send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(%status, %body, "multimodal endpoint returned an error");
            return Err(Error::Api { status, body });
        }

        let parsed: ChatResponse = response.json().await?;
        let raw = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or(Error::EmptyResponse)?;

        Ok(strip_preamble(&raw))
    }
}

/// Trims whitespace and, if the text starts with one of the known
/// conversational preambles, removes it along with any colon and
/// whitespace immediately following. Internal punctuation and
/// capitalization of the remaining text are preserved untouched so
/// reconciliation can judge them.
fn strip_preamble(raw: &str) -> String {
    let trimmed = raw.trim();
    let lowered = trimmed.to_lowercase();

    for phrase in STRIPPED_PREAMBLES {
        if lowered.starts_with(phrase) {
            let mut rest = &trimmed[phrase.len()..];
            rest = rest.trim_start_matches(':').trim_start();
            return rest.to_string();
        }
    }

    trimmed.to_string()
}
