//! Client for the first-pass, word-level speech recognizer.
//!
//! Deliberately carries no retry logic: a failed first-pass call fails the
//! whole job, and retry policy for that is the worker's call, not this
//! client's.

use std::path::Path;

use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use retrace_clustering::Word;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read audio file {path}: {source}")]
    ReadFile { path: String, source: std::io::Error },

    #[error("request to ASR endpoint failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("ASR endpoint returned {status}: {body}")]
    Api { status: reqwest::StatusCode, body: String },
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Deserialize)]
struct AsrResponse {
    text: String,
    #[allow(dead_code)]
    language: Option<String>,
    duration: Option<f64>,
    words: Vec<AsrWord>,
}

#[derive(Debug, Deserialize)]
struct AsrWord {
    word: String,
    start: f64,
    end: f64,
    probability: f64,
}

/// Full first-pass transcription: plain text plus the word-level sequence
/// clustering and reconciliation operate on.
#[derive(Debug, Clone)]
pub struct Transcription {
    pub text: String,
    pub words: Vec<Word>,
    /// Duration of the source audio in seconds, when the endpoint reports
    /// one. Used downstream to keep correction windows inside the file.
    pub duration: Option<f64>,
}

pub struct AsrClient {
    http: reqwest::Client,
    url: String,
    model: String,
}

impl AsrClient {
    pub fn new(http: reqwest::Client, url: impl Into<String>, model: impl Into<String>) -> Self {
        Self { http, url: url.into(), model: model.into() }
    }

    pub async fn transcribe(&self, audio_path: &Path) -> Result<Transcription> {
        let bytes = tokio::fs::read(audio_path).await.map_err(|source| Error::ReadFile {
            path: audio_path.display().to_string(),
            source,
        })?;

        let file_name = audio_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio".to_string());

        let form = Form::new()
            .part("file", Part::bytes(bytes).file_name(file_name))
            .text("model", self.model.clone())
            .text("response_format", "verbose_json")
            .text("timestamp_granularities[]", "word");

        let response = self.http.post(&self.url).multipart(form).send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(%status, %body, "asr endpoint returned an error");
            return Err(Error::Api { status, body });
        }

        let parsed: AsrResponse = response.json().await?;

        let words = parsed
            .words
            .into_iter()
            .map(|w| Word { text: w.word, start: w.start, end: w.end, confidence: w.probability })
            .collect();

        Ok(Transcription { text: parsed.text, words, duration: parsed.duration })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn transcribe_parses_words_and_confidence() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/audio/transcriptions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "text": "hello world",
                "language": "en",
                "duration": 1.0,
                "segments": [],
                "words": [
                    {"word": "hello", "start": 0.0, "end": 0.5, "probability": 0.95},
                    {"word": "world", "start": 0.5, "end": 1.0, "probability": 0.42},
                ]
            })))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let audio_path = dir.path().join("clip.wav");
        std::fs::write(&audio_path, b"fake-pcm-bytes").unwrap();

        let client = AsrClient::new(
            reqwest::Client::new(),
            format!("{}/v1/audio/transcriptions", server.uri()),
            "whisper-1",
        );

        let transcription = client.transcribe(&audio_path).await.unwrap();

        assert_eq!(transcription.text, "hello world");
        assert_eq!(transcription.words.len(), 2);
        assert_eq!(transcription.words[1].confidence, 0.42);
        assert_eq!(transcription.duration, Some(1.0));
    }

    #[tokio::test]
    async fn non_2xx_response_is_surfaced_as_api_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/audio/transcriptions"))
            .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let audio_path = dir.path().join("clip.wav");
        std::fs::write(&audio_path, b"fake-pcm-bytes").unwrap();

        let client = AsrClient::new(
            reqwest::Client::new(),
            format!("{}/v1/audio/transcriptions", server.uri()),
            "whisper-1",
        );

        let result = client.transcribe(&audio_path).await;
        assert!(matches!(result, Err(Error::Api { .. })));
    }
}
