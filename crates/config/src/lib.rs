use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

fn default_confidence_threshold() -> f64 {
    0.60
}

fn default_proximity_seconds() -> f64 {
    5.0
}

fn default_correction_window_seconds() -> f64 {
    20.0
}

fn default_poll_interval_ms() -> u64 {
    3000
}

fn default_asr_model() -> String {
    "whisper-1".to_string()
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./data/jobs.db")
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("./data/uploads")
}

fn default_clip_dir() -> PathBuf {
    PathBuf::from("./data/clips")
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn filter_empty<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.filter(|s| !s.is_empty()))
}

/// Immutable worker configuration, read once at process startup.
///
/// Field names here are the lowercased, stripped form of the environment
/// variables in the crate root docs; `envy` maps `ASR_URL` -> `asr_url`.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    #[serde(default = "default_proximity_seconds")]
    pub clustering_proximity_seconds: f64,
    #[serde(default = "default_correction_window_seconds")]
    pub correction_window_seconds: f64,
    #[serde(default = "default_poll_interval_ms")]
    pub worker_poll_interval_ms: u64,

    pub asr_url: String,
    #[serde(default = "default_asr_model")]
    pub asr_model: String,

    pub multimodal_url: String,
    pub multimodal_model: String,

    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
    #[serde(default = "default_clip_dir")]
    pub clip_dir: PathBuf,

    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,

    #[serde(default, deserialize_with = "filter_empty")]
    pub sentry_dsn: Option<String>,

    /// The core spec has no per-user account/webhook registry; this is the
    /// one webhook every job's lifecycle notifications go to.
    #[serde(default, deserialize_with = "filter_empty")]
    pub webhook_url: Option<String>,
}

impl Config {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.worker_poll_interval_ms)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to load configuration from environment: {0}")]
    Env(#[from] envy::Error),
}

/// Loads configuration from the process environment, first merging in a
/// `.env` file at `dotenv_path` if one exists. Missing optional `.env`
/// files are not an error; a missing required variable (e.g. `ASR_URL`) is.
pub fn load(dotenv_path: impl AsRef<Path>) -> Result<Config, Error> {
    let _ = dotenvy::from_path(dotenv_path.as_ref());
    envy::from_env::<Config>().map_err(Error::from)
}
