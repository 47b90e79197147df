use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "PROCESSING" => Ok(Self::Processing),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            _ => Err(Error::MalformedRow("status", "unrecognized job status")),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One uploaded audio file's lifecycle record.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub user_id: String,
    pub status: JobStatus,
    pub source_path: String,
    pub original_filename: String,
    pub transcript: Option<String>,
    pub processing_started: Option<i64>,
    pub processing_ended: Option<i64>,
    pub error_message: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Word-level record produced by first-pass ASR.
#[derive(Debug, Clone)]
pub struct Segment {
    pub id: String,
    pub job_id: String,
    pub word: String,
    pub start: f64,
    pub end: f64,
    pub confidence: f64,
}

/// One word as it comes out of the ASR client, before it has a row id.
#[derive(Debug, Clone)]
pub struct NewSegment {
    pub word: String,
    pub start: f64,
    pub end: f64,
    pub confidence: f64,
}

/// Audit record for one attempted second-pass correction.
#[derive(Debug, Clone)]
pub struct Correction {
    pub id: String,
    pub segment_id: String,
    pub original_text: String,
    pub corrected_text: String,
    pub trigger_confidence: f64,
    pub clip_path: Option<String>,
    pub clip_start: f64,
    pub clip_end: f64,
    pub edit_distance: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct NewCorrection {
    pub segment_id: String,
    pub original_text: String,
    pub corrected_text: String,
    pub trigger_confidence: f64,
    pub clip_path: Option<String>,
    pub clip_start: f64,
    pub clip_end: f64,
    pub edit_distance: i64,
}
