//! Wraps an `ffmpeg` subprocess to cut fixed-format clips for the
//! second-pass corrector.
//!
//! Accurate seeking matters here: `-ss` must come after `-i` so ffmpeg
//! decodes from the start rather than snapping to the nearest keyframe,
//! which would shift the clip relative to the cluster window it's meant
//! to cover.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

const OUTPUT_SAMPLE_RATE: &str = "16000";
const OUTPUT_CHANNELS: &str = "1";
const OUTPUT_CODEC: &str = "pcm_s16le";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid slice request: {0}")]
    InvalidRequest(&'static str),

    #[error("failed to spawn ffmpeg at {path}: {source}")]
    Spawn { path: String, source: std::io::Error },

    #[error("ffmpeg exited with status {status}: {stderr}")]
    Failed { status: std::process::ExitStatus, stderr: String },
}

pub type Result<T> = std::result::Result<T, Error>;

/// A validated request to cut `[start, start + duration)` out of
/// `input_path` into `output_path`.
#[derive(Debug, Clone)]
pub struct SliceRequest {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub start: f64,
    pub duration: f64,
}

impl SliceRequest {
    pub fn new(
        input_path: impl Into<PathBuf>,
        output_path: impl Into<PathBuf>,
        start: f64,
        duration: f64,
    ) -> Result<Self> {
        if start < 0.0 {
            return Err(Error::InvalidRequest("start must be non-negative"));
        }
        if duration <= 0.0 {
            return Err(Error::InvalidRequest("duration must be positive"));
        }

        Ok(Self { input_path: input_path.into(), output_path: output_path.into(), start, duration })
    }
}

/// Builds a clip path that won't collide with another clip being cut
/// concurrently for the same job, even though today's worker only ever
/// slices one clip at a time.
pub fn clip_path_for(base_dir: &Path, job_id: &str, clip_start: f64, clip_end: f64) -> PathBuf {
    let wallclock = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();

    base_dir.join(format!(
        "{job_id}_{:.3}_{:.3}_{wallclock}.wav",
        clip_start, clip_end
    ))
}

pub struct AudioSlicer {
    ffmpeg_path: String,
}

impl AudioSlicer {
    pub fn new(ffmpeg_path: impl Into<String>) -> Self {
        Self { ffmpeg_path: ffmpeg_path.into() }
    }

    pub async fn slice(&self, request: &SliceRequest) -> Result<()> {
        let output = tokio::process::Command::new(&self.ffmpeg_path)
            .arg("-y")
            .arg("-i")
            .arg(&request.input_path)
            .arg("-ss")
            .arg(request.start.to_string())
            .arg("-t")
            .arg(request.duration.to_string())
            .arg("-ac")
            .arg(OUTPUT_CHANNELS)
            .arg("-ar")
            .arg(OUTPUT_SAMPLE_RATE)
            .arg("-c:a")
            .arg(OUTPUT_CODEC)
            .arg(&request.output_path)
            .output()
            .await
            .map_err(|source| Error::Spawn { path: self.ffmpeg_path.clone(), source })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            tracing::warn!(status = %output.status, %stderr, "ffmpeg slice failed");
            return Err(Error::Failed { status: output.status, stderr });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_start_is_rejected() {
        let result = SliceRequest::new("in.wav", "out.wav", -1.0, 5.0);
        assert!(matches!(result, Err(Error::InvalidRequest(_))));
    }

    #[test]
    fn zero_duration_is_rejected() {
        let result = SliceRequest::new("in.wav", "out.wav", 0.0, 0.0);
        assert!(matches!(result, Err(Error::InvalidRequest(_))));
    }

    #[test]
    fn valid_request_is_accepted() {
        let result = SliceRequest::new("in.wav", "out.wav", 0.0, 20.0);
        assert!(result.is_ok());
    }

    #[test]
    fn clip_paths_for_distinct_calls_do_not_collide() {
        let dir = Path::new("/tmp/retrace-clips");
        let a = clip_path_for(dir, "job-1", 0.0, 20.0);
        let b = clip_path_for(dir, "job-1", 0.0, 20.0);
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn missing_ffmpeg_binary_surfaces_spawn_error() {
        let slicer = AudioSlicer::new("/nonexistent/ffmpeg-binary");
        let request = SliceRequest::new("in.wav", "out.wav", 0.0, 1.0).unwrap();
        let result = slicer.slice(&request).await;
        assert!(matches!(result, Err(Error::Spawn { .. })));
    }
}
