//! The orchestrator: claims jobs, runs the two-pass pipeline, and reports
//! outcomes. Everything here is sequential and single-job-in-flight, per
//! the scheduling model: concurrent second-pass calls wouldn't help
//! because the slow model is the bottleneck resource regardless of how
//! many windows are queued up.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use retrace_clustering::Word;
use retrace_notify::{Notifier, WebhookSink};
use retrace_reconcile::CorrectionCandidate;
use retrace_store::{JobStatus, NewCorrection, NewSegment, Store};

/// How long a job may sit in `PROCESSING` before the startup sweep
/// considers it abandoned by a crashed worker.
pub const DEFAULT_STALE_PROCESSING_AFTER: Duration = Duration::from_secs(60 * 60);

/// Narrow seam over [`retrace_asr_client::AsrClient`] so pipeline tests can
/// substitute a fake first-pass recognizer.
pub trait AsrBackend: Send + Sync {
    fn transcribe(
        &self,
        audio_path: &Path,
    ) -> impl Future<Output = Result<retrace_asr_client::Transcription, retrace_asr_client::Error>> + Send;
}

impl AsrBackend for retrace_asr_client::AsrClient {
    async fn transcribe(
        &self,
        audio_path: &Path,
    ) -> Result<retrace_asr_client::Transcription, retrace_asr_client::Error> {
        retrace_asr_client::AsrClient::transcribe(self, audio_path).await
    }
}

/// Narrow seam over [`retrace_audio_slicer::AudioSlicer`].
pub trait SliceBackend: Send + Sync {
    fn slice(
        &self,
        request: &retrace_audio_slicer::SliceRequest,
    ) -> impl Future<Output = Result<(), retrace_audio_slicer::Error>> + Send;
}

impl SliceBackend for retrace_audio_slicer::AudioSlicer {
    async fn slice(
        &self,
        request: &retrace_audio_slicer::SliceRequest,
    ) -> Result<(), retrace_audio_slicer::Error> {
        retrace_audio_slicer::AudioSlicer::slice(self, request).await
    }
}

/// Narrow seam over [`retrace_multimodal_client::MultimodalClient`].
pub trait MultimodalBackend: Send + Sync {
    fn retranscribe(
        &self,
        clip_path: &Path,
    ) -> impl Future<Output = Result<String, retrace_multimodal_client::Error>> + Send;
}

impl MultimodalBackend for retrace_multimodal_client::MultimodalClient {
    async fn retranscribe(&self, clip_path: &Path) -> Result<String, retrace_multimodal_client::Error> {
        retrace_multimodal_client::MultimodalClient::retranscribe(self, clip_path).await
    }
}

/// Looks up the webhook URL to notify for a given user. The core spec has
/// no user/account store, so callers may wire this to whatever registry
/// they have; [`StaticWebhookResolver`] is the degenerate case of one
/// webhook for every job.
pub trait WebhookResolver: Send + Sync {
    fn resolve(&self, user_id: &str) -> Option<String>;
}

pub struct StaticWebhookResolver(pub Option<String>);

impl WebhookResolver for StaticWebhookResolver {
    fn resolve(&self, _user_id: &str) -> Option<String> {
        self.0.clone()
    }
}

pub struct PipelineParams {
    pub confidence_threshold: f64,
    pub proximity_seconds: f64,
    pub correction_window_seconds: f64,
    pub clip_dir: PathBuf,
    pub poll_interval: Duration,
}

pub struct Worker<A, Sl, M, W, R> {
    store: Arc<Store>,
    asr: A,
    slicer: Sl,
    multimodal: M,
    notifier: Notifier<W>,
    webhook_resolver: R,
    params: PipelineParams,
}

impl<A, Sl, M, W, R> Worker<A, Sl, M, W, R>
where
    A: AsrBackend,
    Sl: SliceBackend,
    M: MultimodalBackend,
    W: WebhookSink,
    R: WebhookResolver,
{
    pub fn new(
        store: Arc<Store>,
        asr: A,
        slicer: Sl,
        multimodal: M,
        notifier: Notifier<W>,
        webhook_resolver: R,
        params: PipelineParams,
    ) -> Self {
        Self { store, asr, slicer, multimodal, notifier, webhook_resolver, params }
    }

    /// Main loop. Runs the startup sweep once, then alternates between
    /// claiming and processing a job and sleeping `poll_interval`, until
    /// `shutdown` reports true. A job already in flight always runs to
    /// completion: shutdown is only checked between iterations.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        match self.store.sweep_stale_processing(DEFAULT_STALE_PROCESSING_AFTER).await {
            Ok(reclaimed) if !reclaimed.is_empty() => {
                tracing::warn!(count = reclaimed.len(), "reclaimed stale PROCESSING jobs at startup");
            }
            Ok(_) => {}
            Err(err) => tracing::error!(%err, "startup sweep failed"),
        }

        loop {
            if *shutdown.borrow() {
                tracing::info!("shutdown requested, stopping worker loop");
                break;
            }

            match self.store.claim_next_pending().await {
                Ok(Some(job)) => self.process_job(job).await,
                Ok(None) => {}
                Err(err) => tracing::error!(%err, "failed to claim next pending job"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.params.poll_interval) => {}
                _ = shutdown.changed() => {}
            }
        }
    }

    async fn process_job(&self, job: retrace_store::Job) {
        let webhook_url = self.webhook_resolver.resolve(&job.user_id);

        if let Some(url) = &webhook_url {
            self.notifier.job_started(url, &job.original_filename).await;
        }

        let start = std::time::Instant::now();

        match self.run_pipeline(&job).await {
            Ok(outcome) => {
                if let Some(url) = &webhook_url {
                    self.notifier
                        .job_completed(
                            url,
                            &job.original_filename,
                            start.elapsed().as_millis() as i64,
                            outcome.applied_corrections,
                        )
                        .await;
                }
            }
            Err(err) => {
                let message = err.to_string();
                tracing::error!(job_id = %job.id, error = %message, "job failed");
                if let Err(store_err) = self.store.finalize_failure(&job.id, &message).await {
                    tracing::error!(job_id = %job.id, error = %store_err, "failed to record job failure");
                }
                if let Some(url) = &webhook_url {
                    self.notifier.job_failed(url, &job.original_filename, &message).await;
                }
            }
        }
    }

    async fn run_pipeline(&self, job: &retrace_store::Job) -> Result<PipelineOutcome, PipelineError> {
        let transcription = self.asr.transcribe(Path::new(&job.source_path)).await?;

        let new_segments: Vec<NewSegment> = transcription
            .words
            .iter()
            .map(|w| NewSegment { word: w.text.clone(), start: w.start, end: w.end, confidence: w.confidence })
            .collect();
        self.store.save_segments(&job.id, &new_segments).await?;

        let mut clusters = retrace_clustering::cluster(
            &transcription.words,
            self.params.confidence_threshold,
            self.params.proximity_seconds,
            self.params.correction_window_seconds,
        );

        if let Some(duration) = transcription.duration {
            for cluster in &mut clusters {
                cluster.clip_end = cluster.clip_end.min(duration);
                cluster.clip_start = cluster.clip_start.min(cluster.clip_end);
            }
        }

        let mut candidates = Vec::with_capacity(clusters.len());
        for cluster in &clusters {
            match self.process_window(job, &transcription.words, cluster).await {
                Ok(candidate) => candidates.push(candidate),
                Err(err) => {
                    tracing::warn!(job_id = %job.id, error = %err, "window failed, skipping correction");
                }
            }
        }

        let merge_result = retrace_reconcile::merge(&transcription.words, &candidates);
        self.store.finalize_success(&job.id, &merge_result.text).await?;

        Ok(PipelineOutcome { applied_corrections: merge_result.applied_corrections })
    }

    /// Runs slice -> multimodal -> reconcile -> persist -> cleanup for a
    /// single cluster. Any failure here is scoped to this window only; the
    /// caller logs and moves on to the next cluster.
    async fn process_window(
        &self,
        job: &retrace_store::Job,
        words: &[Word],
        cluster: &retrace_clustering::Cluster,
    ) -> Result<CorrectionCandidate, WindowError> {
        let clip_path = retrace_audio_slicer::clip_path_for(
            &self.params.clip_dir,
            &job.id,
            cluster.clip_start,
            cluster.clip_end,
        );

        let slice_request = retrace_audio_slicer::SliceRequest::new(
            &job.source_path,
            &clip_path,
            cluster.clip_start,
            cluster.clip_end - cluster.clip_start,
        )
        .map_err(WindowError::Slice)?;

        self.slicer.slice(&slice_request).await.map_err(WindowError::SliceRun)?;

        let corrected_text = match self.multimodal.retranscribe(&clip_path).await {
            Ok(text) => text,
            Err(err) => {
                cleanup_clip(&clip_path);
                return Err(WindowError::Multimodal(err));
            }
        };

        let evaluation =
            retrace_reconcile::evaluate(words, &corrected_text, cluster.clip_start, cluster.clip_end);

        if let Ok(Some(segment)) =
            self.store.find_segment_in_range(&job.id, cluster.clip_start, cluster.clip_end).await
        {
            let record = NewCorrection {
                segment_id: segment.id,
                original_text: evaluation.original_text.clone(),
                corrected_text: evaluation.corrected_text.clone(),
                trigger_confidence: cluster.average_confidence,
                clip_path: Some(clip_path.display().to_string()),
                clip_start: cluster.clip_start,
                clip_end: cluster.clip_end,
                edit_distance: evaluation.levenshtein_distance as i64,
            };
            if let Err(err) = self.store.save_correction(record).await {
                tracing::warn!(job_id = %job.id, error = %err, "failed to persist correction audit row");
            }
        } else {
            tracing::warn!(job_id = %job.id, "no segment anchor found for cluster, correction not recorded");
        }

        cleanup_clip(&clip_path);

        Ok(CorrectionCandidate {
            clip_start: cluster.clip_start,
            clip_end: cluster.clip_end,
            corrected_text: evaluation.corrected_text,
            should_apply: evaluation.should_apply,
        })
    }
}

fn cleanup_clip(path: &Path) {
    if let Err(err) = std::fs::remove_file(path) {
        tracing::warn!(path = %path.display(), error = %err, "failed to remove scratch clip (best-effort)");
    }
}

struct PipelineOutcome {
    applied_corrections: usize,
}

#[derive(Debug, thiserror::Error)]
enum WindowError {
    #[error("invalid slice request: {0}")]
    Slice(retrace_audio_slicer::Error),
    #[error("slicing failed: {0}")]
    SliceRun(retrace_audio_slicer::Error),
    #[error("second-pass call failed: {0}")]
    Multimodal(retrace_multimodal_client::Error),
}

/// Job-level fatal errors: anything reaching here transitions the job to
/// `FAILED`.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("first-pass transcription failed: {0}")]
    Asr(#[from] retrace_asr_client::Error),
    #[error("store error: {0}")]
    Store(#[from] retrace_store::Error),
}

/// Returns a receiver that flips to `true` on SIGINT/SIGTERM, for callers
/// that want to wire [`Worker::run`] to process signals directly.
#[cfg(unix)]
pub fn shutdown_watch() -> tokio::sync::watch::Receiver<bool> {
    let (tx, rx) = tokio::sync::watch::channel(false);

    tokio::spawn(async move {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }

        tracing::info!("termination signal received");
        let _ = tx.send(true);
    });

    rx
}

#[cfg(not(unix))]
pub fn shutdown_watch() -> tokio::sync::watch::Receiver<bool> {
    let (tx, rx) = tokio::sync::watch::channel(false);

    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("termination signal received");
        let _ = tx.send(true);
    });

    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use retrace_asr_client::Transcription;
    use retrace_notify::WebhookPayload;
    use std::sync::Mutex;

    struct FakeAsr {
        words: Vec<Word>,
        duration: Option<f64>,
    }

    impl AsrBackend for FakeAsr {
        async fn transcribe(&self, _audio_path: &Path) -> Result<Transcription, retrace_asr_client::Error> {
            let text = self.words.iter().map(|w| w.text.as_str()).collect::<Vec<_>>().join(" ");
            Ok(Transcription { text, words: self.words.clone(), duration: self.duration })
        }
    }

    struct FakeSlicer;

    impl SliceBackend for FakeSlicer {
        async fn slice(
            &self,
            request: &retrace_audio_slicer::SliceRequest,
        ) -> Result<(), retrace_audio_slicer::Error> {
            std::fs::write(&request.output_path, b"fake-clip").unwrap();
            Ok(())
        }
    }

    struct FakeMultimodal {
        response: String,
    }

    impl MultimodalBackend for FakeMultimodal {
        async fn retranscribe(&self, _clip_path: &Path) -> Result<String, retrace_multimodal_client::Error> {
            Ok(self.response.clone())
        }
    }

    struct NullSink;

    impl WebhookSink for NullSink {
        async fn post(&self, _url: &str, _payload: WebhookPayload) -> retrace_notify::Result<()> {
            Ok(())
        }
    }

    fn w(text: &str, start: f64, end: f64, confidence: f64) -> Word {
        Word { text: text.to_string(), start, end, confidence }
    }

    async fn new_store() -> (Arc<Store>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("jobs.db")).await.unwrap();
        (Arc::new(store), dir)
    }

    #[tokio::test]
    async fn job_with_no_low_confidence_words_completes_with_original_text() {
        let (store, _dir) = new_store().await;
        let source_dir = tempfile::tempdir().unwrap();
        let source_path = source_dir.path().join("clip.wav");
        std::fs::write(&source_path, b"audio-bytes").unwrap();

        let job = store
            .enqueue("user-1", source_path.to_str().unwrap(), "clip.wav")
            .await
            .unwrap();
        store.claim_next_pending().await.unwrap();

        let words = vec![w("hello", 0.0, 0.5, 0.95), w("world", 0.5, 1.0, 0.92)];

        let worker = Worker::new(
            store.clone(),
            FakeAsr { words, duration: Some(1.0) },
            FakeSlicer,
            FakeMultimodal { response: "unused".to_string() },
            Notifier::new(NullSink, "retrace"),
            StaticWebhookResolver(None),
            PipelineParams {
                confidence_threshold: 0.60,
                proximity_seconds: 5.0,
                correction_window_seconds: 20.0,
                clip_dir: source_dir.path().to_path_buf(),
                poll_interval: Duration::from_millis(10),
            },
        );

        let outcome = worker.run_pipeline(&job).await.unwrap();
        assert_eq!(outcome.applied_corrections, 0);

        let updated = store.find_job(&job.id).await.unwrap().unwrap();
        assert!(matches!(updated.status, JobStatus::Completed));
        assert_eq!(updated.transcript.as_deref(), Some("hello world"));
    }

    #[tokio::test]
    async fn job_with_low_confidence_word_applies_accepted_correction() {
        let (store, _dir) = new_store().await;
        let source_dir = tempfile::tempdir().unwrap();
        let source_path = source_dir.path().join("clip.wav");
        std::fs::write(&source_path, b"audio-bytes").unwrap();

        let job = store
            .enqueue("user-1", source_path.to_str().unwrap(), "clip.wav")
            .await
            .unwrap();
        store.claim_next_pending().await.unwrap();

        let words = vec![w("Hello", 0.0, 0.5, 0.95), w("mumbly", 0.5, 1.0, 0.3), w("world", 1.0, 1.5, 0.95)];

        let worker = Worker::new(
            store.clone(),
            FakeAsr { words, duration: Some(1.5) },
            FakeSlicer,
            FakeMultimodal { response: "humbly".to_string() },
            Notifier::new(NullSink, "retrace"),
            StaticWebhookResolver(None),
            PipelineParams {
                confidence_threshold: 0.60,
                proximity_seconds: 5.0,
                correction_window_seconds: 1.0,
                clip_dir: source_dir.path().to_path_buf(),
                poll_interval: Duration::from_millis(10),
            },
        );

        let outcome = worker.run_pipeline(&job).await.unwrap();
        assert_eq!(outcome.applied_corrections, 1);

        let updated = store.find_job(&job.id).await.unwrap().unwrap();
        assert!(matches!(updated.status, JobStatus::Completed));
        assert!(updated.transcript.as_deref().unwrap().contains("humbly"));

        let segments = store.list_segments(&job.id).await.unwrap();
        assert_eq!(segments.len(), 3);
    }

    #[tokio::test]
    async fn correction_window_is_clamped_to_reported_audio_duration() {
        struct RecordingSlicer {
            requests: Mutex<Vec<retrace_audio_slicer::SliceRequest>>,
        }

        impl SliceBackend for RecordingSlicer {
            async fn slice(
                &self,
                request: &retrace_audio_slicer::SliceRequest,
            ) -> Result<(), retrace_audio_slicer::Error> {
                self.requests.lock().unwrap().push(request.clone());
                std::fs::write(&request.output_path, b"fake-clip").unwrap();
                Ok(())
            }
        }

        let (store, _dir) = new_store().await;
        let source_dir = tempfile::tempdir().unwrap();
        let source_path = source_dir.path().join("clip.wav");
        std::fs::write(&source_path, b"audio-bytes").unwrap();

        let job = store
            .enqueue("user-1", source_path.to_str().unwrap(), "clip.wav")
            .await
            .unwrap();
        store.claim_next_pending().await.unwrap();

        // One low-confidence word near the end of a 2-second file. The
        // default 20-second correction window would center a clip well
        // past the file's actual duration without clamping.
        let words = vec![w("Hello", 0.0, 1.0, 0.95), w("mumbly", 1.0, 1.8, 0.3)];
        let file_duration = 2.0;

        let slicer = RecordingSlicer { requests: Mutex::new(Vec::new()) };

        let worker = Worker::new(
            store.clone(),
            FakeAsr { words, duration: Some(file_duration) },
            slicer,
            FakeMultimodal { response: "humbly".to_string() },
            Notifier::new(NullSink, "retrace"),
            StaticWebhookResolver(None),
            PipelineParams {
                confidence_threshold: 0.60,
                proximity_seconds: 5.0,
                correction_window_seconds: 20.0,
                clip_dir: source_dir.path().to_path_buf(),
                poll_interval: Duration::from_millis(10),
            },
        );

        worker.run_pipeline(&job).await.unwrap();

        let requests = worker.slicer.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        let clip_end = requests[0].start + requests[0].duration;
        assert!(clip_end <= file_duration, "clip end {clip_end} exceeds file duration {file_duration}");
    }

    #[tokio::test]
    async fn asr_failure_finalizes_job_as_failed() {
        struct BrokenAsr;
        impl AsrBackend for BrokenAsr {
            async fn transcribe(&self, _audio_path: &Path) -> Result<Transcription, retrace_asr_client::Error> {
                Err(retrace_asr_client::Error::Api {
                    status: reqwest::StatusCode::INTERNAL_SERVER_ERROR,
                    body: "boom".to_string(),
                })
            }
        }

        let (store, _dir) = new_store().await;
        let source_dir = tempfile::tempdir().unwrap();
        let source_path = source_dir.path().join("clip.wav");
        std::fs::write(&source_path, b"audio-bytes").unwrap();

        let job = store
            .enqueue("user-1", source_path.to_str().unwrap(), "clip.wav")
            .await
            .unwrap();
        store.claim_next_pending().await.unwrap();

        let calls = Arc::new(Mutex::new(Vec::new()));

        struct RecordingSink {
            calls: Arc<Mutex<Vec<String>>>,
        }
        impl WebhookSink for RecordingSink {
            async fn post(&self, _url: &str, payload: WebhookPayload) -> retrace_notify::Result<()> {
                self.calls.lock().unwrap().push(payload.embeds[0].title.clone());
                Ok(())
            }
        }

        let worker = Worker::new(
            store.clone(),
            BrokenAsr,
            FakeSlicer,
            FakeMultimodal { response: "unused".to_string() },
            Notifier::new(RecordingSink { calls: calls.clone() }, "retrace"),
            StaticWebhookResolver(Some("https://example.com/webhook".to_string())),
            PipelineParams {
                confidence_threshold: 0.60,
                proximity_seconds: 5.0,
                correction_window_seconds: 20.0,
                clip_dir: source_dir.path().to_path_buf(),
                poll_interval: Duration::from_millis(10),
            },
        );

        worker.process_job(job.clone()).await;

        let updated = store.find_job(&job.id).await.unwrap().unwrap();
        assert!(matches!(updated.status, JobStatus::Failed));
        assert!(updated.error_message.is_some());
        assert_eq!(calls.lock().unwrap().as_slice(), ["Transcription failed"]);
    }
}
