use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::prelude::*;

use retrace_notify::{Notifier, ReqwestWebhookSink};
use retrace_worker::{PipelineParams, StaticWebhookResolver, Worker};

fn main() -> std::io::Result<()> {
    let config = retrace_config::load(".env").unwrap_or_else(|err| {
        eprintln!("error: failed to load configuration: {err}");
        std::process::exit(1);
    });

    let _sentry_guard = config.sentry_dsn.as_ref().map(|dsn| {
        sentry::init(sentry::ClientOptions {
            dsn: dsn.parse().ok(),
            release: option_env!("CARGO_PKG_VERSION").map(|v| format!("retrace-worker@{v}").into()),
            environment: Some(
                if cfg!(debug_assertions) { "development" } else { "production" }.into(),
            ),
            traces_sample_rate: 1.0,
            attach_stacktrace: true,
            ..Default::default()
        })
    });

    let sentry_layer = config.sentry_dsn.is_some().then(sentry_tracing::layer);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(sentry_layer)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(config));

    if let Some(client) = sentry::Hub::current().client() {
        client.close(Some(Duration::from_secs(2)));
    }

    Ok(())
}

async fn run(config: retrace_config::Config) {
    let store = match retrace_store::Store::open(&config.database_path).await {
        Ok(store) => Arc::new(store),
        Err(err) => {
            tracing::error!(%err, "failed to open store");
            std::process::exit(1);
        }
    };

    if let Err(err) = tokio::fs::create_dir_all(&config.clip_dir).await {
        tracing::error!(%err, dir = %config.clip_dir.display(), "failed to create clip directory");
        std::process::exit(1);
    }

    let http = reqwest::Client::new();

    let asr = retrace_asr_client::AsrClient::new(http.clone(), config.asr_url.clone(), config.asr_model.clone());
    let slicer = retrace_audio_slicer::AudioSlicer::new(config.ffmpeg_path.clone());
    let multimodal = retrace_multimodal_client::MultimodalClient::new(
        http.clone(),
        config.multimodal_url.clone(),
        config.multimodal_model.clone(),
    );
    let notifier = Notifier::new(ReqwestWebhookSink::new(http), "retrace");
    let webhook_resolver = StaticWebhookResolver(config.webhook_url.clone());

    let params = PipelineParams {
        confidence_threshold: config.confidence_threshold,
        proximity_seconds: config.clustering_proximity_seconds,
        correction_window_seconds: config.correction_window_seconds,
        clip_dir: config.clip_dir.clone(),
        poll_interval: config.poll_interval(),
    };

    let worker = Worker::new(store, asr, slicer, multimodal, notifier, webhook_resolver, params);

    tracing::info!(
        asr_url = %config.asr_url,
        multimodal_url = %config.multimodal_url,
        poll_interval_ms = %config.worker_poll_interval_ms,
        "retrace_worker_starting"
    );

    let shutdown = retrace_worker::shutdown_watch();
    worker.run(shutdown).await;

    tracing::info!("retrace_worker_stopped");
}
