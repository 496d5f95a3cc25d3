//! Meeting recording worker binary.

use std::sync::Arc;

use anyhow::Context;
use mbot_queue::{QueueConfig, RedisQueue};
use mbot_recording::{StagingArea, UploadConfig};
use mbot_storage::{provider_from_env, FilesApiConfig};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mbot_worker::{
    metrics, CommandSource, JobStore, QueueConsumer, RecordingJob, UploadBackendKind, UploadRoute,
    WorkerConfig,
};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Worker failed: {:#}", e);
        std::process::exit(1);
    }
}

fn init_tracing() -> anyhow::Result<()> {
    // Colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))?
        .add_directive("mbot=info".parse()?)
        .add_directive("aws_config=warn".parse()?)
        .add_directive("hyper=warn".parse()?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .try_init()?;
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    // Install rustls crypto provider (required for TLS/HTTPS)
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        eprintln!("rustls crypto provider already installed");
    }

    dotenvy::dotenv().ok();
    init_tracing()?;

    info!("Starting mbot-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    if let Some(port) = config.metrics_port {
        metrics::init_exporter(port).context("failed to start Prometheus exporter")?;
        info!(port, "Prometheus metrics enabled");
    }

    tokio::fs::create_dir_all(&config.staging_dir)
        .await
        .with_context(|| format!("failed to create staging dir {}", config.staging_dir.display()))?;

    let route = match config.upload_backend {
        UploadBackendKind::FilesApi => UploadRoute::FilesApi(FilesApiConfig::from_env()),
        UploadBackendKind::Storage => {
            let provider = provider_from_env().context("storage provider misconfigured")?;
            UploadRoute::Storage(provider.multipart())
        }
    };

    let recording = RecordingJob::new(
        StagingArea::new(&config.staging_dir),
        Arc::new(CommandSource::new(config.recorder.clone())),
        route,
        UploadConfig {
            part_size: config.upload_part_size,
            ..UploadConfig::default()
        },
        config.storage_key_prefix.clone(),
    );

    let queue_config = QueueConfig::from_env();
    let poll_timeout = queue_config.poll_timeout;
    let queue = Arc::new(RedisQueue::new(queue_config).context("failed to create job queue")?);
    if let Err(e) = queue.ping().await {
        warn!("Redis not reachable yet, consumer will keep retrying: {}", e);
    }

    let store = JobStore::new(config.job_store.clone());
    let consumer = QueueConsumer::new(queue, store, Arc::new(recording), poll_timeout);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Received shutdown signal, finishing current job");
        let _ = shutdown_tx.send(true);
    });

    consumer.run(shutdown_rx).await;

    info!("Worker shutdown complete");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {}", e);
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    tokio::signal::ctrl_c().await.ok();
}
