//! Render worker binary.
//!
//! Scripts given as arguments are submitted as jobs on startup.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use animq_models::NewJob;
use animq_queue::QueueConfig;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use animq_worker::{
    metrics, recover_interrupted, CleanupConfig, InMemoryJobRepository, JobRepository,
    WorkerConfig, WorkerContext,
};

const QUEUE_REPORT_INTERVAL: Duration = Duration::from_secs(60);

fn init_tracing() -> anyhow::Result<()> {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env().add_directive("animq=info".parse()?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(true).with_target(true))
            .with(env_filter)
            .init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing()?;

    info!("Starting animq-worker");

    if let Ok(addr) = std::env::var("METRICS_ADDR") {
        let addr = addr.parse().context("Invalid METRICS_ADDR")?;
        metrics::install_exporter(addr).context("Failed to install metrics exporter")?;
        info!("Serving metrics on {}", addr);
    }

    let config = WorkerConfig::from_env();
    config.validate()?;
    info!("Worker config: {:?}", config);
    let cleanup_config = CleanupConfig::from_env();

    let backend = animq_queue::connect(&QueueConfig::from_env())
        .await
        .context("Failed to connect to job queue")?;
    let repo: Arc<dyn JobRepository> = Arc::new(InMemoryJobRepository::new());
    let ctx = WorkerContext::new(config, Arc::clone(&repo), backend);

    recover_interrupted(&ctx.status, &ctx.queue).await?;

    let owner = std::env::var("ANIMQ_OWNER").unwrap_or_else(|_| "local".to_string());
    for path in std::env::args().skip(1) {
        let script = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read script {path}"))?;
        let job = repo.create(NewJob::new(owner.clone(), script)).await?;
        ctx.queue.enqueue(&job.id).await?;
        info!(job_id = %job.id, "Submitted {}", path);
    }

    let shutdown = CancellationToken::new();
    ctx.pool.start(&shutdown)?;

    let background = CancellationToken::new();
    let cleanup_handle = if cleanup_config.enabled {
        let interval = cleanup_config.interval;
        Some(ctx.cleanup(cleanup_config).start_periodic(background.clone(), interval))
    } else {
        warn!("Cleanup disabled");
        None
    };

    let queue = Arc::clone(&ctx.queue);
    let reporter_cancel = background.clone();
    let reporter = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(QUEUE_REPORT_INTERVAL);
        loop {
            tokio::select! {
                _ = reporter_cancel.cancelled() => break,
                _ = ticker.tick() => match queue.status().await {
                    Ok(snapshot) => info!(size = snapshot.size, "Queue status"),
                    Err(e) => warn!("Failed to read queue status: {}", e),
                },
            }
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Received shutdown signal");

    background.cancel();
    ctx.pool.stop().await;
    shutdown.cancel();

    if let Some(handle) = cleanup_handle {
        if let Err(e) = handle.await {
            error!("Cleanup task failed: {}", e);
        }
    }
    reporter.await.ok();

    info!("Worker shutdown complete");
    Ok(())
}
