use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use highlight_reel::config::AppConfig;
use highlight_reel::database::repositories::{
    JobRepository, SqlxJobRepository, SqlxStatsRepository, SqlxVideoRepository,
};
use highlight_reel::database::{CheckpointScheduler, Database};
use highlight_reel::logging::init_logging;
use highlight_reel::pipeline::concat::DEFAULT_CONCAT_TIMEOUT;
use highlight_reel::pipeline::{
    AssetResolver, FfmpegConcatenator, HttpDownloader, JobPipeline, Scheduler, StaleJobReaper,
};
use highlight_reel::providers::{CommandPublisher, NbaStatsClient};
use highlight_reel::utils::http_client::install_rustls_provider;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env().context("invalid configuration")?;

    // Hold the guard until exit so buffered log lines are flushed.
    let (logging, _log_guard) = init_logging(&config.log_dir)?;
    install_rustls_provider();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        database_url = %config.database_url,
        schedulers = config.scheduler_count,
        workers_per_scheduler = config.scheduler.workers,
        "Starting highlight-reel"
    );

    let db = Database::connect(&config.database_url, config.store_timeout)
        .await
        .context("failed to open database")?;
    db.migrate().await.context("failed to run migrations")?;

    let jobs: Arc<dyn JobRepository> = Arc::new(SqlxJobRepository::new(db.clone()));
    let provider = NbaStatsClient::new(
        &config.clip_provider_base_url,
        config.resolver.request_timeout,
    )?;
    let pipeline = Arc::new(JobPipeline::new(
        Arc::clone(&jobs),
        Arc::new(SqlxVideoRepository::new(db.clone())),
        Arc::new(SqlxStatsRepository::new(db.clone())),
        Arc::new(AssetResolver::new(Arc::new(provider), config.resolver.clone())),
        Arc::new(HttpDownloader::new(&config.download)?),
        Arc::new(FfmpegConcatenator::new(
            config.ffmpeg_path.clone(),
            DEFAULT_CONCAT_TIMEOUT,
        )),
        Arc::new(CommandPublisher::new(
            config.publish_command.clone(),
            config.publish_timeout,
        )),
        config.download.clone(),
        config.scratch_dir.clone(),
    ));

    let shutdown = CancellationToken::new();

    let schedulers: Vec<Scheduler> = (0..config.scheduler_count)
        .map(|id| {
            Scheduler::new(
                id,
                config.scheduler.clone(),
                Arc::clone(&jobs),
                Arc::clone(&pipeline),
                shutdown.child_token(),
            )
        })
        .collect();
    for scheduler in &schedulers {
        scheduler.start();
    }

    let mut background = vec![
        Arc::new(StaleJobReaper::new(Arc::clone(&jobs), config.reaper.clone()))
            .start(shutdown.child_token()),
        Arc::new(CheckpointScheduler::new(db.clone(), config.checkpoint.clone()))
            .start(shutdown.child_token()),
    ];
    background.push(logging.start_retention_cleanup(shutdown.child_token()));

    info!("highlight-reel running; press Ctrl-C to stop");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");

    shutdown.cancel();
    for scheduler in &schedulers {
        scheduler.stop().await;
    }
    for handle in background {
        if let Err(e) = handle.await {
            error!("Background task ended abnormally: {}", e);
        }
    }

    db.close().await;
    info!("highlight-reel stopped");
    Ok(())
}
