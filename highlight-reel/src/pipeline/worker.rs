//! The per-job pipeline a worker runs, from claimed job to published video.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::concat::{Concatenator, write_manifest};
use super::download::{DownloadConfig, Downloader, download_all};
use super::metadata::publish_request;
use super::resolver::AssetResolver;
use crate::database::repositories::{JobRepository, StatsRepository, VideoRepository};
use crate::domain::{Job, JobState};
use crate::providers::Publisher;
use crate::utils::fs::ensure_dir_all;
use crate::{Error, Result};

/// Diagnostic stored on a failed job.
pub fn error_details(worker_id: &str, job_hash: &str, err: &Error) -> String {
    format!("WorkerID: {worker_id}\n\tJob Hash: {job_hash}\n\tError: {err}")
}

/// Everything a worker needs to take a job from PROCESSING to a terminal state.
pub struct JobPipeline {
    jobs: Arc<dyn JobRepository>,
    videos: Arc<dyn VideoRepository>,
    stats: Arc<dyn StatsRepository>,
    resolver: Arc<AssetResolver>,
    downloader: Arc<dyn Downloader>,
    concatenator: Arc<dyn Concatenator>,
    publisher: Arc<dyn Publisher>,
    download: DownloadConfig,
    scratch_dir: PathBuf,
}

impl JobPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        videos: Arc<dyn VideoRepository>,
        stats: Arc<dyn StatsRepository>,
        resolver: Arc<AssetResolver>,
        downloader: Arc<dyn Downloader>,
        concatenator: Arc<dyn Concatenator>,
        publisher: Arc<dyn Publisher>,
        download: DownloadConfig,
        scratch_dir: PathBuf,
    ) -> Self {
        Self {
            jobs,
            videos,
            stats,
            resolver,
            downloader,
            concatenator,
            publisher,
            download,
            scratch_dir,
        }
    }

    /// Run a claimed job to FINISHED, returning the published URL.
    ///
    /// On failure the job is moved to ERROR with the cause attached and the
    /// error is returned. Failed jobs are not retried.
    pub async fn run(&self, worker_id: &str, job: &Job) -> Result<String> {
        let mut state = JobState::Processing;
        match self.execute(job, &mut state).await {
            Ok(url) => {
                info!(worker_id, job_id = job.id, slug = %job.slug, url = %url, "Job finished");
                Ok(url)
            }
            Err(e) => {
                error!(worker_id, job_id = job.id, slug = %job.slug, state = %state, "Job failed: {}", e);
                let details = error_details(worker_id, &job.hash, &e);
                match self
                    .jobs
                    .transition(job.id, job.claim, state, JobState::Error, Some(&details))
                    .await
                {
                    Ok(()) => {}
                    Err(conflict @ Error::StateConflict { .. }) => {
                        warn!(worker_id, job_id = job.id, "Job was reclaimed before it could fail: {}", conflict);
                    }
                    Err(record_err) => {
                        error!(worker_id, job_id = job.id, "Failed to record job error: {}", record_err);
                    }
                }
                Err(e)
            }
        }
    }

    /// Fail a job whose run ended without reporting back, e.g. a panic.
    ///
    /// The job's last stored state is read back and moved to ERROR under the
    /// worker's claim. A job already terminal or claimed again is left alone.
    pub async fn record_abort(&self, worker_id: &str, job: &Job, reason: &str) {
        let state = match self.jobs.get_job(job.id).await.and_then(|model| model.state()) {
            Ok(state) => state,
            Err(e) => {
                error!(worker_id, job_id = job.id, "Failed to read aborted job: {}", e);
                return;
            }
        };
        if !state.is_in_flight() {
            debug!(worker_id, job_id = job.id, state = %state, "Aborted job already settled");
            return;
        }

        let err = Error::Other(format!("worker aborted: {reason}"));
        let details = error_details(worker_id, &job.hash, &err);
        match self
            .jobs
            .transition(job.id, job.claim, state, JobState::Error, Some(&details))
            .await
        {
            Ok(()) => warn!(worker_id, job_id = job.id, state = %state, "Recorded aborted job"),
            Err(e) => warn!(worker_id, job_id = job.id, "Could not record aborted job: {}", e),
        }
    }

    async fn advance(&self, job: &Job, state: &mut JobState, next: JobState) -> Result<()> {
        self.jobs.transition(job.id, job.claim, *state, next, None).await?;
        debug!(job_id = job.id, from = %state, to = %next, "Job advanced");
        *state = next;
        Ok(())
    }

    async fn execute(&self, job: &Job, state: &mut JobState) -> Result<String> {
        let assets = self
            .resolver
            .resolve(&job.season, &job.games, &job.players)
            .await?;
        info!(job_id = job.id, assets = assets.len(), "Resolved clips");

        self.advance(job, state, JobState::DownloadingClips).await?;

        ensure_dir_all(&self.scratch_dir).await?;
        // Both are removed on drop, on every exit path.
        let scratch = scratch_dir(&self.scratch_dir)?;
        let output = output_file(&self.scratch_dir)?;

        download_all(Arc::clone(&self.downloader), &assets, scratch.path(), &self.download).await?;
        let manifest = write_manifest(scratch.path()).await?;
        self.concatenator.concat(&manifest, &output).await?;

        if let Err(e) = scratch.close() {
            warn!(job_id = job.id, "Failed to remove scratch directory: {}", e);
        }

        let games = self.stats.games_by_ids(&job.games).await?;
        let players = self.stats.players_by_ids(&job.players).await?;
        let request = publish_request(&job.season, &games, &players);

        self.advance(job, state, JobState::Uploading).await?;

        let url = self.publisher.publish(&output, &request).await?;
        self.videos
            .upsert_video(job.id, &request.title, &request.description, &url)
            .await?;

        self.advance(job, state, JobState::Finished).await?;
        Ok(url)
    }
}

fn scratch_dir(parent: &Path) -> Result<tempfile::TempDir> {
    tempfile::Builder::new()
        .prefix("highlight-clips-")
        .tempdir_in(parent)
        .map_err(|e| Error::io_path("creating scratch directory in", parent, e))
}

fn output_file(parent: &Path) -> Result<tempfile::TempPath> {
    tempfile::Builder::new()
        .prefix("highlight-")
        .suffix(".mp4")
        .tempfile_in(parent)
        .map(tempfile::NamedTempFile::into_temp_path)
        .map_err(|e| Error::io_path("creating output file in", parent, e))
}
