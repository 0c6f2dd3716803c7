//! Entry points for the request-intake layer: create jobs, look them up by
//! slug, and fetch the published video once a job has finished.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::database::Database;
use crate::database::models::{GameDbModel, PlayerDbModel, VideoDbModel};
use crate::database::repositories::{
    JobRepository, SqlxJobRepository, SqlxStatsRepository, SqlxVideoRepository, StatsRepository,
    VideoRepository,
};
use crate::domain::{Job, JobRequest, JobState, SlugGenerator, WordSlugGenerator};
use crate::{Error, Result};

/// A job together with the labels needed to display it.
#[derive(Debug, Clone, Serialize)]
pub struct JobDetails {
    pub job: Job,
    pub games: Vec<GameDbModel>,
    pub players: Vec<PlayerDbModel>,
}

pub struct HighlightService {
    jobs: Arc<dyn JobRepository>,
    videos: Arc<dyn VideoRepository>,
    stats: Arc<dyn StatsRepository>,
    slugs: Arc<dyn SlugGenerator>,
}

impl HighlightService {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        videos: Arc<dyn VideoRepository>,
        stats: Arc<dyn StatsRepository>,
        slugs: Arc<dyn SlugGenerator>,
    ) -> Self {
        Self {
            jobs,
            videos,
            stats,
            slugs,
        }
    }

    /// Service backed by the SQLx repositories and word slugs.
    pub fn from_database(db: &Database) -> Self {
        Self::new(
            Arc::new(SqlxJobRepository::new(db.clone())),
            Arc::new(SqlxVideoRepository::new(db.clone())),
            Arc::new(SqlxStatsRepository::new(db.clone())),
            Arc::new(WordSlugGenerator),
        )
    }

    /// Queue a compilation. Requesting the same players, games and season
    /// again returns the job already on file.
    pub async fn create_job<P, G>(&self, players: &[P], games: &[G], season: &str) -> Result<Job>
    where
        P: AsRef<str> + Sync,
        G: AsRef<str> + Sync,
    {
        let request = JobRequest::new(players, games, season)?;
        let model = self.jobs.create_job(&request, self.slugs.as_ref()).await?;
        let job = Job::try_from(model)?;
        info!(job_id = job.id, slug = %job.slug, state = %job.state, "Job requested");
        Ok(job)
    }

    pub async fn get_job(&self, slug: &str) -> Result<Job> {
        let model = self
            .jobs
            .find_by_slug(slug)
            .await?
            .ok_or_else(|| Error::not_found("Job", slug))?;
        Job::try_from(model)
    }

    /// Published reference for a FINISHED job.
    pub async fn get_video(&self, job_id: i64) -> Result<VideoDbModel> {
        let job = Job::try_from(self.jobs.get_job(job_id).await?)?;
        if job.state != JobState::Finished {
            return Err(Error::not_found("Video", job_id.to_string()));
        }
        self.videos
            .get_by_job(job_id)
            .await?
            .ok_or_else(|| Error::not_found("Video", job_id.to_string()))
    }

    pub async fn job_details(&self, slug: &str) -> Result<JobDetails> {
        let job = self.get_job(slug).await?;
        let games = self.stats.games_by_ids(&job.games).await?;
        let players = self.stats.players_by_ids(&job.players).await?;
        Ok(JobDetails {
            job,
            games,
            players,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_support::open_test_db;

    fn player(id: &str, name: &str) -> PlayerDbModel {
        PlayerDbModel {
            id: id.to_string(),
            display_name: name.to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_and_lookup_by_slug() {
        let (_dir, db) = open_test_db().await;
        let service = HighlightService::from_database(&db);

        let job = service
            .create_job(&["203999", "201939"], &["0022400061"], "2024-25")
            .await
            .unwrap();
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.players, vec!["201939", "203999"]);

        let again = service
            .create_job(&["201939", "203999", "203999"], &["0022400061"], "2024-25")
            .await
            .unwrap();
        assert_eq!(again.id, job.id);
        assert_eq!(again.slug, job.slug);

        let found = service.get_job(&job.slug).await.unwrap();
        assert_eq!(found.hash, job.hash);

        let err = service.get_job("no-such-slug").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_invalid_season_is_rejected_before_io() {
        let (_dir, db) = open_test_db().await;
        let service = HighlightService::from_database(&db);

        let err = service
            .create_job(&["1"], &["10"], "1980-81")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(db.committed_writes(), 0);
    }

    #[tokio::test]
    async fn test_video_only_visible_once_finished() {
        let (_dir, db) = open_test_db().await;
        let service = HighlightService::from_database(&db);
        let jobs = SqlxJobRepository::new(db.clone());
        let videos = SqlxVideoRepository::new(db.clone());

        let job = service.create_job(&["1"], &["10"], "2024-25").await.unwrap();
        assert!(service.get_video(job.id).await.unwrap_err().is_not_found());

        let claim = jobs.claim_oldest_pending().await.unwrap().unwrap().claim_count;
        jobs.transition(job.id, claim, JobState::Processing, JobState::DownloadingClips, None)
            .await
            .unwrap();
        jobs.transition(job.id, claim, JobState::DownloadingClips, JobState::Uploading, None)
            .await
            .unwrap();
        videos
            .upsert_video(job.id, "t", "d", "https://videos.example/v/1")
            .await
            .unwrap();

        // Uploaded but not yet marked finished.
        assert!(service.get_video(job.id).await.unwrap_err().is_not_found());

        jobs.transition(job.id, claim, JobState::Uploading, JobState::Finished, None)
            .await
            .unwrap();
        let video = service.get_video(job.id).await.unwrap();
        assert_eq!(video.url, "https://videos.example/v/1");

        assert!(service.get_video(job.id + 100).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_job_details_resolves_labels() {
        let (_dir, db) = open_test_db().await;
        let service = HighlightService::from_database(&db);
        let stats = SqlxStatsRepository::new(db.clone());
        stats
            .upsert_players(&[player("201939", "Stephen Curry"), player("2544", "LeBron James")])
            .await
            .unwrap();

        let job = service
            .create_job(&["2544", "201939"], &["0022400061"], "2024-25")
            .await
            .unwrap();
        let details = service.job_details(&job.slug).await.unwrap();
        assert_eq!(details.job.id, job.id);
        assert_eq!(details.players.len(), 2);
        assert_eq!(details.players[0].display_name, "Stephen Curry");
        assert!(details.games.is_empty());
    }
}
