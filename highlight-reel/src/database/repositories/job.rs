//! Job repository: the durable work queue.
//!
//! Every write runs inside a `BEGIN IMMEDIATE` transaction on the single
//! writer connection. That makes the claim's select-then-update atomic across
//! all schedulers and processes sharing the database file.

use async_trait::async_trait;
use sqlx::SqliteConnection;
use std::time::Duration;
use tracing::{debug, info};

use crate::database::Database;
use crate::database::models::JobDbModel;
use crate::database::store::{self, SqlParam};
use crate::database::time::{ms_before, now_ms};
use crate::domain::{JobRequest, JobState, SlugGenerator, StaleThresholds};
use crate::{Error, Result};

/// Slug candidates drawn before giving up on job creation.
pub const MAX_SLUG_ATTEMPTS: usize = 50;

const JOB_COLUMNS: &str = "id, players, games, season, slug, job_state, job_hash, \
    error_details, claim_count, created_at, updated_at";

/// Job repository trait.
#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn get_job(&self, id: i64) -> Result<JobDbModel>;
    async fn find_by_hash(&self, hash: &str) -> Result<Option<JobDbModel>>;
    async fn find_by_slug(&self, slug: &str) -> Result<Option<JobDbModel>>;

    /// Create a PENDING job, or return the existing job with the same hash.
    async fn create_job(
        &self,
        request: &JobRequest,
        slugs: &dyn SlugGenerator,
    ) -> Result<JobDbModel>;

    /// Atomically move the oldest PENDING job to PROCESSING.
    ///
    /// Each claim bumps `claim_count`; the returned model carries the new
    /// value, which the claimant passes to [`JobRepository::transition`].
    /// `None` means the queue is empty.
    async fn claim_oldest_pending(&self) -> Result<Option<JobDbModel>>;

    /// Move a job from `from` to `to`, checked against the transition table.
    ///
    /// The update only applies while the job is still in `from` under the
    /// same `claim`; a job reaped and claimed again rejects the old claimant
    /// with [`Error::StateConflict`] and nothing changes.
    /// `error_details` is stored only when `to` is ERROR.
    async fn transition(
        &self,
        id: i64,
        claim: i64,
        from: JobState,
        to: JobState,
        error_details: Option<&str>,
    ) -> Result<()>;

    /// Return in-flight jobs not updated within their threshold to PENDING.
    async fn reap_stale(&self, thresholds: &StaleThresholds, now_ms: i64) -> Result<u64>;

    async fn count_by_state(&self, state: JobState) -> Result<i64>;
}

/// SQLx implementation of JobRepository.
pub struct SqlxJobRepository {
    db: Database,
}

impl SqlxJobRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn timeout(&self) -> Duration {
        self.db.op_timeout()
    }

    async fn find_one(&self, column: &str, value: SqlParam) -> Result<Option<JobDbModel>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE {column} = ?");
        let mut conn = self.db.reader().await?;
        store::get_one(&mut conn, self.timeout(), &sql, &[value]).await
    }
}

async fn unique_slug(
    conn: &mut SqliteConnection,
    timeout: Duration,
    slugs: &dyn SlugGenerator,
) -> Result<String> {
    for attempt in 1..=MAX_SLUG_ATTEMPTS {
        let candidate = slugs.generate();
        let params = [SqlParam::from(candidate.as_str())];
        let taken: Option<(i64,)> = store::get_one(
            &mut *conn,
            timeout,
            "SELECT id FROM jobs WHERE slug = ?",
            &params,
        )
        .await?;

        if taken.is_none() {
            return Ok(candidate);
        }
        debug!(attempt, slug = %candidate, "Slug collision");
    }

    Err(Error::SlugSpaceExhausted {
        attempts: MAX_SLUG_ATTEMPTS,
    })
}

#[async_trait]
impl JobRepository for SqlxJobRepository {
    async fn get_job(&self, id: i64) -> Result<JobDbModel> {
        self.find_one("id", id.into())
            .await?
            .ok_or_else(|| Error::not_found("Job", id.to_string()))
    }

    async fn find_by_hash(&self, hash: &str) -> Result<Option<JobDbModel>> {
        self.find_one("job_hash", hash.into()).await
    }

    async fn find_by_slug(&self, slug: &str) -> Result<Option<JobDbModel>> {
        self.find_one("slug", slug.into()).await
    }

    async fn create_job(
        &self,
        request: &JobRequest,
        slugs: &dyn SlugGenerator,
    ) -> Result<JobDbModel> {
        let hash = request.hash();
        if let Some(existing) = self.find_by_hash(&hash).await? {
            debug!(job_id = existing.id, slug = %existing.slug, "Job already exists for hash");
            return Ok(existing);
        }

        let timeout = self.timeout();
        let mut tx = self.db.begin().await?;

        // Re-check under the write lock; a concurrent create may have won.
        let by_hash = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE job_hash = ?");
        let hash_param = [SqlParam::from(hash.as_str())];
        let existing: Option<JobDbModel> =
            store::get_one(&mut tx, timeout, &by_hash, &hash_param).await?;
        if let Some(existing) = existing {
            tx.rollback().await?;
            return Ok(existing);
        }

        let slug = unique_slug(&mut tx, timeout, slugs).await?;
        let now = now_ms();
        store::exec(
            &mut tx,
            timeout,
            "INSERT INTO jobs (players, games, season, slug, job_state, job_hash, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            &[
                request.players_csv().into(),
                request.games_csv().into(),
                request.season().into(),
                slug.as_str().into(),
                JobState::Pending.as_str().into(),
                hash.as_str().into(),
                now.into(),
                now.into(),
            ],
        )
        .await?;
        store::commit(tx, timeout).await?;

        info!(slug = %slug, season = request.season(), "Created job");

        self.find_by_hash(&hash)
            .await?
            .ok_or_else(|| Error::not_found("Job", hash))
    }

    async fn claim_oldest_pending(&self) -> Result<Option<JobDbModel>> {
        let timeout = self.timeout();
        let mut tx = self.db.begin().await?;

        let oldest = format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE job_state = ? ORDER BY created_at ASC, id ASC LIMIT 1"
        );
        let pending = [SqlParam::from(JobState::Pending.as_str())];
        let candidate: Option<JobDbModel> = store::get_one(&mut tx, timeout, &oldest, &pending).await?;
        let Some(mut job) = candidate else {
            tx.rollback().await?;
            return Ok(None);
        };

        let now = now_ms();
        let updated = store::exec(
            &mut tx,
            timeout,
            "UPDATE jobs SET job_state = ?, updated_at = ?, claim_count = claim_count + 1 \
             WHERE id = ? AND job_state = ?",
            &[
                JobState::Processing.as_str().into(),
                now.into(),
                job.id.into(),
                JobState::Pending.as_str().into(),
            ],
        )
        .await?;
        if updated != 1 {
            tx.rollback().await?;
            return Err(Error::StateConflict {
                job_id: job.id,
                expected: JobState::Pending.to_string(),
                actual: "unknown".to_string(),
            });
        }
        store::commit(tx, timeout).await?;

        job.job_state = JobState::Processing.as_str().to_string();
        job.updated_at = now;
        job.claim_count += 1;
        Ok(Some(job))
    }

    async fn transition(
        &self,
        id: i64,
        claim: i64,
        from: JobState,
        to: JobState,
        error_details: Option<&str>,
    ) -> Result<()> {
        from.ensure_transition(to)?;

        let details = match to {
            JobState::Error => error_details.map(str::to_string),
            _ => None,
        };

        let timeout = self.timeout();
        let mut tx = self.db.begin().await?;
        let updated = store::exec(
            &mut tx,
            timeout,
            "UPDATE jobs SET job_state = ?, error_details = ?, updated_at = ? \
             WHERE id = ? AND job_state = ? AND claim_count = ?",
            &[
                to.as_str().into(),
                details.into(),
                now_ms().into(),
                id.into(),
                from.as_str().into(),
                claim.into(),
            ],
        )
        .await?;

        if updated == 0 {
            let current: Option<(String, i64)> = store::get_one(
                &mut tx,
                timeout,
                "SELECT job_state, claim_count FROM jobs WHERE id = ?",
                &[id.into()],
            )
            .await?;
            tx.rollback().await?;

            return Err(match current {
                Some((state, current_claim)) => Error::StateConflict {
                    job_id: id,
                    expected: format!("{from} (claim {claim})"),
                    actual: format!("{state} (claim {current_claim})"),
                },
                None => Error::not_found("Job", id.to_string()),
            });
        }

        store::commit(tx, timeout).await?;
        debug!(job_id = id, claim, from = %from, to = %to, "Job transitioned");
        Ok(())
    }

    async fn reap_stale(&self, thresholds: &StaleThresholds, now_ms: i64) -> Result<u64> {
        let timeout = self.timeout();
        let mut tx = self.db.begin().await?;

        let mut reclaimed = 0;
        for (state, max_age) in thresholds.by_state() {
            let cutoff = ms_before(now_ms, max_age);
            let count = store::exec(
                &mut tx,
                timeout,
                "UPDATE jobs SET job_state = ?, updated_at = ? WHERE job_state = ? AND updated_at < ?",
                &[
                    JobState::Pending.as_str().into(),
                    now_ms.into(),
                    state.as_str().into(),
                    cutoff.into(),
                ],
            )
            .await?;

            if count > 0 {
                info!(state = %state, count, "Reclaimed stale jobs");
            }
            reclaimed += count;
        }

        store::commit(tx, timeout).await?;
        Ok(reclaimed)
    }

    async fn count_by_state(&self, state: JobState) -> Result<i64> {
        let mut conn = self.db.reader().await?;
        let row: Option<(i64,)> = store::get_one(
            &mut conn,
            self.timeout(),
            "SELECT COUNT(*) FROM jobs WHERE job_state = ?",
            &[state.as_str().into()],
        )
        .await?;
        Ok(row.map_or(0, |(count,)| count))
    }
}
