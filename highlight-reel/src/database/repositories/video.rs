//! Published video repository.

use async_trait::async_trait;

use crate::Result;
use crate::database::Database;
use crate::database::models::VideoDbModel;
use crate::database::store;
use crate::database::time::now_ms;

const VIDEO_COLUMNS: &str = "id, job_id, title, description, url, created_at, updated_at";

#[async_trait]
pub trait VideoRepository: Send + Sync {
    /// Record the published reference for a job.
    ///
    /// A job re-run after being reaped overwrites its earlier row.
    async fn upsert_video(
        &self,
        job_id: i64,
        title: &str,
        description: &str,
        url: &str,
    ) -> Result<()>;

    async fn get_by_job(&self, job_id: i64) -> Result<Option<VideoDbModel>>;
}

pub struct SqlxVideoRepository {
    db: Database,
}

impl SqlxVideoRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl VideoRepository for SqlxVideoRepository {
    async fn upsert_video(
        &self,
        job_id: i64,
        title: &str,
        description: &str,
        url: &str,
    ) -> Result<()> {
        let timeout = self.db.op_timeout();
        let now = now_ms();
        let mut tx = self.db.begin().await?;
        store::exec(
            &mut tx,
            timeout,
            "INSERT INTO videos (job_id, title, description, url, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT(job_id) DO UPDATE SET title = excluded.title, \
             description = excluded.description, url = excluded.url, \
             updated_at = excluded.updated_at",
            &[
                job_id.into(),
                title.into(),
                description.into(),
                url.into(),
                now.into(),
                now.into(),
            ],
        )
        .await?;
        store::commit(tx, timeout).await
    }

    async fn get_by_job(&self, job_id: i64) -> Result<Option<VideoDbModel>> {
        let sql = format!("SELECT {VIDEO_COLUMNS} FROM videos WHERE job_id = ?");
        let mut conn = self.db.reader().await?;
        store::get_one(&mut conn, self.db.op_timeout(), &sql, &[job_id.into()]).await
    }
}
