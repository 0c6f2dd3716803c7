//! WAL checkpoint maintenance.
//!
//! SQLite's auto-checkpoint folds frames back into the main file but never
//! shrinks the `-wal` file. After a burst of writes the scheduler runs a
//! `TRUNCATE` checkpoint on the writer connection to bound on-disk growth.

use std::future::Future;
use std::panic::Location;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::Database;
use super::retry::retry_with_deadline;

/// Configuration for the checkpoint scheduler.
#[derive(Debug, Clone)]
pub struct CheckpointConfig {
    /// Interval between checkpoint checks.
    pub interval: Duration,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
        }
    }
}

/// Result of one `PRAGMA wal_checkpoint(TRUNCATE)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointStats {
    /// Non-zero when a reader or writer prevented a full checkpoint.
    pub busy: i32,
    /// Frames in the WAL before the checkpoint.
    pub log_frames: i32,
    /// Frames copied back into the database file.
    pub checkpointed_frames: i32,
}

/// Periodic `TRUNCATE` checkpoint, skipped when nothing was written.
pub struct CheckpointScheduler {
    db: Database,
    config: CheckpointConfig,
    last_seen_writes: AtomicU64,
}

impl CheckpointScheduler {
    pub fn new(db: Database, config: CheckpointConfig) -> Self {
        Self {
            db,
            config,
            last_seen_writes: AtomicU64::new(0),
        }
    }

    /// Start the scheduler loop; it exits when `cancel` fires.
    pub fn start(self: Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!("Checkpoint scheduler shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        if let Err(e) = self.checkpoint_if_dirty().await {
                            tracing::warn!("WAL checkpoint failed: {}", e);
                        }
                    }
                }
            }
        })
    }

    /// Run a checkpoint if writes were committed since the previous one.
    ///
    /// Returns `None` when the database was clean.
    pub async fn checkpoint_if_dirty(&self) -> crate::Result<Option<CheckpointStats>> {
        let writes = self.db.committed_writes();
        if writes == self.last_seen_writes.load(Ordering::Relaxed) {
            return Ok(None);
        }

        let stats = self.checkpoint().await?;
        self.last_seen_writes.store(writes, Ordering::Relaxed);
        Ok(Some(stats))
    }

    /// Run `PRAGMA wal_checkpoint(TRUNCATE)` on the writer connection.
    ///
    /// Waiting for the writer and retrying a busy database share the store's
    /// operation timeout.
    #[track_caller]
    pub fn checkpoint(&self) -> impl Future<Output = crate::Result<CheckpointStats>> + Send + '_ {
        let location = Location::caller();
        async move {
            let timeout = self.db.op_timeout();
            let started = tokio::time::Instant::now();
            let conn = self.db.writer().await?;
            let remaining = timeout.saturating_sub(started.elapsed());

            let (_conn, row) = retry_with_deadline(
                "wal checkpoint",
                location,
                remaining,
                conn,
                |mut conn| async move {
                    let result = sqlx::query_as::<_, (i32, i32, i32)>("PRAGMA wal_checkpoint(TRUNCATE)")
                        .fetch_one(&mut *conn)
                        .await;
                    (conn, result)
                },
            )
            .await?;

            let stats = CheckpointStats {
                busy: row.0,
                log_frames: row.1,
                checkpointed_frames: row.2,
            };

            tracing::info!(
                busy = stats.busy,
                log_frames = stats.log_frames,
                checkpointed = stats.checkpointed_frames,
                "WAL checkpoint completed"
            );

            Ok(stats)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::store;
    use crate::database::test_support::open_test_db;

    #[tokio::test]
    async fn test_checkpoint_skipped_when_clean() {
        let (_dir, db) = open_test_db().await;
        let scheduler = CheckpointScheduler::new(db, CheckpointConfig::default());
        assert!(scheduler.checkpoint_if_dirty().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_checkpoint_after_write() {
        let (_dir, db) = open_test_db().await;
        let scheduler = CheckpointScheduler::new(db.clone(), CheckpointConfig::default());

        let timeout = db.op_timeout();
        let mut tx = db.begin().await.unwrap();
        store::exec(
            &mut tx,
            timeout,
            "INSERT INTO players (id, display_name) VALUES (?, ?)",
            &["2544".into(), "LeBron James".into()],
        )
        .await
        .unwrap();
        store::commit(tx, timeout).await.unwrap();

        let stats = scheduler.checkpoint_if_dirty().await.unwrap().unwrap();
        assert_eq!(stats.busy, 0);

        // Nothing new since the last run.
        assert!(scheduler.checkpoint_if_dirty().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_checkpoint_times_out_while_writer_is_held() {
        let (_dir, db) = open_test_db().await;
        let short = Database::from_pools(
            db.read_pool().clone(),
            db.write_pool().clone(),
            Duration::from_millis(200),
        );
        let scheduler = CheckpointScheduler::new(short, CheckpointConfig::default());

        let held = db.begin().await.unwrap();
        let err = tokio::time::timeout(Duration::from_secs(5), scheduler.checkpoint())
            .await
            .expect("checkpoint ignored its timeout")
            .unwrap_err();
        assert!(err.is_timeout(), "{err}");

        held.rollback().await.unwrap();
        let stats = scheduler.checkpoint().await.unwrap();
        assert_eq!(stats.busy, 0);
    }
}
