//! Persistence layer: SQLite in WAL mode behind sqlx.
//!
//! One file, two pools. The read pool serves concurrent readers; the write
//! pool holds exactly one connection so only one connection in this process
//! ever competes for the SQLite write lock. All access goes through the
//! retrying primitives in [`store`].

pub mod maintenance;
pub mod models;
pub mod repositories;
pub mod retry;
pub mod store;
pub mod time;

pub use maintenance::{CheckpointConfig, CheckpointScheduler};

use std::panic::Location;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Row, Sqlite};

use crate::{Error, Result};

/// Database connection pool type alias.
pub type DbPool = Pool<Sqlite>;

/// Serialized write pool type alias (max_connections=1).
pub type WritePool = Pool<Sqlite>;

/// Upper bound on the read pool size.
const MAX_READ_POOL_SIZE: u32 = 10;

/// Connection-level busy handler timeout.
///
/// Kept short: the retry loop in [`retry`] does the waiting, bounded by the
/// caller's deadline.
const CONNECTION_BUSY_TIMEOUT_MS: u64 = 200;

/// Default timeout for one store operation.
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(5);

/// WAL auto-checkpoint threshold in pages (~4MB with 4KB pages).
const WAL_AUTOCHECKPOINT_PAGES: i32 = 1000;

/// Limit WAL size growth (bytes).
const JOURNAL_SIZE_LIMIT_BYTES: i64 = 64 * 1024 * 1024;

async fn apply_per_connection_pragmas(
    conn: &mut sqlx::SqliteConnection,
) -> std::result::Result<(), sqlx::Error> {
    sqlx::query(&format!(
        "PRAGMA wal_autocheckpoint = {}",
        WAL_AUTOCHECKPOINT_PAGES
    ))
    .execute(&mut *conn)
    .await?;

    sqlx::query(&format!(
        "PRAGMA journal_size_limit = {}",
        JOURNAL_SIZE_LIMIT_BYTES
    ))
    .execute(&mut *conn)
    .await?;

    sqlx::query("PRAGMA temp_store = MEMORY")
        .execute(&mut *conn)
        .await?;

    Ok(())
}

async fn ensure_wal_mode(pool: &DbPool, pool_name: &str) -> std::result::Result<(), sqlx::Error> {
    let mut conn = pool.acquire().await?;
    let row = sqlx::query("PRAGMA journal_mode")
        .fetch_one(&mut *conn)
        .await?;
    let mode: String = row.get(0);
    if mode != "wal" {
        tracing::warn!(
            "{}_journal_mode was '{}', expected 'wal'; re-setting",
            pool_name,
            mode
        );
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

fn connect_options(database_url: &str) -> std::result::Result<SqliteConnectOptions, sqlx::Error> {
    Ok(SqliteConnectOptions::from_str(database_url)?
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_millis(CONNECTION_BUSY_TIMEOUT_MS))
        .foreign_keys(true)
        .create_if_missing(true))
}

/// Read pool size: twice the core count, capped.
pub fn default_read_pool_size() -> u32 {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(2);
    (cores * 2).min(MAX_READ_POOL_SIZE)
}

/// Open the reader pool.
pub async fn init_read_pool(database_url: &str, max_connections: u32) -> Result<DbPool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .after_connect(|conn, _meta| {
            Box::pin(async move { apply_per_connection_pragmas(&mut *conn).await })
        })
        .connect_with(connect_options(database_url)?)
        .await?;

    ensure_wal_mode(&pool, "read_pool").await?;

    tracing::info!(
        "Read pool initialized with WAL mode, {} max connections",
        max_connections
    );

    Ok(pool)
}

/// Open the single-connection writer pool.
///
/// A passive checkpoint runs once at startup to fold in frames left by a
/// previous process without blocking readers.
pub async fn init_write_pool(database_url: &str) -> Result<WritePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(60))
        .after_connect(|conn, _meta| {
            Box::pin(async move { apply_per_connection_pragmas(&mut *conn).await })
        })
        .connect_with(connect_options(database_url)?)
        .await?;

    ensure_wal_mode(&pool, "write_pool").await?;

    {
        let mut conn = pool.acquire().await?;
        let row: (i32, i32, i32) = sqlx::query_as("PRAGMA wal_checkpoint(PASSIVE)")
            .fetch_one(&mut *conn)
            .await?;
        tracing::info!(
            "Write pool startup WAL checkpoint: busy={}, log={}, checkpointed={}",
            row.0,
            row.1,
            row.2
        );
    }

    tracing::info!("Write pool initialized with 1 max connection (serialized writes)");

    Ok(pool)
}

pub async fn run_migrations(pool: &WritePool) -> Result<()> {
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Database migrations completed");
    Ok(())
}

/// Explicit store handle shared by every component.
///
/// Cheap to clone; clones share the pools and the write counter.
#[derive(Clone)]
pub struct Database {
    read: DbPool,
    write: WritePool,
    op_timeout: Duration,
    writes: Arc<AtomicU64>,
}

impl Database {
    /// Open both pools against `database_url`.
    pub async fn connect(database_url: &str, op_timeout: Duration) -> Result<Self> {
        let read = init_read_pool(database_url, default_read_pool_size()).await?;
        let write = init_write_pool(database_url).await?;
        Ok(Self::from_pools(read, write, op_timeout))
    }

    pub fn from_pools(read: DbPool, write: WritePool, op_timeout: Duration) -> Self {
        Self {
            read,
            write,
            op_timeout,
            writes: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Default timeout applied to each store primitive.
    pub fn op_timeout(&self) -> Duration {
        self.op_timeout
    }

    pub fn read_pool(&self) -> &DbPool {
        &self.read
    }

    pub fn write_pool(&self) -> &WritePool {
        &self.write
    }

    /// Number of write transactions committed through this handle.
    pub fn committed_writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Apply the embedded migrations through the writer.
    pub async fn migrate(&self) -> Result<()> {
        run_migrations(&self.write).await
    }

    /// Check out a reader connection.
    pub async fn reader(&self) -> Result<PoolConnection<Sqlite>> {
        acquire(&self.read, "acquire reader", self.op_timeout).await
    }

    /// Check out the writer connection without opening a transaction.
    pub(crate) async fn writer(&self) -> Result<PoolConnection<Sqlite>> {
        acquire(&self.write, "acquire writer", self.op_timeout).await
    }

    /// Open a `BEGIN IMMEDIATE` transaction on the writer connection.
    ///
    /// The write lock is taken up front, so a busy result surfaces here
    /// (and is retried) rather than on the first write inside the transaction.
    #[track_caller]
    pub fn begin(&self) -> impl Future<Output = Result<ImmediateTransaction>> + Send + '_ {
        let location = Location::caller();
        async move {
            let started = tokio::time::Instant::now();
            let conn = acquire(&self.write, "acquire writer", self.op_timeout).await?;
            let remaining = self.op_timeout.saturating_sub(started.elapsed());
            let tx = ImmediateTransaction::new(conn, self.writes.clone());

            let (tx, ()) = retry::retry_with_deadline(
                "begin immediate",
                location,
                remaining,
                tx,
                |mut tx| async move {
                    let result = sqlx::query("BEGIN IMMEDIATE")
                        .execute(&mut *tx)
                        .await
                        .map(|_| ());
                    (tx, result)
                },
            )
            .await?;

            Ok(tx)
        }
    }

    pub async fn close(&self) {
        self.write.close().await;
        self.read.close().await;
    }
}

async fn acquire(pool: &DbPool, op: &'static str, timeout: Duration) -> Result<PoolConnection<Sqlite>> {
    match tokio::time::timeout(timeout, pool.acquire()).await {
        Ok(Ok(conn)) => Ok(conn),
        Ok(Err(sqlx::Error::PoolTimedOut)) | Err(_) => Err(Error::timeout(op, timeout)),
        Ok(Err(e)) => Err(e.into()),
    }
}

/// A manual `BEGIN IMMEDIATE` transaction on the writer connection.
///
/// Dropping it unfinished closes the connection instead of returning it to the
/// pool, which rolls back whatever was in flight.
pub struct ImmediateTransaction {
    conn: PoolConnection<Sqlite>,
    writes: Arc<AtomicU64>,
    finished: bool,
}

impl ImmediateTransaction {
    fn new(conn: PoolConnection<Sqlite>, writes: Arc<AtomicU64>) -> Self {
        Self {
            conn,
            writes,
            finished: false,
        }
    }

    pub(crate) fn mark_committed(&mut self) {
        self.finished = true;
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    pub async fn rollback(mut self) -> Result<()> {
        sqlx::query("ROLLBACK").execute(&mut *self.conn).await?;
        self.finished = true;
        Ok(())
    }
}

impl std::ops::Deref for ImmediateTransaction {
    type Target = sqlx::SqliteConnection;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl std::ops::DerefMut for ImmediateTransaction {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}

impl Drop for ImmediateTransaction {
    fn drop(&mut self) {
        if !self.finished {
            self.conn.close_on_drop();
        }
    }
}
