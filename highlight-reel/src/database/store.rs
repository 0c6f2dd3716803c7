//! Retrying, deadline-bounded store primitives.
//!
//! Every primitive takes an open connection (a reader or an
//! [`ImmediateTransaction`]), a timeout and owned parameters. Parameters are
//! rebound on each attempt so a busy retry re-issues the identical statement.

use std::panic::Location;
use std::time::Duration;

use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Arguments, FromRow, SqliteConnection};

use super::ImmediateTransaction;
use super::retry::retry_with_deadline;
use crate::Result;

/// Rows per `INSERT` statement in [`named_batch_insert`].
pub const BATCH_INSERT_CHUNK_ROWS: usize = 500;

/// An owned, re-bindable statement parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlParam {
    Null,
    Int(i64),
    Text(String),
}

impl From<i64> for SqlParam {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for SqlParam {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for SqlParam {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl<T: Into<SqlParam>> From<Option<T>> for SqlParam {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

fn bind_all(params: &[SqlParam]) -> std::result::Result<SqliteArguments<'static>, sqlx::Error> {
    let mut args = SqliteArguments::default();
    for param in params {
        let bound = match param {
            SqlParam::Null => args.add(Option::<i64>::None),
            SqlParam::Int(v) => args.add(*v),
            SqlParam::Text(v) => args.add(v.clone()),
        };
        bound.map_err(sqlx::Error::Encode)?;
    }
    Ok(args)
}

/// Fetch at most one row. `None` is a normal outcome, not an error.
#[track_caller]
pub fn get_one<'a, T>(
    conn: &'a mut SqliteConnection,
    timeout: Duration,
    sql: &'a str,
    params: &'a [SqlParam],
) -> impl Future<Output = Result<Option<T>>> + Send + 'a
where
    T: for<'r> FromRow<'r, SqliteRow> + Send + Unpin + 'a,
{
    let location = Location::caller();
    async move {
        let (_, row) = retry_with_deadline("get_one", location, timeout, conn, move |conn| async move {
            let result = match bind_all(params) {
                Ok(args) => {
                    sqlx::query_as_with::<_, T, _>(sql, args)
                        .fetch_optional(&mut *conn)
                        .await
                }
                Err(e) => Err(e),
            };
            (conn, result)
        })
        .await?;
        Ok(row)
    }
}

/// Fetch every matching row.
#[track_caller]
pub fn select_many<'a, T>(
    conn: &'a mut SqliteConnection,
    timeout: Duration,
    sql: &'a str,
    params: &'a [SqlParam],
) -> impl Future<Output = Result<Vec<T>>> + Send + 'a
where
    T: for<'r> FromRow<'r, SqliteRow> + Send + Unpin + 'a,
{
    let location = Location::caller();
    async move {
        let (_, rows) =
            retry_with_deadline("select_many", location, timeout, conn, move |conn| async move {
                let result = match bind_all(params) {
                    Ok(args) => {
                        sqlx::query_as_with::<_, T, _>(sql, args)
                            .fetch_all(&mut *conn)
                            .await
                    }
                    Err(e) => Err(e),
                };
                (conn, result)
            })
            .await?;
        Ok(rows)
    }
}

/// Execute one statement, returning the number of affected rows.
#[track_caller]
pub fn exec<'a>(
    conn: &'a mut SqliteConnection,
    timeout: Duration,
    sql: &'a str,
    params: &'a [SqlParam],
) -> impl Future<Output = Result<u64>> + Send + 'a {
    let location = Location::caller();
    exec_at(location, conn, timeout, sql, params)
}

async fn exec_at(
    location: &'static Location<'static>,
    conn: &mut SqliteConnection,
    timeout: Duration,
    sql: &str,
    params: &[SqlParam],
) -> Result<u64> {
    let (_, affected) = retry_with_deadline("exec", location, timeout, conn, move |conn| async move {
        let result = match bind_all(params) {
            Ok(args) => sqlx::query_with(sql, args)
                .execute(&mut *conn)
                .await
                .map(|done| done.rows_affected()),
            Err(e) => Err(e),
        };
        (conn, result)
    })
    .await?;
    Ok(affected)
}

/// A row that can be written with [`named_batch_insert`].
pub trait InsertRow {
    /// Statement head up to and excluding `VALUES`, e.g. `INSERT INTO t (a, b)`.
    const INSERT_HEAD: &'static str;
    /// Number of columns named in the head.
    const COLUMNS: usize;

    /// Values in column order; must have exactly `COLUMNS` entries.
    fn params(&self) -> Vec<SqlParam>;
}

fn multi_row_statement(head: &str, columns: usize, rows: usize) -> String {
    let group = format!("({})", vec!["?"; columns].join(", "));
    let groups = vec![group.as_str(); rows].join(", ");
    format!("{head} VALUES {groups}")
}

/// Insert `rows` in chunks of [`BATCH_INSERT_CHUNK_ROWS`] per statement.
///
/// Returns the total number of affected rows.
#[track_caller]
pub fn named_batch_insert<'a, R>(
    conn: &'a mut SqliteConnection,
    timeout: Duration,
    rows: &'a [R],
) -> impl Future<Output = Result<u64>> + Send + 'a
where
    R: InsertRow + Sync,
{
    let location = Location::caller();
    async move {
        let mut total = 0;
        for chunk in rows.chunks(BATCH_INSERT_CHUNK_ROWS) {
            let sql = multi_row_statement(R::INSERT_HEAD, R::COLUMNS, chunk.len());
            let params: Vec<SqlParam> = chunk.iter().flat_map(|row| row.params()).collect();
            total += exec_at(location, &mut *conn, timeout, &sql, &params).await?;
        }
        Ok(total)
    }
}

/// Commit a write transaction, retrying a busy `COMMIT`.
///
/// If the deadline passes, the transaction is dropped and rolled back.
#[track_caller]
pub fn commit(
    tx: ImmediateTransaction,
    timeout: Duration,
) -> impl Future<Output = Result<()>> + Send {
    let location = Location::caller();
    async move {
        let (mut tx, ()) = retry_with_deadline("commit", location, timeout, tx, |mut tx| async move {
            let result = sqlx::query("COMMIT").execute(&mut *tx).await.map(|_| ());
            (tx, result)
        })
        .await?;
        tx.mark_committed();
        Ok(())
    }
}

/// `?, ?, ?` for an `IN (...)` list of `n` values.
pub fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_support::open_test_db;

    #[derive(Debug, sqlx::FromRow)]
    struct PlayerRow {
        id: String,
        display_name: String,
    }

    struct NewPlayer(String, String);

    impl InsertRow for NewPlayer {
        const INSERT_HEAD: &'static str = "INSERT INTO players (id, display_name)";
        const COLUMNS: usize = 2;

        fn params(&self) -> Vec<SqlParam> {
            vec![self.0.clone().into(), self.1.clone().into()]
        }
    }

    #[test]
    fn test_multi_row_statement() {
        let sql = multi_row_statement("INSERT INTO t (a, b)", 2, 3);
        assert_eq!(sql, "INSERT INTO t (a, b) VALUES (?, ?), (?, ?), (?, ?)");
    }

    #[test]
    fn test_optional_param() {
        assert_eq!(SqlParam::from(None::<String>), SqlParam::Null);
        assert_eq!(SqlParam::from(Some(7i64)), SqlParam::Int(7));
    }

    #[tokio::test]
    async fn test_batch_insert_chunks_and_commits() {
        let (_dir, db) = open_test_db().await;
        let timeout = db.op_timeout();

        let rows: Vec<NewPlayer> = (0..1203)
            .map(|i| NewPlayer(format!("p{i}"), format!("Player {i}")))
            .collect();

        let mut tx = db.begin().await.unwrap();
        let inserted = named_batch_insert(&mut tx, timeout, &rows).await.unwrap();
        commit(tx, timeout).await.unwrap();
        assert_eq!(inserted, 1203);
        assert_eq!(db.committed_writes(), 1);

        let mut reader = db.reader().await.unwrap();
        let count: Option<(i64,)> =
            get_one(&mut reader, timeout, "SELECT COUNT(*) FROM players", &[])
                .await
                .unwrap();
        assert_eq!(count, Some((1203,)));

        let some: Vec<PlayerRow> = select_many(
            &mut reader,
            timeout,
            "SELECT id, display_name FROM players WHERE id IN (?, ?) ORDER BY id",
            &["p1".into(), "p1202".into()],
        )
        .await
        .unwrap();
        assert_eq!(some.len(), 2);
        assert_eq!(some[0].id, "p1");
        assert_eq!(some[1].display_name, "Player 1202");
    }

    #[tokio::test]
    async fn test_get_one_missing_row_is_none() {
        let (_dir, db) = open_test_db().await;
        let mut reader = db.reader().await.unwrap();
        let row: Option<PlayerRow> = get_one(
            &mut reader,
            db.op_timeout(),
            "SELECT id, display_name FROM players WHERE id = ?",
            &["nobody".into()],
        )
        .await
        .unwrap();
        assert!(row.is_none());
    }

    #[tokio::test]
    async fn test_constraint_violation_is_store_error_with_location() {
        let (_dir, db) = open_test_db().await;
        let timeout = db.op_timeout();

        let mut tx = db.begin().await.unwrap();
        let sql = "INSERT INTO players (id, display_name) VALUES (?, ?)";
        exec(&mut tx, timeout, sql, &["dup".into(), "A".into()])
            .await
            .unwrap();
        let err = exec(&mut tx, timeout, sql, &["dup".into(), "B".into()])
            .await
            .unwrap_err();

        match err {
            crate::Error::Store { op, location, .. } => {
                assert_eq!(op, "exec");
                assert!(location.contains("store.rs"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_busy_writer_times_out() {
        let (_dir, db) = open_test_db().await;

        // Hold the file's write lock from a connection outside the writer pool.
        let mut holder = db.reader().await.unwrap();
        sqlx::query("BEGIN IMMEDIATE")
            .execute(&mut *holder)
            .await
            .unwrap();

        let mut writer = db.write_pool().acquire().await.unwrap();
        let err = exec(
            &mut writer,
            Duration::from_millis(300),
            "INSERT INTO players (id, display_name) VALUES ('x', 'y')",
            &[],
        )
        .await
        .unwrap_err();
        assert!(err.is_timeout(), "expected timeout, got {err}");

        sqlx::query("ROLLBACK").execute(&mut *holder).await.unwrap();
    }
}
