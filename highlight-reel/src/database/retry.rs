//! Retry-with-deadline combinator for store operations.
//!
//! SQLite in WAL mode admits exactly one writer; anyone else touching the
//! write lock gets `SQLITE_BUSY` / `SQLITE_LOCKED`. Those are retried here
//! after a short jittered pause until the caller's deadline. Every other
//! error is returned immediately, tagged with the caller's location.

use std::borrow::Cow;
use std::future::Future;
use std::panic::Location;
use std::time::Duration;

use rand::random;
use tokio::time::{Instant, sleep, timeout_at};
use tracing::debug;

use crate::{Error, Result};

/// Pause between attempts after a busy/locked result.
const BUSY_RETRY_DELAY_MS: u64 = 20;

/// Upper bound for the random jitter added to each pause.
const BUSY_RETRY_JITTER_MS: u64 = 10;

/// Whether `err` is the transient "database is busy/locked" condition.
pub fn is_sqlite_busy(err: &sqlx::Error) -> bool {
    let sqlx::Error::Database(db_err) = err else {
        let msg = err.to_string().to_ascii_lowercase();
        return msg.contains("database is locked") || msg.contains("database is busy");
    };

    // Primary result codes; extended codes (e.g. 517 SQLITE_BUSY_SNAPSHOT) share the low byte.
    let code = db_err.code().map(Cow::into_owned);
    if let Some(code) = code.as_deref().and_then(|c| c.parse::<i32>().ok()) {
        if matches!(code & 0xff, 5 | 6) {
            return true;
        }
    }

    let msg = db_err.message().to_ascii_lowercase();
    msg.contains("database is locked") || msg.contains("database is busy")
}

fn timed_out(op: &'static str, location: &'static Location<'static>, timeout: Duration) -> Error {
    Error::timeout(format!("{op} at {location}"), timeout)
}

/// Run `attempt` until it succeeds, fails with a non-busy error, or `timeout` elapses.
///
/// `state` is handed to each attempt and handed back with its outcome, so an
/// attempt can borrow a connection mutably without the closure having to
/// lend it. Each attempt is itself bounded by the deadline.
pub async fn retry_with_deadline<S, T, F, Fut>(
    op: &'static str,
    location: &'static Location<'static>,
    timeout: Duration,
    mut state: S,
    mut attempt: F,
) -> Result<(S, T)>
where
    F: FnMut(S) -> Fut,
    Fut: Future<Output = (S, std::result::Result<T, sqlx::Error>)>,
{
    let deadline = Instant::now() + timeout;
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let (returned, outcome) = match timeout_at(deadline, attempt(state)).await {
            Ok(result) => result,
            Err(_) => return Err(timed_out(op, location, timeout)),
        };

        match outcome {
            Ok(value) => return Ok((returned, value)),
            Err(err) if is_sqlite_busy(&err) => {
                let pause =
                    Duration::from_millis(BUSY_RETRY_DELAY_MS + random::<u64>() % (BUSY_RETRY_JITTER_MS + 1));
                if Instant::now() + pause >= deadline {
                    return Err(timed_out(op, location, timeout));
                }

                debug!(
                    op,
                    %location,
                    attempt = attempts,
                    "SQLite busy, retrying in {:?}",
                    pause
                );
                sleep(pause).await;
                state = returned;
            }
            Err(source) => {
                return Err(Error::Store {
                    op,
                    location: location.to_string(),
                    source,
                });
            }
        }
    }
}
