//! Application-wide error types.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    /// A non-transient store failure, tagged with the operation and call site.
    #[error("Database error during {op} at {location}: {source}")]
    Store {
        op: &'static str,
        location: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Database error: {0}")]
    DatabaseSqlx(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Timed out after {timeout:?} during {op}")]
    Timeout { op: String, timeout: Duration },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid state transition: cannot transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Job {job_id} is no longer {expected} (found {actual})")]
    StateConflict {
        job_id: i64,
        expected: String,
        actual: String,
    },

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Failed to generate a unique slug after {attempts} attempts")]
    SlugSpaceExhausted { attempts: usize },

    #[error("Clip provider error: {0}")]
    ClipProvider(String),

    #[error("Download of {url} failed: {reason}")]
    Download { url: String, reason: String },

    #[error("Concatenation failed: {0}")]
    Concat(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("no assets found")]
    NoAssets,

    #[error("{}", join_messages(.0))]
    Multiple(Vec<Error>),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("IO error while {op} {}: {source}", path.display())]
    IoPath {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Other(String),
}

fn join_messages(errors: &[Error]) -> String {
    let mut out = format!("{} errors occurred:", errors.len());
    for err in errors {
        out.push_str("\n\t* ");
        out.push_str(&err.to_string());
    }
    out
}

impl Error {
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn timeout(op: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            op: op.into(),
            timeout,
        }
    }

    pub fn io_path(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::IoPath {
            op,
            path: path.into(),
            source,
        }
    }

    /// Collapse errors gathered from a fan-out into one.
    ///
    /// A single error is returned as-is so callers keep its variant.
    pub fn multiple(mut errors: Vec<Error>) -> Self {
        if errors.len() == 1 {
            if let Some(err) = errors.pop() {
                return err;
            }
        }
        Self::Multiple(errors)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
