//! Published video database model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// The published reference for a finished job.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq, Eq)]
pub struct VideoDbModel {
    pub id: i64,
    pub job_id: i64,
    pub title: String,
    pub description: String,
    /// Public URL returned by the publisher.
    pub url: String,
    pub created_at: i64,
    pub updated_at: i64,
}
