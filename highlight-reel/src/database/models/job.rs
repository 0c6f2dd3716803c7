//! Job database model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::domain::JobState;
use crate::{Error, Result};

/// One row of the `jobs` table.
///
/// Player and game IDs are stored as comma-separated lists in sorted order.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobDbModel {
    pub id: i64,
    pub players: String,
    pub games: String,
    pub season: String,
    pub slug: String,
    /// PENDING, PROCESSING, DOWNLOADING_CLIPS, UPLOADING, FINISHED, ERROR
    pub job_state: String,
    pub job_hash: String,
    pub error_details: Option<String>,
    /// Number of times the job has been claimed; the current claimant's token.
    pub claim_count: i64,
    /// Unix epoch milliseconds
    pub created_at: i64,
    /// Unix epoch milliseconds
    pub updated_at: i64,
}

fn split_csv(csv: &str) -> Vec<String> {
    csv.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl JobDbModel {
    pub fn player_ids(&self) -> Vec<String> {
        split_csv(&self.players)
    }

    pub fn game_ids(&self) -> Vec<String> {
        split_csv(&self.games)
    }

    pub fn state(&self) -> Result<JobState> {
        self.job_state
            .parse::<JobState>()
            .map_err(|_| Error::Database(format!("unknown job_state {:?} on job {}", self.job_state, self.id)))
    }
}
