//! Job domain types: lifecycle states, normalized requests, and the job view.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::is_valid_season;
use crate::database::models::JobDbModel;
use crate::database::time::ms_to_datetime;
use crate::{Error, Result};

/// Lifecycle state of a job, stored as a plain string.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// Waiting in the queue.
    Pending,
    /// Claimed by a worker; resolving clips.
    Processing,
    DownloadingClips,
    Uploading,
    Finished,
    Error,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Error)
    }

    /// States a worker holds a job in while running it.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            Self::Processing | Self::DownloadingClips | Self::Uploading
        )
    }

    /// Transitions a caller may request.
    ///
    /// `PENDING -> PROCESSING` is the claim. Returning an in-flight job to
    /// `PENDING` is reserved to the stale-job reaper and is not listed here.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (*self, next),
            (Pending, Processing)
                | (Processing, DownloadingClips)
                | (DownloadingClips, Uploading)
                | (Uploading, Finished)
                | (Processing | DownloadingClips | Uploading, Error)
        )
    }

    /// Check the transition table, returning a typed error when it is refused.
    pub fn ensure_transition(&self, next: JobState) -> Result<()> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(Error::InvalidStateTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}

/// How long a job may sit in each in-flight state before it is considered
/// abandoned, measured from its last update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaleThresholds {
    pub processing: Duration,
    pub downloading_clips: Duration,
    pub uploading: Duration,
}

impl Default for StaleThresholds {
    fn default() -> Self {
        Self {
            processing: Duration::from_secs(5 * 60),
            downloading_clips: Duration::from_secs(10 * 60),
            uploading: Duration::from_secs(60 * 60),
        }
    }
}

impl StaleThresholds {
    /// Per-state thresholds, in the order they are checked.
    pub fn by_state(&self) -> [(JobState, Duration); 3] {
        [
            (JobState::Processing, self.processing),
            (JobState::DownloadingClips, self.downloading_clips),
            (JobState::Uploading, self.uploading),
        ]
    }
}

/// A validated, normalized compilation request.
///
/// Player and game IDs are trimmed, de-duplicated and sorted, so two requests
/// naming the same sets in any order produce the same [`hash`](Self::hash).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    players: Vec<String>,
    games: Vec<String>,
    season: String,
}

fn normalize_ids<S: AsRef<str>>(kind: &str, ids: &[S]) -> Result<Vec<String>> {
    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        let id = id.as_ref().trim();
        if id.is_empty() {
            continue;
        }
        if id.contains(',') || id.contains('|') {
            return Err(Error::validation(format!("invalid {kind} id: {id:?}")));
        }
        out.push(id.to_string());
    }
    out.sort();
    out.dedup();
    if out.is_empty() {
        return Err(Error::validation(format!("at least one {kind} is required")));
    }
    Ok(out)
}

impl JobRequest {
    pub fn new<P: AsRef<str>, G: AsRef<str>>(players: &[P], games: &[G], season: &str) -> Result<Self> {
        let season = season.trim();
        if !is_valid_season(season) {
            return Err(Error::validation(format!("invalid season: {season:?}")));
        }

        Ok(Self {
            players: normalize_ids("player", players)?,
            games: normalize_ids("game", games)?,
            season: season.to_string(),
        })
    }

    pub fn players(&self) -> &[String] {
        &self.players
    }

    pub fn games(&self) -> &[String] {
        &self.games
    }

    pub fn season(&self) -> &str {
        &self.season
    }

    pub fn players_csv(&self) -> String {
        self.players.join(",")
    }

    pub fn games_csv(&self) -> String {
        self.games.join(",")
    }

    /// Idempotency key: hex SHA-256 of `players|games|season`.
    pub fn hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.players_csv().as_bytes());
        hasher.update(b"|");
        hasher.update(self.games_csv().as_bytes());
        hasher.update(b"|");
        hasher.update(self.season.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// A compilation job as seen by callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Job {
    pub id: i64,
    pub slug: String,
    pub hash: String,
    pub players: Vec<String>,
    pub games: Vec<String>,
    pub season: String,
    pub state: JobState,
    pub error_details: Option<String>,
    /// Token from the claim that handed this job to a worker.
    pub claim: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<JobDbModel> for Job {
    type Error = Error;

    fn try_from(model: JobDbModel) -> Result<Self> {
        let state = model.state()?;
        Ok(Self {
            id: model.id,
            players: model.player_ids(),
            games: model.game_ids(),
            slug: model.slug,
            hash: model.job_hash,
            season: model.season,
            state,
            error_details: model.error_details,
            claim: model.claim_count,
            created_at: ms_to_datetime(model.created_at),
            updated_at: ms_to_datetime(model.updated_at),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_state_string_round_trip() {
        for state in [
            JobState::Pending,
            JobState::Processing,
            JobState::DownloadingClips,
            JobState::Uploading,
            JobState::Finished,
            JobState::Error,
        ] {
            assert_eq!(JobState::from_str(state.as_str()).unwrap(), state);
            assert_eq!(state.as_str(), state.to_string());
        }
        assert_eq!(JobState::DownloadingClips.as_str(), "DOWNLOADING_CLIPS");
        assert_eq!(JobState::Pending.as_str(), "PENDING");
        assert!(JobState::from_str("DOWNLOADING CLIPS").is_err());
        assert!(JobState::from_str("pending").is_err());
    }

    #[test]
    fn test_transition_table() {
        use JobState as S;
        assert!(S::Pending.can_transition_to(S::Processing));
        assert!(S::Processing.can_transition_to(S::DownloadingClips));
        assert!(S::DownloadingClips.can_transition_to(S::Uploading));
        assert!(S::Uploading.can_transition_to(S::Finished));
        assert!(S::Processing.can_transition_to(S::Error));
        assert!(S::Uploading.can_transition_to(S::Error));

        assert!(!S::Pending.can_transition_to(S::Error));
        assert!(!S::Pending.can_transition_to(S::Finished));
        assert!(!S::Processing.can_transition_to(S::Finished));
        assert!(!S::Processing.can_transition_to(S::Pending));
        assert!(!S::Finished.can_transition_to(S::Error));
        assert!(!S::Error.can_transition_to(S::Pending));

        let err = S::Finished.ensure_transition(S::Processing).unwrap_err();
        assert!(matches!(err, Error::InvalidStateTransition { .. }));
    }

    #[test]
    fn test_terminal_and_in_flight() {
        assert!(JobState::Finished.is_terminal());
        assert!(JobState::Error.is_terminal());
        assert!(!JobState::Uploading.is_terminal());
        assert!(JobState::DownloadingClips.is_in_flight());
        assert!(!JobState::Pending.is_in_flight());
    }

    #[test]
    fn test_request_normalizes_order_and_duplicates() {
        let a = JobRequest::new(&["203999", "201939"], &["0022400061"], "2024-25").unwrap();
        let b = JobRequest::new(&[" 201939", "203999", "201939"], &["0022400061"], "2024-25")
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(a.hash(), b.hash());
        assert_eq!(a.players_csv(), "201939,203999");
    }

    #[test]
    fn test_request_hash_distinguishes_inputs() {
        let a = JobRequest::new(&["1"], &["10"], "2024-25").unwrap();
        let b = JobRequest::new(&["1"], &["10"], "2023-24").unwrap();
        let c = JobRequest::new(&["1", "10"], &["10"], "2024-25").unwrap();
        assert_ne!(a.hash(), b.hash());
        assert_ne!(a.hash(), c.hash());
        assert_eq!(a.hash().len(), 64);
    }

    #[test]
    fn test_request_validation() {
        assert!(matches!(
            JobRequest::new(&["1"], &["10"], "1999-00"),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            JobRequest::new::<&str, &str>(&[], &["10"], "2024-25"),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            JobRequest::new(&["1,2"], &["10"], "2024-25"),
            Err(Error::Validation(_))
        ));
    }
}
