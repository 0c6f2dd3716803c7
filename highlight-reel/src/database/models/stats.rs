//! Game and player statistics models.
//!
//! Rows are written by the scraper; the pipeline only reads them to label
//! compilations.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::store::{InsertRow, SqlParam};

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq, Eq)]
pub struct GameDbModel {
    pub id: String,
    pub season: String,
    /// `YYYY-MM-DD`
    pub game_date: String,
    /// e.g. `GSW vs. LAL`
    pub matchup: String,
    pub season_type: String,
    pub winner_name: String,
    pub winner_id: String,
    pub winner_score: i64,
    pub loser_name: String,
    pub loser_id: String,
    pub loser_score: i64,
    pub home_team_id: String,
    pub away_team_id: String,
}

impl InsertRow for GameDbModel {
    const INSERT_HEAD: &'static str = "REPLACE INTO games (id, season, game_date, matchup, \
        season_type, winner_name, winner_id, winner_score, loser_name, loser_id, loser_score, \
        home_team_id, away_team_id)";
    const COLUMNS: usize = 13;

    fn params(&self) -> Vec<SqlParam> {
        vec![
            self.id.as_str().into(),
            self.season.as_str().into(),
            self.game_date.as_str().into(),
            self.matchup.as_str().into(),
            self.season_type.as_str().into(),
            self.winner_name.as_str().into(),
            self.winner_id.as_str().into(),
            self.winner_score.into(),
            self.loser_name.as_str().into(),
            self.loser_id.as_str().into(),
            self.loser_score.into(),
            self.home_team_id.as_str().into(),
            self.away_team_id.as_str().into(),
        ]
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerDbModel {
    pub id: String,
    pub display_name: String,
}

impl PlayerDbModel {
    /// Everything after the first name, so `Karl-Anthony Towns` gives
    /// `Towns` and `Gary Payton II` gives `Payton II`. Single names are kept
    /// whole.
    pub fn last_name(&self) -> &str {
        let name = self.display_name.trim();
        match name.split_once(' ') {
            Some((_, rest)) if !rest.trim().is_empty() => rest.trim(),
            _ => name,
        }
    }
}

impl InsertRow for PlayerDbModel {
    const INSERT_HEAD: &'static str = "REPLACE INTO players (id, display_name)";
    const COLUMNS: usize = 2;

    fn params(&self) -> Vec<SqlParam> {
        vec![self.id.as_str().into(), self.display_name.as_str().into()]
    }
}
