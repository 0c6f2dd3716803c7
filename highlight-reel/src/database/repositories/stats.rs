//! Game and player lookups used to label compilations.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::Result;
use crate::database::Database;
use crate::database::models::{GameDbModel, PlayerDbModel};
use crate::database::store::{self, SqlParam};

const GAME_COLUMNS: &str = "id, season, game_date, matchup, season_type, winner_name, \
    winner_id, winner_score, loser_name, loser_id, loser_score, home_team_id, away_team_id";

#[async_trait]
pub trait StatsRepository: Send + Sync {
    async fn upsert_games(&self, games: &[GameDbModel]) -> Result<u64>;
    async fn upsert_players(&self, players: &[PlayerDbModel]) -> Result<u64>;

    /// Games by id, oldest first. Unknown ids are skipped.
    async fn games_by_ids(&self, ids: &[String]) -> Result<Vec<GameDbModel>>;

    /// Players by id, in the order the ids were given. Unknown ids are skipped.
    async fn players_by_ids(&self, ids: &[String]) -> Result<Vec<PlayerDbModel>>;
}

pub struct SqlxStatsRepository {
    db: Database,
}

impl SqlxStatsRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

fn id_params(ids: &[String]) -> Vec<SqlParam> {
    ids.iter().map(|id| id.as_str().into()).collect()
}

#[async_trait]
impl StatsRepository for SqlxStatsRepository {
    async fn upsert_games(&self, games: &[GameDbModel]) -> Result<u64> {
        if games.is_empty() {
            return Ok(0);
        }
        let timeout = self.db.op_timeout();
        let mut tx = self.db.begin().await?;
        let written = store::named_batch_insert(&mut tx, timeout, games).await?;
        store::commit(tx, timeout).await?;
        Ok(written)
    }

    async fn upsert_players(&self, players: &[PlayerDbModel]) -> Result<u64> {
        if players.is_empty() {
            return Ok(0);
        }
        let timeout = self.db.op_timeout();
        let mut tx = self.db.begin().await?;
        let written = store::named_batch_insert(&mut tx, timeout, players).await?;
        store::commit(tx, timeout).await?;
        Ok(written)
    }

    async fn games_by_ids(&self, ids: &[String]) -> Result<Vec<GameDbModel>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {GAME_COLUMNS} FROM games WHERE id IN ({}) ORDER BY game_date ASC, id ASC",
            store::placeholders(ids.len())
        );
        let params = id_params(ids);
        let mut conn = self.db.reader().await?;
        store::select_many(&mut conn, self.db.op_timeout(), &sql, &params).await
    }

    async fn players_by_ids(&self, ids: &[String]) -> Result<Vec<PlayerDbModel>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT id, display_name FROM players WHERE id IN ({})",
            store::placeholders(ids.len())
        );
        let params = id_params(ids);
        let mut conn = self.db.reader().await?;
        let rows: Vec<PlayerDbModel> =
            store::select_many(&mut conn, self.db.op_timeout(), &sql, &params).await?;

        let mut by_id: HashMap<String, PlayerDbModel> =
            rows.into_iter().map(|p| (p.id.clone(), p)).collect();
        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_support::open_test_db;

    fn game(id: &str, date: &str) -> GameDbModel {
        GameDbModel {
            id: id.to_string(),
            season: "2024-25".to_string(),
            game_date: date.to_string(),
            matchup: "GSW vs. LAL".to_string(),
            season_type: "Regular Season".to_string(),
            winner_name: "Warriors".to_string(),
            winner_id: "1610612744".to_string(),
            winner_score: 120,
            loser_name: "Lakers".to_string(),
            loser_id: "1610612747".to_string(),
            loser_score: 115,
            home_team_id: "1610612744".to_string(),
            away_team_id: "1610612747".to_string(),
        }
    }

    fn player(id: &str, name: &str) -> PlayerDbModel {
        PlayerDbModel {
            id: id.to_string(),
            display_name: name.to_string(),
        }
    }

    #[tokio::test]
    async fn test_games_sorted_by_date() {
        let (_dir, db) = open_test_db().await;
        let repo = SqlxStatsRepository::new(db);

        repo.upsert_games(&[game("g2", "2024-12-25"), game("g1", "2024-10-22")])
            .await
            .unwrap();

        let games = repo
            .games_by_ids(&["g2".to_string(), "g1".to_string(), "missing".to_string()])
            .await
            .unwrap();
        let ids: Vec<&str> = games.iter().map(|g| g.id.as_str()).collect();
        assert_eq!(ids, ["g1", "g2"]);
    }

    #[tokio::test]
    async fn test_players_keep_request_order_and_upsert_replaces() {
        let (_dir, db) = open_test_db().await;
        let repo = SqlxStatsRepository::new(db);

        repo.upsert_players(&[player("1", "Stephen Curry"), player("2", "LeBron James")])
            .await
            .unwrap();
        repo.upsert_players(&[player("2", "LeBron Raymone James")])
            .await
            .unwrap();

        let players = repo
            .players_by_ids(&["2".to_string(), "1".to_string()])
            .await
            .unwrap();
        assert_eq!(players.len(), 2);
        assert_eq!(players[0].display_name, "LeBron Raymone James");
        assert_eq!(players[1].last_name(), "Curry");
    }
}
