//! Title, description and tags for a published compilation.

use crate::database::models::{GameDbModel, PlayerDbModel};
use crate::providers::PublishRequest;

pub const TITLE_LIMIT: usize = 100;
pub const DESCRIPTION_LIMIT: usize = 5000;

/// Each of the names and matchups lists gets just under half the title.
const TITLE_LIST_LIMIT: usize = TITLE_LIMIT / 2 - 7;

const ELLIPSIS: &str = "...";
const BASE_TAGS: [&str; 5] = ["NBA", "nba", "basketball", "highlights", "sports"];

/// Cap `s` at `max` bytes, ending in `...` when shortened. Never splits a
/// character.
pub fn truncate_with_ellipsis(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let budget = max.saturating_sub(ELLIPSIS.len());
    let cut = s
        .char_indices()
        .map(|(i, _)| i)
        .take_while(|&i| i <= budget)
        .last()
        .unwrap_or(0);
    format!("{}{}", &s[..cut], ELLIPSIS)
}

/// `<surnames> | <matchups> | <season>`
pub fn make_title(season: &str, games: &[GameDbModel], players: &[PlayerDbModel]) -> String {
    let names = players
        .iter()
        .map(PlayerDbModel::last_name)
        .collect::<Vec<_>>()
        .join(", ");
    let matchups = games
        .iter()
        .map(|g| g.matchup.as_str())
        .collect::<Vec<_>>()
        .join(", ");

    let title = format!(
        "{} | {} | {}",
        truncate_with_ellipsis(&names, TITLE_LIST_LIMIT),
        truncate_with_ellipsis(&matchups, TITLE_LIST_LIMIT),
        season
    );
    truncate_with_ellipsis(&title, TITLE_LIMIT)
}

pub fn make_description(season: &str, games: &[GameDbModel], players: &[PlayerDbModel]) -> String {
    let names = players
        .iter()
        .map(|p| p.display_name.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    let matchups = games
        .iter()
        .map(|g| format!("{} {}", g.matchup, g.game_date))
        .collect::<Vec<_>>()
        .join("\n");

    let description = format!("Season: {season}\n\nPlayers:\n{names}\n\nGames:\n{matchups}");
    truncate_with_ellipsis(&description, DESCRIPTION_LIMIT)
}

pub fn make_tags(games: &[GameDbModel], players: &[PlayerDbModel]) -> Vec<String> {
    let mut tags: Vec<String> = BASE_TAGS.iter().map(|t| t.to_string()).collect();
    for game in games {
        if !tags.contains(&game.matchup) {
            tags.push(game.matchup.clone());
        }
    }
    for player in players {
        if !tags.contains(&player.display_name) {
            tags.push(player.display_name.clone());
        }
    }
    tags
}

pub fn publish_request(
    season: &str,
    games: &[GameDbModel],
    players: &[PlayerDbModel],
) -> PublishRequest {
    PublishRequest {
        title: make_title(season, games, players),
        description: make_description(season, games, players),
        tags: make_tags(games, players),
    }
}
