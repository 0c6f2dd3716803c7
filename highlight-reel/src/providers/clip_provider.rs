//! Clip provider client.
//!
//! The provider answers one query per (game, player, stat context) with a
//! playlist of plays and a parallel array of video URLs in three qualities.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, trace};
use url::Url;

use crate::utils::http_client::build_provider_client;
use crate::{Error, Result};

/// Statistical contexts a player's clips are requested under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "UPPERCASE")]
pub enum StatContext {
    Fga,
    Reb,
    Ast,
    Stl,
    Tov,
    Blk,
}

impl StatContext {
    pub const ALL: [StatContext; 6] = [
        Self::Fga,
        Self::Reb,
        Self::Ast,
        Self::Stl,
        Self::Tov,
        Self::Blk,
    ];
}

/// One provider query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClipQuery {
    pub season: String,
    pub game_id: String,
    pub player_id: String,
    pub context: StatContext,
}

/// A play returned by the provider, with every URL quality it offered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClipCandidate {
    pub game_id: String,
    pub event_id: String,
    pub year: Option<i64>,
    pub month: Option<String>,
    pub day: Option<String>,
    pub description: String,
    pub large_url: Option<String>,
    pub medium_url: Option<String>,
    pub small_url: Option<String>,
}

impl ClipCandidate {
    /// Largest available quality.
    pub fn preferred_url(&self) -> Option<&str> {
        [&self.large_url, &self.medium_url, &self.small_url]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .find(|url| !url.is_empty())
    }
}

/// Outcome of a query that reached the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClipResponse {
    Clips(Vec<ClipCandidate>),
    /// The provider answered, but not with a usable playlist.
    Malformed(String),
}

#[async_trait]
pub trait ClipProvider: Send + Sync {
    /// Fetch candidates for one query.
    ///
    /// Transport failures and non-success statuses are errors; a body that
    /// cannot be read as a playlist is [`ClipResponse::Malformed`].
    async fn fetch_clips(&self, query: &ClipQuery) -> Result<ClipResponse>;
}

#[derive(Debug, Deserialize)]
struct VideoDetailsResponse {
    #[serde(rename = "resultSets")]
    result_sets: ResultSets,
}

#[derive(Debug, Deserialize)]
struct ResultSets {
    #[serde(rename = "Meta", default)]
    meta: Meta,
    #[serde(default)]
    playlist: Vec<PlaylistEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct Meta {
    #[serde(rename = "videoUrls", default)]
    video_urls: Vec<VideoUrlEntry>,
}

#[derive(Debug, Deserialize)]
struct PlaylistEntry {
    gi: Option<String>,
    ei: Option<f64>,
    y: Option<f64>,
    m: Option<String>,
    d: Option<String>,
    dsc: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VideoUrlEntry {
    lurl: Option<String>,
    murl: Option<String>,
    surl: Option<String>,
}

/// Decode a `videodetailsasset` body.
///
/// Plays without an event id are dropped.
pub fn parse_clip_response(body: &str) -> ClipResponse {
    if body.trim_start().starts_with('<') {
        return ClipResponse::Malformed("received html, expected json".to_string());
    }

    let decoded: VideoDetailsResponse = match serde_json::from_str(body) {
        Ok(decoded) => decoded,
        Err(e) => return ClipResponse::Malformed(format!("undecodable json: {e}")),
    };

    let ResultSets { meta, playlist } = decoded.result_sets;
    if playlist.len() != meta.video_urls.len() {
        return ClipResponse::Malformed(format!(
            "playlist has {} entries but {} video urls",
            playlist.len(),
            meta.video_urls.len()
        ));
    }

    let clips = playlist
        .into_iter()
        .zip(meta.video_urls)
        .filter_map(|(play, urls)| {
            let event_id = play.ei?;
            Some(ClipCandidate {
                game_id: play.gi.unwrap_or_default(),
                event_id: format!("{}", event_id as i64),
                year: play.y.map(|y| y as i64),
                month: play.m,
                day: play.d,
                description: play.dsc.unwrap_or_default(),
                large_url: urls.lurl,
                medium_url: urls.murl,
                small_url: urls.surl,
            })
        })
        .collect();

    ClipResponse::Clips(clips)
}

/// HTTP client for the stats site's `videodetailsasset` endpoint.
pub struct NbaStatsClient {
    client: reqwest::Client,
    endpoint: Url,
}

impl NbaStatsClient {
    /// `base_url` is the API root and must end with `/`.
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self> {
        let base = Url::parse(base_url)
            .map_err(|e| Error::config(format!("invalid clip provider url {base_url:?}: {e}")))?;
        let endpoint = base
            .join("videodetailsasset")
            .map_err(|e| Error::config(format!("invalid clip provider url {base_url:?}: {e}")))?;
        Ok(Self {
            client: build_provider_client(request_timeout)?,
            endpoint,
        })
    }

    fn query_url(&self, query: &ClipQuery) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("ContextMeasure", &query.context.to_string())
            .append_pair("GameID", &query.game_id)
            .append_pair("LastNGames", "0")
            .append_pair("Month", "0")
            .append_pair("OpponentTeamID", "0")
            .append_pair("Period", "0")
            .append_pair("PlayerID", &query.player_id)
            .append_pair("Season", &query.season)
            .append_pair("SeasonType", "Regular Season")
            .append_pair("TeamID", "0");
        url
    }
}

#[async_trait]
impl ClipProvider for NbaStatsClient {
    async fn fetch_clips(&self, query: &ClipQuery) -> Result<ClipResponse> {
        let url = self.query_url(query);
        trace!(%url, "Fetching clips");

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::ClipProvider(format!(
                "{} for game {} player {} ({})",
                status, query.game_id, query.player_id, query.context
            )));
        }

        let body = response.text().await?;
        let parsed = parse_clip_response(&body);
        if let ClipResponse::Malformed(reason) = &parsed {
            debug!(
                game_id = %query.game_id,
                player_id = %query.player_id,
                context = %query.context,
                "Malformed clip response: {}",
                reason
            );
        }
        Ok(parsed)
    }
}
