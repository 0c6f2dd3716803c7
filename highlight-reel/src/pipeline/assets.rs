//! Candidate deduplication and chronological ordering.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::providers::ClipCandidate;

/// A clip selected for the compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoAsset {
    pub game_id: String,
    pub event_id: String,
    pub year: Option<i64>,
    pub month: Option<String>,
    pub day: Option<String>,
    pub description: String,
    /// Largest quality the provider offered.
    pub url: String,
}

impl VideoAsset {
    fn from_candidate(candidate: ClipCandidate) -> Option<Self> {
        let url = candidate.preferred_url()?.to_string();
        Some(Self {
            game_id: candidate.game_id,
            event_id: candidate.event_id,
            year: candidate.year,
            month: candidate.month,
            day: candidate.day,
            description: candidate.description,
            url,
        })
    }
}

/// Collapse candidates returned under several stat contexts into one asset
/// per (game, event), keeping the first seen. Candidates without any URL are
/// dropped.
pub fn dedupe(candidates: impl IntoIterator<Item = ClipCandidate>) -> Vec<VideoAsset> {
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter_map(VideoAsset::from_candidate)
        .filter(|asset| seen.insert((asset.game_id.clone(), asset.event_id.clone())))
        .collect()
}

// .../media/<yyyy>/<mm>/<dd>/<coarse>/<fine>/...
static ORDINAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/media/\d+/\d+/\d+/(\d+)/(\d+)").unwrap());

/// Chronological ordinal embedded in a clip URL, as (coarse, fine).
pub fn clip_ordinal(url: &str) -> Option<(u64, u64)> {
    let caps = ORDINAL_RE.captures(url)?;
    let coarse = caps.get(1)?.as_str().parse().ok()?;
    let fine = caps.get(2)?.as_str().parse().ok()?;
    Some((coarse, fine))
}

/// Stable sort by URL ordinal; assets without one keep their relative order
/// after all the others.
pub fn sort_chronologically(assets: &mut [VideoAsset]) {
    assets.sort_by_cached_key(|asset| {
        let ordinal = clip_ordinal(&asset.url);
        (ordinal.is_none(), ordinal.unwrap_or_default())
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(event_id: &str, url: Option<&str>) -> ClipCandidate {
        ClipCandidate {
            game_id: "0022400061".to_string(),
            event_id: event_id.to_string(),
            large_url: url.map(str::to_string),
            ..Default::default()
        }
    }

    fn asset(url: &str) -> VideoAsset {
        VideoAsset {
            game_id: "g".to_string(),
            event_id: url.to_string(),
            year: None,
            month: None,
            day: None,
            description: String::new(),
            url: url.to_string(),
        }
    }

    fn media(coarse: u64, fine: u64) -> String {
        format!("https://videos.example/nba/pbp/media/2024/10/22/{coarse}/{fine}/clip_1280x720.mp4")
    }

    #[test]
    fn test_dedupe_keeps_first_per_event() {
        let assets = dedupe([
            candidate("e1", Some("https://v/1a.mp4")),
            candidate("e2", Some("https://v/2.mp4")),
            candidate("e1", Some("https://v/1b.mp4")),
            candidate("e3", Some("https://v/3.mp4")),
        ]);
        let ids: Vec<&str> = assets.iter().map(|a| a.event_id.as_str()).collect();
        assert_eq!(ids, ["e1", "e2", "e3"]);
        assert_eq!(assets[0].url, "https://v/1a.mp4");
    }

    #[test]
    fn test_dedupe_drops_urlless_and_separates_games() {
        let mut other_game = candidate("e1", Some("https://v/other.mp4"));
        other_game.game_id = "0022400062".to_string();

        let assets = dedupe([
            candidate("e0", None),
            candidate("e1", Some("https://v/1.mp4")),
            other_game,
        ]);
        assert_eq!(assets.len(), 2);
        assert!(assets.iter().all(|a| a.event_id == "e1"));
    }

    #[test]
    fn test_dedupe_falls_back_through_qualities() {
        let mut c = candidate("e1", None);
        c.small_url = Some("https://v/small.mp4".to_string());
        let assets = dedupe([c]);
        assert_eq!(assets[0].url, "https://v/small.mp4");
    }

    #[test]
    fn test_clip_ordinal() {
        assert_eq!(clip_ordinal(&media(2, 5)), Some((2, 5)));
        assert_eq!(
            clip_ordinal("https://videos.nba.com/nba/pbp/media/2024/10/22/0022400061/12/abc.mp4"),
            Some((22400061, 12))
        );
        assert_eq!(clip_ordinal("https://videos.example/other/path.mp4"), None);
    }

    #[test]
    fn test_sort_chronologically() {
        let mut assets = vec![asset(&media(2, 5)), asset(&media(2, 3)), asset(&media(1, 999))];
        sort_chronologically(&mut assets);
        let ordinals: Vec<_> = assets.iter().filter_map(|a| clip_ordinal(&a.url)).collect();
        assert_eq!(ordinals, [(1, 999), (2, 3), (2, 5)]);
    }

    #[test]
    fn test_unparseable_urls_sort_last_and_stable() {
        let mut assets = vec![
            asset("https://v/unknown-b.mp4"),
            asset(&media(3, 1)),
            asset("https://v/unknown-a.mp4"),
            asset(&media(1, 1)),
        ];
        sort_chronologically(&mut assets);
        let urls: Vec<&str> = assets.iter().map(|a| a.url.as_str()).collect();
        assert_eq!(
            urls,
            [
                media(1, 1).as_str(),
                media(3, 1).as_str(),
                "https://v/unknown-b.mp4",
                "https://v/unknown-a.mp4",
            ]
        );
    }
}
