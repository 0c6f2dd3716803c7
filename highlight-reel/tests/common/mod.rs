//! Shared fixtures for integration tests: a file-backed database and
//! in-memory stand-ins for the external collaborators.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use highlight_reel::database::models::{GameDbModel, PlayerDbModel};
use highlight_reel::database::repositories::{
    JobRepository, SqlxJobRepository, SqlxStatsRepository, SqlxVideoRepository, StatsRepository,
};
use highlight_reel::database::{DEFAULT_OP_TIMEOUT, Database};
use highlight_reel::pipeline::rate_limiter::RateLimiterConfig;
use highlight_reel::pipeline::{
    AssetResolver, Concatenator, DownloadConfig, Downloader, JobPipeline, ResolverConfig,
};
use highlight_reel::providers::{
    ClipCandidate, ClipProvider, ClipQuery, ClipResponse, PublishRequest, Publisher, StatContext,
};
use highlight_reel::{Error, Result};

pub const SEASON: &str = "2024-25";
pub const GAME_ID: &str = "0022400061";
pub const CURRY: &str = "201939";
pub const JAMES: &str = "2544";

pub fn database_url(dir: &Path) -> String {
    format!(
        "sqlite:{}?mode=rwc",
        dir.join("highlights.db").to_string_lossy().replace('\\', "/")
    )
}

/// A migrated database in a fresh temp directory; WAL needs a real file.
pub async fn open_db() -> (TempDir, Database) {
    let dir = TempDir::new().unwrap();
    let db = Database::connect(&database_url(dir.path()), DEFAULT_OP_TIMEOUT)
        .await
        .unwrap();
    db.migrate().await.unwrap();
    (dir, db)
}

pub async fn seed_stats(db: &Database) {
    let stats = SqlxStatsRepository::new(db.clone());
    stats
        .upsert_games(&[GameDbModel {
            id: GAME_ID.to_string(),
            season: SEASON.to_string(),
            game_date: "2024-10-22".to_string(),
            matchup: "LAL vs. MIN".to_string(),
            season_type: "Regular Season".to_string(),
            winner_name: "Lakers".to_string(),
            winner_id: "1610612747".to_string(),
            winner_score: 110,
            loser_name: "Timberwolves".to_string(),
            loser_id: "1610612750".to_string(),
            loser_score: 103,
            home_team_id: "1610612747".to_string(),
            away_team_id: "1610612750".to_string(),
        }])
        .await
        .unwrap();
    stats
        .upsert_players(&[
            PlayerDbModel {
                id: CURRY.to_string(),
                display_name: "Stephen Curry".to_string(),
            },
            PlayerDbModel {
                id: JAMES.to_string(),
                display_name: "LeBron James".to_string(),
            },
        ])
        .await
        .unwrap();
}

pub fn clip(game: &str, event: &str, coarse: u64) -> ClipCandidate {
    ClipCandidate {
        game_id: game.to_string(),
        event_id: event.to_string(),
        description: format!("play {event}"),
        large_url: Some(format!(
            "https://videos.example/media/2024/10/22/{game}/{coarse}/{event}_1280x720.mp4"
        )),
        ..Default::default()
    }
}

/// Returns `e1`/`e2` for shots, `e1` again for rebounds and `e3` for blocks,
/// so the same play shows up under more than one context.
#[derive(Default)]
pub struct FakeClipProvider {
    pub fail: bool,
    pub calls: AtomicUsize,
}

#[async_trait]
impl ClipProvider for FakeClipProvider {
    async fn fetch_clips(&self, query: &ClipQuery) -> Result<ClipResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail && query.context == StatContext::Reb {
            return Err(Error::ClipProvider("upstream returned 503".to_string()));
        }
        let g = query.game_id.as_str();
        Ok(match query.context {
            StatContext::Fga => ClipResponse::Clips(vec![clip(g, "e1", 2), clip(g, "e2", 9)]),
            StatContext::Reb => ClipResponse::Clips(vec![clip(g, "e1", 2)]),
            StatContext::Blk => ClipResponse::Clips(vec![clip(g, "e3", 5)]),
            StatContext::Tov => ClipResponse::Malformed("<html>".to_string()),
            _ => ClipResponse::Clips(Vec::new()),
        })
    }
}

/// Writes each URL into its destination file.
#[derive(Default)]
pub struct FakeDownloader {
    pub calls: AtomicUsize,
}

#[async_trait]
impl Downloader for FakeDownloader {
    async fn download(&self, url: &str, dest: &Path) -> Result<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let body = format!("{url}\n");
        tokio::fs::write(dest, &body).await?;
        Ok(body.len() as u64)
    }
}

/// Joins the clips listed in the manifest, in manifest order.
pub struct FakeConcatenator;

#[async_trait]
impl Concatenator for FakeConcatenator {
    async fn concat(&self, manifest: &Path, output: &Path) -> Result<()> {
        let dir = manifest.parent().unwrap_or(Path::new("."));
        let listing = tokio::fs::read_to_string(manifest).await?;
        let mut joined = String::new();
        for line in listing.lines() {
            let name = line
                .strip_prefix("file '")
                .and_then(|rest| rest.strip_suffix('\''))
                .ok_or_else(|| Error::Concat(format!("bad manifest line: {line}")))?;
            joined.push_str(&tokio::fs::read_to_string(dir.join(name)).await?);
        }
        tokio::fs::write(output, joined).await?;
        Ok(())
    }
}

/// Records what it was asked to publish.
#[derive(Default)]
pub struct FakePublisher {
    pub published: parking_lot::Mutex<Vec<(String, PublishRequest)>>,
}

#[async_trait]
impl Publisher for FakePublisher {
    async fn publish(&self, file: &Path, request: &PublishRequest) -> Result<String> {
        let content = tokio::fs::read_to_string(file).await?;
        let mut published = self.published.lock();
        published.push((content, request.clone()));
        Ok(format!("https://videos.example/watch/{}", published.len()))
    }
}

/// Panics mid-publish, after the job has reached UPLOADING.
pub struct PanickingPublisher;

#[async_trait]
impl Publisher for PanickingPublisher {
    async fn publish(&self, _file: &Path, _request: &PublishRequest) -> Result<String> {
        panic!("publisher crashed");
    }
}

pub fn fast_resolver_config() -> ResolverConfig {
    ResolverConfig {
        max_in_flight: 4,
        rate: RateLimiterConfig {
            max_tokens: 100,
            refill_rate: 1000.0,
            initial_tokens: 100,
        },
        dispatch_delay: Duration::ZERO,
        request_timeout: Duration::from_secs(5),
    }
}

pub struct Harness {
    pub jobs: Arc<dyn JobRepository>,
    pub provider: Arc<FakeClipProvider>,
    pub downloader: Arc<FakeDownloader>,
    pub publisher: Arc<FakePublisher>,
    pub pipeline: Arc<JobPipeline>,
    pub scratch: PathBuf,
}

pub fn harness(db: &Database, provider: FakeClipProvider, scratch: &Path) -> Harness {
    let publisher = Arc::new(FakePublisher::default());
    harness_with_publisher(db, provider, scratch, publisher.clone(), publisher)
}

/// Like [`harness`], but publishing goes to `publish_to`.
pub fn harness_with_publisher(
    db: &Database,
    provider: FakeClipProvider,
    scratch: &Path,
    publish_to: Arc<dyn Publisher>,
    publisher: Arc<FakePublisher>,
) -> Harness {
    let jobs: Arc<dyn JobRepository> = Arc::new(SqlxJobRepository::new(db.clone()));
    let provider = Arc::new(provider);
    let downloader = Arc::new(FakeDownloader::default());

    let pipeline = Arc::new(JobPipeline::new(
        Arc::clone(&jobs),
        Arc::new(SqlxVideoRepository::new(db.clone())),
        Arc::new(SqlxStatsRepository::new(db.clone())),
        Arc::new(AssetResolver::new(provider.clone(), fast_resolver_config())),
        downloader.clone(),
        Arc::new(FakeConcatenator),
        publish_to,
        DownloadConfig::default(),
        scratch.to_path_buf(),
    ));

    Harness {
        jobs,
        provider,
        downloader,
        publisher,
        pipeline,
        scratch: scratch.to_path_buf(),
    }
}
