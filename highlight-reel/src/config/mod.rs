//! Process configuration, read from the environment (and `.env` via dotenvy).
//!
//! Every key is optional. Values that are present but unparsable are
//! rejected with a [`Error::Configuration`] naming the key.

use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use url::Url;

use crate::database::{CheckpointConfig, DEFAULT_OP_TIMEOUT};
use crate::domain::job::StaleThresholds;
use crate::pipeline::download::DownloadConfig;
use crate::pipeline::rate_limiter::RateLimiterConfig;
use crate::pipeline::reaper::ReaperConfig;
use crate::pipeline::resolver::ResolverConfig;
use crate::pipeline::scheduler::SchedulerConfig;
use crate::{Error, Result};

/// Seasons with clip coverage, most recent first.
pub const VALID_SEASONS: &[&str] = &[
    "2024-25", "2023-24", "2022-23", "2021-22", "2020-21", "2019-20", "2018-19", "2017-18",
    "2016-17", "2015-16", "2014-15",
];

pub fn is_valid_season(season: &str) -> bool {
    VALID_SEASONS.contains(&season)
}

/// Default clip provider endpoint root.
pub const DEFAULT_CLIP_PROVIDER_BASE_URL: &str = "https://stats.nba.com/stats/";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub log_dir: PathBuf,
    /// Default deadline for one store primitive.
    pub store_timeout: Duration,
    /// Independent scheduler instances draining the same queue.
    pub scheduler_count: usize,
    pub scheduler: SchedulerConfig,
    pub reaper: ReaperConfig,
    pub checkpoint: CheckpointConfig,
    /// Clip provider endpoint root; always ends with `/`.
    pub clip_provider_base_url: String,
    pub resolver: ResolverConfig,
    pub download: DownloadConfig,
    pub ffmpeg_path: String,
    /// Parent directory for per-job scratch directories.
    pub scratch_dir: PathBuf,
    pub publish_command: String,
    pub publish_timeout: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:highlights.db?mode=rwc".to_string(),
            log_dir: PathBuf::from("logs"),
            store_timeout: DEFAULT_OP_TIMEOUT,
            scheduler_count: 2,
            scheduler: SchedulerConfig::default(),
            reaper: ReaperConfig::default(),
            checkpoint: CheckpointConfig::default(),
            clip_provider_base_url: DEFAULT_CLIP_PROVIDER_BASE_URL.to_string(),
            resolver: ResolverConfig::default(),
            download: DownloadConfig::default(),
            ffmpeg_path: "ffmpeg".to_string(),
            scratch_dir: std::env::temp_dir(),
            publish_command: "video-publish".to_string(),
            publish_timeout: Duration::from_secs(60 * 60),
        }
    }
}

/// Typed reads over a key lookup function.
struct Reader<F> {
    lookup: F,
}

impl<F> Reader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string(&self, key: &str, default: String) -> String {
        self.raw(key).unwrap_or(default)
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.raw(key) {
            Some(value) => value
                .parse()
                .map_err(|e| Error::config(format!("{key}={value:?}: {e}"))),
            None => Ok(default),
        }
    }

    fn positive<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr + PartialOrd + Default + Copy,
        T::Err: Display,
    {
        let value = self.parse(key, default)?;
        if value <= T::default() {
            return Err(Error::config(format!("{key} must be greater than zero")));
        }
        Ok(value)
    }

    /// A per-second rate: finite and above zero.
    fn rate(&self, key: &str, default: f64) -> Result<f64> {
        let value: f64 = self.parse(key, default)?;
        if !value.is_finite() || value <= 0.0 {
            return Err(Error::config(format!(
                "{key}={value}: must be a finite number greater than zero"
            )));
        }
        Ok(value)
    }

    fn secs(&self, key: &str, default: Duration) -> Result<Duration> {
        self.positive(key, default.as_secs()).map(Duration::from_secs)
    }

    fn millis(&self, key: &str, default: Duration) -> Result<Duration> {
        self.positive(key, default.as_millis() as u64)
            .map(Duration::from_millis)
    }
}

impl AppConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Reader { lookup };
        let defaults = Self::default();

        let clip_provider_base_url = match env.raw("CLIP_PROVIDER_BASE_URL") {
            Some(raw) => {
                // Keep a trailing slash so relative joins append instead of replace.
                let normalized = if raw.ends_with('/') { raw } else { format!("{raw}/") };
                Url::parse(&normalized).map_err(|e| {
                    Error::config(format!("CLIP_PROVIDER_BASE_URL={normalized:?}: {e}"))
                })?;
                normalized
            }
            None => defaults.clip_provider_base_url,
        };

        let rate = RateLimiterConfig {
            refill_rate: env.rate("CLIP_RATE_PER_SEC", defaults.resolver.rate.refill_rate)?,
            max_tokens: env.positive("CLIP_BURST", defaults.resolver.rate.max_tokens)?,
            initial_tokens: env.positive("CLIP_BURST", defaults.resolver.rate.initial_tokens)?,
        };

        let config = Self {
            database_url: env.string("DATABASE_URL", defaults.database_url),
            log_dir: env
                .raw("LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.log_dir),
            store_timeout: env.millis("STORE_TIMEOUT_MS", defaults.store_timeout)?,
            scheduler_count: env.positive("SCHEDULER_COUNT", defaults.scheduler_count)?,
            scheduler: SchedulerConfig {
                workers: env.positive("WORKERS_PER_SCHEDULER", defaults.scheduler.workers)?,
                poll_interval: env.millis("POLL_INTERVAL_MS", defaults.scheduler.poll_interval)?,
            },
            reaper: ReaperConfig {
                interval: env.secs("REAPER_INTERVAL_SECS", defaults.reaper.interval)?,
                thresholds: StaleThresholds {
                    processing: env.secs(
                        "STALE_PROCESSING_SECS",
                        defaults.reaper.thresholds.processing,
                    )?,
                    downloading_clips: env.secs(
                        "STALE_DOWNLOADING_SECS",
                        defaults.reaper.thresholds.downloading_clips,
                    )?,
                    uploading: env.secs(
                        "STALE_UPLOADING_SECS",
                        defaults.reaper.thresholds.uploading,
                    )?,
                },
            },
            checkpoint: CheckpointConfig {
                interval: env.secs("CHECKPOINT_INTERVAL_SECS", defaults.checkpoint.interval)?,
            },
            clip_provider_base_url,
            resolver: ResolverConfig {
                max_in_flight: env.positive("CLIP_MAX_IN_FLIGHT", defaults.resolver.max_in_flight)?,
                rate,
                dispatch_delay: match env.raw("CLIP_DISPATCH_DELAY_MS") {
                    // Zero disables the courtesy delay.
                    Some(_) => Duration::from_millis(env.parse("CLIP_DISPATCH_DELAY_MS", 0u64)?),
                    None => defaults.resolver.dispatch_delay,
                },
                request_timeout: env.secs(
                    "CLIP_REQUEST_TIMEOUT_SECS",
                    defaults.resolver.request_timeout,
                )?,
            },
            download: DownloadConfig {
                max_in_flight: env.positive("DOWNLOAD_MAX_IN_FLIGHT", defaults.download.max_in_flight)?,
                timeout: env.secs("DOWNLOAD_TIMEOUT_SECS", defaults.download.timeout)?,
            },
            ffmpeg_path: env.string("FFMPEG_PATH", defaults.ffmpeg_path),
            scratch_dir: env
                .raw("SCRATCH_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.scratch_dir),
            publish_command: env.string("PUBLISH_COMMAND", defaults.publish_command),
            publish_timeout: env.secs("PUBLISH_TIMEOUT_SECS", defaults.publish_timeout)?,
        };

        Ok(config)
    }
}
