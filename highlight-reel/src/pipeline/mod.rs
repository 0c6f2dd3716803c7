//! Job execution: scheduling, the per-job pipeline, and its stages.

pub mod assets;
pub mod concat;
pub mod download;
pub mod metadata;
pub mod rate_limiter;
pub mod reaper;
pub mod resolver;
pub mod scheduler;
pub mod worker;

pub use assets::VideoAsset;
pub use concat::{Concatenator, FfmpegConcatenator};
pub use download::{DownloadConfig, Downloader, HttpDownloader};
pub use reaper::{ReaperConfig, StaleJobReaper};
pub use resolver::{AssetResolver, ResolverConfig};
pub use scheduler::{Scheduler, SchedulerConfig};
pub use worker::JobPipeline;
