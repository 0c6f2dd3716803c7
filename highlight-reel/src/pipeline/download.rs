//! Parallel clip downloads into a scratch directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::assets::VideoAsset;
use crate::utils::http_client::build_download_client;
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Downloads allowed in flight at once, per job.
    pub max_in_flight: usize,
    /// Deadline for one clip.
    pub timeout: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 50,
            timeout: Duration::from_secs(60),
        }
    }
}

/// Zero-padded to at least four digits, and to the width of the largest
/// index in a batch of `total`, so directory order matches clip order.
pub fn clip_file_name(index: usize, total: usize) -> String {
    let digits = total
        .saturating_sub(1)
        .checked_ilog10()
        .map_or(1, |log| log as usize + 1);
    let width = digits.max(4);
    format!("{index:0width$}.mp4")
}

#[async_trait]
pub trait Downloader: Send + Sync {
    /// Write the body at `url` to `dest`, returning the bytes written.
    async fn download(&self, url: &str, dest: &Path) -> Result<u64>;
}

/// Streams clip bodies straight to disk.
pub struct HttpDownloader {
    client: reqwest::Client,
}

impl HttpDownloader {
    pub fn new(config: &DownloadConfig) -> Result<Self> {
        Ok(Self {
            client: build_download_client(config.max_in_flight)?,
        })
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn download(&self, url: &str, dest: &Path) -> Result<u64> {
        let download_error = |reason: String| Error::Download {
            url: url.to_string(),
            reason,
        };

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(download_error(format!("status {status}")));
        }

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| Error::io_path("creating", dest, e))?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk: Bytes = chunk?;
            file.write_all(&chunk)
                .await
                .map_err(|e| Error::io_path("writing", dest, e))?;
            written += chunk.len() as u64;
        }
        file.flush()
            .await
            .map_err(|e| Error::io_path("flushing", dest, e))?;

        if written == 0 {
            return Err(download_error("empty body".to_string()));
        }
        Ok(written)
    }
}

/// Download every asset to `dir/NNNN.mp4`, in parallel. Larger batches get
/// wider names; see [`clip_file_name`].
///
/// All downloads run to completion; if any failed, their errors are joined
/// and returned. The caller owns `dir` and its cleanup.
pub async fn download_all(
    downloader: Arc<dyn Downloader>,
    assets: &[VideoAsset],
    dir: &Path,
    config: &DownloadConfig,
) -> Result<Vec<PathBuf>> {
    let gate = Arc::new(Semaphore::new(config.max_in_flight.max(1)));
    let mut tasks = JoinSet::new();

    for (index, asset) in assets.iter().enumerate() {
        let downloader = Arc::clone(&downloader);
        let gate = Arc::clone(&gate);
        let url = asset.url.clone();
        let dest = dir.join(clip_file_name(index, assets.len()));
        let timeout = config.timeout;

        tasks.spawn(async move {
            let _permit = gate
                .acquire_owned()
                .await
                .map_err(|_| Error::Other("download gate closed".to_string()))?;

            match tokio::time::timeout(timeout, downloader.download(&url, &dest)).await {
                Ok(Ok(bytes)) => {
                    debug!(url = %url, bytes, "Downloaded clip");
                    Ok(dest)
                }
                Ok(Err(e)) => Err(e),
                Err(_) => Err(Error::timeout(format!("download of {url}"), timeout)),
            }
        });
    }

    let mut files = Vec::with_capacity(assets.len());
    let mut errors = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(path)) => files.push(path),
            Ok(Err(e)) => errors.push(e),
            Err(e) => errors.push(Error::Other(format!("download task failed: {e}"))),
        }
    }

    if !errors.is_empty() {
        warn!(failed = errors.len(), total = assets.len(), "Clip downloads failed");
        return Err(Error::multiple(errors));
    }

    files.sort();
    Ok(files)
}
