//! Stale-job reaper: returns jobs abandoned mid-pipeline to the queue.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::Result;
use crate::database::repositories::JobRepository;
use crate::database::time::now_ms;
use crate::domain::StaleThresholds;

#[derive(Debug, Clone)]
pub struct ReaperConfig {
    pub interval: Duration,
    pub thresholds: StaleThresholds,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5 * 60),
            thresholds: StaleThresholds::default(),
        }
    }
}

pub struct StaleJobReaper {
    jobs: Arc<dyn JobRepository>,
    config: ReaperConfig,
}

impl StaleJobReaper {
    pub fn new(jobs: Arc<dyn JobRepository>, config: ReaperConfig) -> Self {
        Self { jobs, config }
    }

    /// Start the sweep loop; it exits when `cancel` fires.
    pub fn start(self: Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Stale job reaper shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        if let Err(e) = self.sweep_once(now_ms()).await {
                            warn!("Stale job sweep failed: {}", e);
                        }
                    }
                }
            }
        })
    }

    /// Reclaim stale jobs as of `now_ms`, returning how many went back to PENDING.
    pub async fn sweep_once(&self, now_ms: i64) -> Result<u64> {
        let reclaimed = self.jobs.reap_stale(&self.config.thresholds, now_ms).await?;
        if reclaimed > 0 {
            info!(reclaimed, "Returned stale jobs to the queue");
        } else {
            debug!("No stale jobs");
        }
        Ok(reclaimed)
    }
}
