//! Concurrent, rate-limited clip resolution.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::assets::{VideoAsset, dedupe, sort_chronologically};
use super::rate_limiter::{RateLimiter, RateLimiterConfig};
use crate::providers::{ClipCandidate, ClipProvider, ClipQuery, ClipResponse, StatContext};
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Provider requests allowed in flight at once.
    pub max_in_flight: usize,
    pub rate: RateLimiterConfig,
    /// Pause between dispatching consecutive queries.
    pub dispatch_delay: Duration,
    /// Deadline for one provider request. Time spent queued behind the
    /// in-flight bound or the rate limiter does not count against it.
    pub request_timeout: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 25,
            rate: RateLimiterConfig::default(),
            dispatch_delay: Duration::from_millis(200),
            request_timeout: Duration::from_secs(15),
        }
    }
}

/// Every (game, player, context) query for a job.
pub fn build_queries(season: &str, games: &[String], players: &[String]) -> Vec<ClipQuery> {
    let mut queries = Vec::with_capacity(games.len() * players.len() * StatContext::ALL.len());
    for game_id in games {
        for player_id in players {
            for context in StatContext::ALL {
                queries.push(ClipQuery {
                    season: season.to_string(),
                    game_id: game_id.clone(),
                    player_id: player_id.clone(),
                    context,
                });
            }
        }
    }
    queries
}

type QueryOutcome = (usize, Result<ClipResponse>);

/// Resolves a job's clips. One resolver is shared by every worker so the
/// provider sees a single rate limit.
pub struct AssetResolver {
    provider: Arc<dyn ClipProvider>,
    limiter: RateLimiter,
    in_flight: Arc<Semaphore>,
    config: ResolverConfig,
}

impl AssetResolver {
    pub fn new(provider: Arc<dyn ClipProvider>, config: ResolverConfig) -> Self {
        Self {
            limiter: RateLimiter::new(&config.rate),
            in_flight: Arc::new(Semaphore::new(config.max_in_flight.max(1))),
            provider,
            config,
        }
    }

    fn spawn_query(&self, tasks: &mut JoinSet<QueryOutcome>, index: usize, query: ClipQuery) {
        let provider = Arc::clone(&self.provider);
        let limiter = self.limiter.clone();
        let in_flight = Arc::clone(&self.in_flight);
        let timeout = self.config.request_timeout;

        tasks.spawn(async move {
            let Ok(_permit) = in_flight.acquire_owned().await else {
                return (index, Err(Error::Other("clip resolver closed".to_string())));
            };
            limiter.acquire().await;

            let result = match tokio::time::timeout(timeout, provider.fetch_clips(&query)).await {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(e)) => Err(Error::ClipProvider(format!(
                    "game {} player {} {}: {}",
                    query.game_id, query.player_id, query.context, e
                ))),
                Err(_) => Err(Error::timeout(
                    format!(
                        "clip fetch for game {} player {} {}",
                        query.game_id, query.player_id, query.context
                    ),
                    timeout,
                )),
            };
            (index, result)
        });
    }

    /// Resolve, deduplicate and order the clips for one job.
    ///
    /// Any failed query fails the whole resolution with every error collected
    /// so far; no new queries are dispatched once a failure is seen.
    pub async fn resolve(
        &self,
        season: &str,
        games: &[String],
        players: &[String],
    ) -> Result<Vec<VideoAsset>> {
        let queries = build_queries(season, games, players);
        let total = queries.len();
        if total == 0 {
            return Err(Error::NoAssets);
        }

        let mut tasks = JoinSet::new();
        let mut outcomes: Vec<QueryOutcome> = Vec::with_capacity(total);
        let mut failed = false;

        for (index, query) in queries.into_iter().enumerate() {
            if index > 0 && !self.config.dispatch_delay.is_zero() {
                tokio::time::sleep(self.config.dispatch_delay).await;
            }
            while let Some(joined) = tasks.try_join_next() {
                let outcome = joined.map_err(|e| Error::Other(format!("clip task failed: {e}")));
                failed |= record(&mut outcomes, outcome);
            }
            if failed {
                debug!(dispatched = index, total, "Stopping clip dispatch after a failure");
                break;
            }
            self.spawn_query(&mut tasks, index, query);
        }

        while let Some(joined) = tasks.join_next().await {
            let outcome = joined.map_err(|e| Error::Other(format!("clip task failed: {e}")));
            record(&mut outcomes, outcome);
        }

        // Completion order is arbitrary; keep dedupe deterministic.
        outcomes.sort_by_key(|(index, _)| *index);

        let mut errors = Vec::new();
        let mut malformed = 0;
        let mut candidates: Vec<ClipCandidate> = Vec::new();
        for (_, result) in outcomes {
            match result {
                Ok(ClipResponse::Clips(clips)) => candidates.extend(clips),
                Ok(ClipResponse::Malformed(_)) => malformed += 1,
                Err(e) => errors.push(e),
            }
        }

        if !errors.is_empty() {
            warn!(failed = errors.len(), total, "Clip resolution failed");
            return Err(Error::multiple(errors));
        }
        if malformed == total {
            return Err(Error::ClipProvider(format!(
                "all {total} clip queries returned malformed responses"
            )));
        }

        let mut assets = dedupe(candidates);
        if assets.is_empty() {
            return Err(Error::NoAssets);
        }
        sort_chronologically(&mut assets);

        debug!(assets = assets.len(), malformed, total, "Resolved clips");
        Ok(assets)
    }
}

/// Store a finished query; returns true if it failed.
fn record(outcomes: &mut Vec<QueryOutcome>, joined: Result<QueryOutcome>) -> bool {
    match joined {
        Ok((index, result)) => {
            let failed = result.is_err();
            outcomes.push((index, result));
            failed
        }
        Err(e) => {
            outcomes.push((usize::MAX, Err(e)));
            true
        }
    }
}
