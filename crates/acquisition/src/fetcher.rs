//! Cache-fronted resilient fetch with retry, backoff, and window widening.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use lru::LruCache;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use quota::QuotaMonitor;
use sat_common::{
    AreaOfInterest, DateWindow, ImageryProvider, MosaickingOrder, ProviderError, Raster, SatError,
    SatResult, SceneRequest, VegetationIndex,
};
use tile_store::{make_cache_key, NewEntry, TileStore};

/// Endpoint names used for quota accounting.
const ENDPOINT: &str = "copernicus_sentinel";
const ENDPOINT_FAILED: &str = "copernicus_sentinel_failed";

/// Retry/backoff parameters for one remote call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts per remote call before the error surfaces.
    pub max_attempts: u32,
    /// Cap applied to a provider-supplied Retry-After delay.
    pub retry_after_cap: Duration,
    /// Cap on exponential backoff after a 429 without Retry-After.
    pub rate_limit_backoff_cap: Duration,
    /// Cap on exponential backoff after other transient failures.
    pub transient_backoff_cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_after_cap: Duration::from_secs(60),
            rate_limit_backoff_cap: Duration::from_secs(30),
            transient_backoff_cap: Duration::from_secs(10),
        }
    }
}

/// One widening round: how far to pad the window and which quality
/// filters to relax.
#[derive(Debug, Clone)]
pub struct WideningRound {
    pub pad_days: i64,
    pub max_cloud_coverage: f64,
    pub mosaicking_order: MosaickingOrder,
}

/// The progressive-widening schedule. Cloud cover or revisit gaps can
/// leave a narrow window with zero usable imagery; each round retries a
/// symmetrically padded window with looser constraints.
#[derive(Debug, Clone)]
pub struct WideningPolicy {
    pub rounds: Vec<WideningRound>,
}

impl Default for WideningPolicy {
    fn default() -> Self {
        Self {
            rounds: vec![
                WideningRound {
                    pad_days: 0,
                    max_cloud_coverage: 95.0,
                    mosaicking_order: MosaickingOrder::LeastCc,
                },
                WideningRound {
                    pad_days: 7,
                    max_cloud_coverage: 95.0,
                    mosaicking_order: MosaickingOrder::LeastCc,
                },
                WideningRound {
                    pad_days: 14,
                    max_cloud_coverage: 95.0,
                    mosaicking_order: MosaickingOrder::MostRecent,
                },
                WideningRound {
                    pad_days: 21,
                    max_cloud_coverage: 95.0,
                    mosaicking_order: MosaickingOrder::MostRecent,
                },
            ],
        }
    }
}

/// What the caller wants, addressed by the window it asked for.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub aoi: AreaOfInterest,
    pub window: DateWindow,
    pub index: VegetationIndex,
    pub width: u32,
    pub height: u32,
    pub masked: bool,
    pub include_water: bool,
}

impl FetchRequest {
    pub fn new(
        aoi: AreaOfInterest,
        window: DateWindow,
        index: VegetationIndex,
        width: u32,
        height: u32,
    ) -> Self {
        Self {
            aoi,
            window,
            index,
            width,
            height,
            masked: true,
            include_water: false,
        }
    }

    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Result of one resilient fetch.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    /// The composite, or None when every widening round came up dry.
    pub raster: Option<Raster>,
    /// The window that actually produced the data; wider than the request
    /// when widening kicked in. None on a dry outcome.
    pub used_window: Option<DateWindow>,
    /// 0 = served from cache; otherwise the 1-based widening round that
    /// produced data, or the number of rounds tried on a dry outcome.
    pub attempt: u32,
}

impl FetchOutcome {
    fn from_cache(raster: Raster, used_window: DateWindow) -> Self {
        Self {
            raster: Some(raster),
            used_window: Some(used_window),
            attempt: 0,
        }
    }

    fn dry(rounds_tried: u32) -> Self {
        Self {
            raster: None,
            used_window: None,
            attempt: rounds_tried,
        }
    }

    pub fn is_cache_hit(&self) -> bool {
        self.raster.is_some() && self.attempt == 0
    }
}

/// Orchestrates tile acquisition: tile store first, then the remote
/// provider with bounded retry and progressive window widening, writing
/// results back through the store and logging volume to the quota monitor.
///
/// Repeated calls with identical inputs are idempotent: once a window has
/// produced valid data the next call is a pure cache hit, because past
/// satellite observations never change.
pub struct ResilientFetcher<P> {
    provider: P,
    store: Arc<TileStore>,
    quota: Arc<QuotaMonitor>,
    retry: RetryPolicy,
    widening: WideningPolicy,
    /// Short-lived memo for anomaly arrays; distinct from the tile store.
    pub(crate) anomaly_memo: Mutex<LruCache<String, Raster>>,
}

impl<P: ImageryProvider> ResilientFetcher<P> {
    pub fn new(provider: P, store: Arc<TileStore>, quota: Arc<QuotaMonitor>) -> Self {
        Self::with_policies(
            provider,
            store,
            quota,
            RetryPolicy::default(),
            WideningPolicy::default(),
        )
    }

    pub fn with_policies(
        provider: P,
        store: Arc<TileStore>,
        quota: Arc<QuotaMonitor>,
        retry: RetryPolicy,
        widening: WideningPolicy,
    ) -> Self {
        Self {
            provider,
            store,
            quota,
            retry,
            widening,
            anomaly_memo: Mutex::new(LruCache::new(
                NonZeroUsize::new(10).expect("memo capacity is nonzero"),
            )),
        }
    }

    pub fn store(&self) -> &Arc<TileStore> {
        &self.store
    }

    pub fn quota(&self) -> &Arc<QuotaMonitor> {
        &self.quota
    }

    /// Fetch the composite for a window, consulting the tile store first.
    ///
    /// Terminal provider failures (retry ceiling exceeded, credential or
    /// request-shape rejections) surface as errors; a window with no
    /// usable imagery after every widening round is a soft `dry` outcome,
    /// not an error.
    pub async fn fetch_window(&self, token: &str, request: &FetchRequest) -> SatResult<FetchOutcome> {
        let key = make_cache_key(
            &request.aoi,
            &request.window,
            request.index,
            request.resolution(),
        );

        if let Some(raster) = self.store.get(&key).await {
            if raster.has_valid_pixels() {
                let used = self
                    .store
                    .entry(&key)
                    .await
                    .map(|meta| meta.used)
                    .unwrap_or(request.window);
                debug!(key = %key, window = %request.window, "Serving composite from cache");
                return Ok(FetchOutcome::from_cache(raster, used));
            }
        }

        let rounds = self.widening.rounds.len() as u32;
        for (round_index, round) in self.widening.rounds.iter().enumerate() {
            let round_number = round_index as u32 + 1;
            let window = request.window.widen(round.pad_days);
            let scene = SceneRequest {
                aoi: request.aoi.clone(),
                window,
                index: request.index,
                masked: request.masked,
                include_water: request.include_water,
                width: request.width,
                height: request.height,
                max_cloud_coverage: round.max_cloud_coverage,
                mosaicking_order: round.mosaicking_order,
            };

            debug!(
                round = round_number,
                window = %window,
                pad_days = round.pad_days,
                "Trying widening round"
            );

            match self.call_with_retry(token, &scene).await {
                Ok(raster) if raster.has_valid_pixels() => {
                    self.store
                        .put(
                            &key,
                            &raster,
                            NewEntry {
                                requested: request.window,
                                used: window,
                                index: request.index,
                                attempt: round_number,
                            },
                        )
                        .await;
                    self.quota
                        .log_request(ENDPOINT, request_cost(request.width, request.height))
                        .await;
                    info!(
                        window = %request.window,
                        used_window = %window,
                        round = round_number,
                        valid_pixels = raster.finite_count(),
                        "Composite acquired"
                    );
                    return Ok(FetchOutcome {
                        raster: Some(raster),
                        used_window: Some(window),
                        attempt: round_number,
                    });
                }
                Ok(_) => {
                    // The call went through but the window holds nothing
                    // usable; pay a token cost and widen.
                    self.quota.log_request(ENDPOINT_FAILED, 0.1).await;
                    debug!(round = round_number, window = %window, "Window came up empty");
                }
                Err(e) => {
                    self.quota.log_request(ENDPOINT_FAILED, 0.1).await;
                    return Err(e);
                }
            }
        }

        info!(window = %request.window, rounds = rounds, "No usable imagery in any widening round");
        Ok(FetchOutcome::dry(rounds))
    }

    /// One remote call with bounded retry. Rate limiting honors the
    /// provider's Retry-After when present; everything else backs off
    /// exponentially under a shorter cap.
    async fn call_with_retry(&self, token: &str, scene: &SceneRequest) -> SatResult<Raster> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.provider.fetch_scene(token, scene).await {
                Ok(raster) => return Ok(raster),
                Err(ProviderError::RateLimited { retry_after }) => {
                    if attempt >= self.retry.max_attempts {
                        warn!(attempts = attempt, "Rate limited, retry ceiling reached");
                        return Err(SatError::RateLimited { attempts: attempt });
                    }
                    let wait = retry_after
                        .map(|d| d.min(self.retry.retry_after_cap))
                        .unwrap_or_else(|| backoff(attempt, self.retry.rate_limit_backoff_cap));
                    warn!(
                        attempt = attempt,
                        max_attempts = self.retry.max_attempts,
                        wait_secs = wait.as_secs_f64(),
                        "Rate limited, backing off"
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(e) if e.is_transient() => {
                    if attempt >= self.retry.max_attempts {
                        warn!(attempts = attempt, error = %e, "Transient failures exhausted retries");
                        return Err(e.into());
                    }
                    let wait = backoff(attempt, self.retry.transient_backoff_cap);
                    warn!(
                        attempt = attempt,
                        error = %e,
                        wait_secs = wait.as_secs_f64(),
                        "Transient provider failure, retrying"
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Quota cost scales with requested resolution; a normal call costs 1.
fn request_cost(width: u32, height: u32) -> f64 {
    ((width as f64 * height as f64) / 100_000.0).max(1.0)
}

fn backoff(attempt: u32, cap: Duration) -> Duration {
    let secs = 2u64.saturating_pow(attempt.min(16));
    Duration::from_secs(secs).min(cap)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_schedule() {
        let cap = Duration::from_secs(30);
        assert_eq!(backoff(1, cap), Duration::from_secs(2));
        assert_eq!(backoff(2, cap), Duration::from_secs(4));
        assert_eq!(backoff(4, cap), Duration::from_secs(16));
        assert_eq!(backoff(5, cap), Duration::from_secs(30));
        assert_eq!(backoff(60, cap), Duration::from_secs(30));
    }

    #[test]
    fn test_request_cost_floor_and_scaling() {
        assert_eq!(request_cost(16, 16), 1.0);
        assert!((request_cost(1024, 1024) - 10.48576).abs() < 1e-9);
    }

    #[test]
    fn test_default_widening_schedule() {
        let policy = WideningPolicy::default();
        let pads: Vec<i64> = policy.rounds.iter().map(|r| r.pad_days).collect();
        assert_eq!(pads, vec![0, 7, 14, 21]);
        assert!(policy
            .rounds
            .iter()
            .all(|r| r.max_cloud_coverage == 95.0));
    }
}
