//! End-to-end acquisition tests against stub providers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Datelike;

use acquisition::{FetchRequest, ResilientFetcher};
use quota::{QuotaConfig, QuotaMonitor};
use sat_common::{
    AreaOfInterest, DateWindow, ImageryProvider, ProviderError, Raster, SatError, SceneRequest,
    VegetationIndex,
};
use tile_store::{TileStore, TileStoreConfig};

/// Scripted provider behaviors for exercising the fetcher.
enum Behavior {
    /// Every call returns HTTP 429 with no Retry-After.
    AlwaysRateLimited,
    /// Every call returns a raster filled with the value.
    AlwaysValid(f32),
    /// Windows narrower than the threshold return all-NaN; wider windows
    /// return valid data (simulates cloud-obscured narrow ranges).
    EmptyBelowDays(i64),
    /// No window ever has data.
    NoData,
    /// Fill value depends on the window's start year; absent years are
    /// all-NaN (simulates reference years without usable imagery).
    ValueByYear(HashMap<i32, f32>),
}

#[derive(Clone)]
struct StubProvider {
    behavior: Arc<Behavior>,
    calls: Arc<AtomicU32>,
}

impl StubProvider {
    fn new(behavior: Behavior) -> Self {
        Self {
            behavior: Arc::new(behavior),
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageryProvider for StubProvider {
    async fn fetch_scene(
        &self,
        _token: &str,
        request: &SceneRequest,
    ) -> Result<Raster, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let w = request.width as usize;
        let h = request.height as usize;
        match self.behavior.as_ref() {
            Behavior::AlwaysRateLimited => Err(ProviderError::RateLimited { retry_after: None }),
            Behavior::AlwaysValid(value) => Ok(Raster::filled(w, h, *value)),
            Behavior::EmptyBelowDays(threshold) => {
                if request.window.days() < *threshold {
                    Ok(Raster::filled(w, h, f32::NAN))
                } else {
                    Ok(Raster::filled(w, h, 0.6))
                }
            }
            Behavior::NoData => Ok(Raster::filled(w, h, f32::NAN)),
            Behavior::ValueByYear(values) => {
                match values.get(&request.window.start.year()) {
                    Some(value) => Ok(Raster::filled(w, h, *value)),
                    None => Ok(Raster::filled(w, h, f32::NAN)),
                }
            }
        }
    }
}

async fn fetcher_with(
    dir: &std::path::Path,
    behavior: Behavior,
) -> (ResilientFetcher<StubProvider>, StubProvider) {
    let store = Arc::new(
        TileStore::open(TileStoreConfig {
            cache_dir: dir.join("cache"),
            housekeeping_probability: 0.0,
            ..TileStoreConfig::default()
        })
        .await
        .unwrap(),
    );
    let quota = Arc::new(
        QuotaMonitor::open(QuotaConfig {
            tracking_file: dir.join("usage.json"),
            ..QuotaConfig::default()
        })
        .await,
    );
    let provider = StubProvider::new(behavior);
    (
        ResilientFetcher::new(provider.clone(), store, quota),
        provider,
    )
}

fn request() -> FetchRequest {
    FetchRequest::new(
        AreaOfInterest::Polygon(vec![
            [-4.51, 37.21],
            [-4.40, 37.21],
            [-4.40, 37.32],
            [-4.51, 37.32],
        ]),
        DateWindow::from_iso("2024-06-01", "2024-06-10").unwrap(),
        VegetationIndex::Ndvi,
        8,
        8,
    )
}

#[tokio::test(start_paused = true)]
async fn test_retry_terminates_after_max_attempts() {
    let dir = tempfile::tempdir().unwrap();
    let (fetcher, provider) = fetcher_with(dir.path(), Behavior::AlwaysRateLimited).await;

    let err = fetcher.fetch_window("token", &request()).await.unwrap_err();
    match err {
        SatError::RateLimited { attempts } => assert_eq!(attempts, 5),
        other => panic!("expected RateLimited, got {:?}", other),
    }
    // Exactly max_attempts calls for the first widening round, then the
    // error surfaces instead of moving to the next round.
    assert_eq!(provider.calls(), 5);
}

#[tokio::test]
async fn test_miss_then_hit_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let (fetcher, provider) = fetcher_with(dir.path(), Behavior::AlwaysValid(0.42)).await;

    let first = fetcher.fetch_window("token", &request()).await.unwrap();
    assert_eq!(first.attempt, 1);
    let raster = first.raster.clone().unwrap();
    assert!(raster.has_valid_pixels());
    assert_eq!(first.used_window.unwrap(), request().window);
    assert_eq!(provider.calls(), 1);

    // Identical request: pure cache hit, no network activity.
    let second = fetcher.fetch_window("token", &request()).await.unwrap();
    assert!(second.is_cache_hit());
    assert_eq!(second.raster.unwrap(), raster);
    assert_eq!(second.used_window.unwrap(), request().window);
    assert_eq!(provider.calls(), 1);

    let stats = fetcher.store().stats().await;
    assert_eq!(stats.entry_count, 1);
    assert_eq!(stats.cache_hits, 1);

    let usage = fetcher.quota().usage_stats().await;
    assert_eq!(usage.session_requests, 1);
}

#[tokio::test]
async fn test_window_widening_converges() {
    let dir = tempfile::tempdir().unwrap();
    // Narrower than 20 days yields nothing; the base window is 10 days,
    // so round 2 (pad 7 -> 24 days) is the first to succeed.
    let (fetcher, provider) = fetcher_with(dir.path(), Behavior::EmptyBelowDays(20)).await;

    let outcome = fetcher.fetch_window("token", &request()).await.unwrap();
    assert_eq!(outcome.attempt, 2);
    assert!(outcome.raster.unwrap().has_valid_pixels());
    let used = outcome.used_window.unwrap();
    assert!(used.days() >= 20);
    assert_eq!(used, request().window.widen(7));
    assert_eq!(provider.calls(), 2);

    // The result is cached under the original window's key.
    let again = fetcher.fetch_window("token", &request()).await.unwrap();
    assert!(again.is_cache_hit());
    assert_eq!(again.used_window.unwrap(), request().window.widen(7));
    assert_eq!(provider.calls(), 2);
}

#[tokio::test]
async fn test_all_rounds_dry_is_soft_outcome() {
    let dir = tempfile::tempdir().unwrap();
    let (fetcher, provider) = fetcher_with(dir.path(), Behavior::NoData).await;

    let outcome = fetcher.fetch_window("token", &request()).await.unwrap();
    assert!(outcome.raster.is_none());
    assert!(outcome.used_window.is_none());
    assert_eq!(outcome.attempt, 4);
    assert_eq!(provider.calls(), 4);

    // Nothing cached for a dry window: the next call tries again.
    let outcome = fetcher.fetch_window("token", &request()).await.unwrap();
    assert!(outcome.raster.is_none());
    assert_eq!(provider.calls(), 8);
}

#[tokio::test]
async fn test_compute_composite_wraps_outcome() {
    let dir = tempfile::tempdir().unwrap();
    let (fetcher, _) = fetcher_with(dir.path(), Behavior::AlwaysValid(0.5)).await;

    let composite = fetcher
        .compute_composite("token", &request())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(composite.attempt, 1);
    assert_eq!(composite.used_window, request().window);

    let (dry_fetcher, _) = fetcher_with(&dir.path().join("dry"), Behavior::NoData).await;
    assert!(dry_fetcher
        .compute_composite("token", &request())
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_anomaly_with_partial_reference_years() {
    let dir = tempfile::tempdir().unwrap();
    let values = HashMap::from([(2024, 0.8f32), (2021, 0.2f32), (2023, 0.4f32)]);
    let (fetcher, provider) = fetcher_with(dir.path(), Behavior::ValueByYear(values)).await;

    // 2022 has no data: the anomaly proceeds from the median of 2021+2023.
    let anomaly = fetcher
        .compute_anomaly("token", &request(), &[2021, 2022, 2023])
        .await
        .unwrap();
    let expected = 0.8f32 - (0.2f32 + 0.4f32) / 2.0;
    assert!(anomaly.data().iter().all(|v| (v - expected).abs() < 1e-6));

    // Memoized: recomputing makes no further provider calls.
    let calls_before = provider.calls();
    let again = fetcher
        .compute_anomaly("token", &request(), &[2021, 2022, 2023])
        .await
        .unwrap();
    assert_eq!(again, anomaly);
    assert_eq!(provider.calls(), calls_before);
}

#[tokio::test]
async fn test_anomaly_with_zero_reference_years_errors() {
    let dir = tempfile::tempdir().unwrap();
    let values = HashMap::from([(2024, 0.8f32)]);
    let (fetcher, _) = fetcher_with(dir.path(), Behavior::ValueByYear(values)).await;

    let err = fetcher
        .compute_anomaly("token", &request(), &[2022])
        .await
        .unwrap_err();
    match err {
        SatError::InsufficientReferenceData { requested } => assert_eq!(requested, 1),
        other => panic!("expected InsufficientReferenceData, got {:?}", other),
    }
}

#[tokio::test]
async fn test_anomaly_requires_current_composite() {
    let dir = tempfile::tempdir().unwrap();
    let values = HashMap::from([(2021, 0.2f32)]);
    let (fetcher, _) = fetcher_with(dir.path(), Behavior::ValueByYear(values)).await;

    let err = fetcher
        .compute_anomaly("token", &request(), &[2021])
        .await
        .unwrap_err();
    assert!(matches!(err, SatError::DataNotAvailable(_)));
}
