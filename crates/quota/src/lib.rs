//! Observational API usage monitor.
//!
//! Tracks request volume against configured limits and surfaces status and
//! recommendations. Purely informational: the remote provider enforces the
//! real quota (HTTP 429); this component exists so operators see pressure
//! building before the provider starts rejecting calls. It never blocks a
//! request and never fails one.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Monitor configuration.
#[derive(Debug, Clone)]
pub struct QuotaConfig {
    /// JSON tracking document, keyed by ISO date.
    pub tracking_file: PathBuf,
    /// Provider's monthly request allowance.
    pub monthly_requests_limit: u64,
    /// Daily request count at which an informational log fires.
    pub daily_info_threshold: u64,
    /// Daily request count at which a warning log fires.
    pub daily_warn_threshold: u64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            tracking_file: PathBuf::from("./.api_usage_tracking.json"),
            monthly_requests_limit: 30_000,
            daily_info_threshold: 30,
            daily_warn_threshold: 50,
        }
    }
}

impl QuotaConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(limit) = std::env::var("COPERNICUS_MONTHLY_REQUESTS_LIMIT")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.monthly_requests_limit = limit;
        }
        if let Ok(path) = std::env::var("API_USAGE_TRACKING_FILE") {
            config.tracking_file = PathBuf::from(path);
        }
        config
    }
}

/// One day's counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct DailyUsage {
    requests: u64,
    total_cost: f64,
    endpoints: HashMap<String, u64>,
}

/// The persisted tracking document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct UsageData {
    /// ISO date -> counters for that day.
    daily_usage: HashMap<String, DailyUsage>,
    /// Lifetime request count across all days ever tracked.
    total_requests: u64,
}

/// Qualitative usage level for today, relative to the sustainable daily
/// share of the monthly limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageStatus {
    Low,
    Moderate,
    High,
    VeryHigh,
}

impl UsageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UsageStatus::Low => "low",
            UsageStatus::Moderate => "moderate",
            UsageStatus::High => "high",
            UsageStatus::VeryHigh => "very_high",
        }
    }
}

/// Usage snapshot for status displays.
#[derive(Debug, Clone, Serialize)]
pub struct UsageStats {
    pub requests_today: u64,
    pub requests_this_month: u64,
    pub today_cost: f64,
    pub yesterday_requests: u64,
    pub session_requests: u64,
    pub total_requests: u64,
    pub weekly_average: f64,
    pub monthly_limit: u64,
    pub monthly_percentage: f64,
    pub status: UsageStatus,
    pub recommendation: String,
}

struct MonitorState {
    data: UsageData,
    /// Requests logged by this process; not persisted.
    session_requests: u64,
}

/// Persistent request-volume monitor. Construct one per process and pass
/// it by reference alongside the tile store.
pub struct QuotaMonitor {
    config: QuotaConfig,
    inner: Mutex<MonitorState>,
}

impl QuotaMonitor {
    /// Open the monitor, loading any existing tracking file. Unreadable
    /// or corrupt tracking data starts fresh with a warning; monitoring
    /// must never be the reason a fetch fails.
    pub async fn open(config: QuotaConfig) -> Self {
        let data = match tokio::fs::read(&config.tracking_file).await {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(data) => data,
                Err(e) => {
                    warn!(
                        path = %config.tracking_file.display(),
                        error = %e,
                        "Corrupt usage tracking file, starting fresh"
                    );
                    UsageData::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => UsageData::default(),
            Err(e) => {
                warn!(
                    path = %config.tracking_file.display(),
                    error = %e,
                    "Failed to read usage tracking file, starting fresh"
                );
                UsageData::default()
            }
        };

        Self {
            config,
            inner: Mutex::new(MonitorState {
                data,
                session_requests: 0,
            }),
        }
    }

    /// Record one API call against today's counters and persist.
    ///
    /// `cost` is a caller-supplied relative weight (1.0 = a normal call).
    pub async fn log_request(&self, endpoint: &str, cost: f64) {
        self.record_on(Utc::now().date_naive(), endpoint, cost).await;
    }

    async fn record_on(&self, day: NaiveDate, endpoint: &str, cost: f64) {
        let mut inner = self.inner.lock().await;
        let day_key = day.format("%Y-%m-%d").to_string();
        let daily = inner.data.daily_usage.entry(day_key).or_default();
        daily.requests += 1;
        daily.total_cost += cost;
        *daily.endpoints.entry(endpoint.to_string()).or_insert(0) += 1;
        let daily_requests = daily.requests;

        inner.data.total_requests += 1;
        inner.session_requests += 1;

        info!(
            endpoint = endpoint,
            daily = daily_requests,
            session = inner.session_requests,
            "API request logged"
        );
        if daily_requests >= self.config.daily_warn_threshold {
            warn!(
                daily = daily_requests,
                "High API usage today, consider optimizing"
            );
        } else if daily_requests >= self.config.daily_info_threshold {
            info!(daily = daily_requests, "Moderate API usage today");
        }

        self.persist(&inner.data).await;
    }

    /// Usage snapshot as of now.
    pub async fn usage_stats(&self) -> UsageStats {
        self.stats_on(Utc::now().date_naive()).await
    }

    async fn stats_on(&self, today: NaiveDate) -> UsageStats {
        let inner = self.inner.lock().await;
        let data = &inner.data;

        let day_requests = |d: NaiveDate| {
            data.daily_usage
                .get(&d.format("%Y-%m-%d").to_string())
                .map(|u| u.requests)
                .unwrap_or(0)
        };

        let requests_today = day_requests(today);
        let today_cost = data
            .daily_usage
            .get(&today.format("%Y-%m-%d").to_string())
            .map(|u| u.total_cost)
            .unwrap_or(0.0);
        let yesterday_requests = day_requests(today - Duration::days(1));

        let week_ago = today - Duration::days(7);
        let month_start = today.with_day(1).expect("first of month is valid");
        let mut weekly_requests = 0u64;
        let mut weekly_days = 0u64;
        let mut requests_this_month = 0u64;
        for (day_key, usage) in &data.daily_usage {
            let Ok(day) = NaiveDate::parse_from_str(day_key, "%Y-%m-%d") else {
                continue;
            };
            if day >= week_ago && day <= today {
                weekly_requests += usage.requests;
                weekly_days += 1;
            }
            if day >= month_start && day <= today {
                requests_this_month += usage.requests;
            }
        }
        let weekly_average = if weekly_days > 0 {
            weekly_requests as f64 / weekly_days as f64
        } else {
            0.0
        };

        let monthly_limit = self.config.monthly_requests_limit;
        let monthly_percentage = if monthly_limit > 0 {
            (requests_this_month as f64 / monthly_limit as f64 * 1000.0).round() / 10.0
        } else {
            0.0
        };

        let status = self.status_for(requests_today);
        UsageStats {
            requests_today,
            requests_this_month,
            today_cost,
            yesterday_requests,
            session_requests: inner.session_requests,
            total_requests: data.total_requests,
            weekly_average: (weekly_average * 10.0).round() / 10.0,
            monthly_limit,
            monthly_percentage,
            status,
            recommendation: self.recommendation_for(status, requests_today),
        }
    }

    fn status_for(&self, requests_today: u64) -> UsageStatus {
        let daily_sustainable = self.config.monthly_requests_limit as f64 / 30.0;
        let today = requests_today as f64;
        if today < daily_sustainable * 0.3 {
            UsageStatus::Low
        } else if today < daily_sustainable * 0.7 {
            UsageStatus::Moderate
        } else if today < daily_sustainable {
            UsageStatus::High
        } else {
            UsageStatus::VeryHigh
        }
    }

    fn recommendation_for(&self, status: UsageStatus, requests_today: u64) -> String {
        let daily_sustainable = self.config.monthly_requests_limit as f64 / 30.0;
        match status {
            UsageStatus::Low => "Normal API usage.".to_string(),
            UsageStatus::Moderate => "Moderate usage; the cache is keeping up.".to_string(),
            UsageStatus::High => {
                "High but sustainable usage; watch the monthly total.".to_string()
            }
            UsageStatus::VeryHigh => format!(
                "Very high usage: {}/{:.0} requests today. Consider consolidating queries.",
                requests_today, daily_sustainable
            ),
        }
    }

    /// Drop daily records older than the retention window (malformed day
    /// keys are dropped too). Returns the number of days removed.
    pub async fn cleanup_old_data(&self, days_to_keep: u32) -> usize {
        self.cleanup_on(Utc::now().date_naive(), days_to_keep).await
    }

    async fn cleanup_on(&self, today: NaiveDate, days_to_keep: u32) -> usize {
        let cutoff = today - Duration::days(days_to_keep as i64);
        let mut inner = self.inner.lock().await;
        let before = inner.data.daily_usage.len();
        inner
            .data
            .daily_usage
            .retain(|day_key, _| match NaiveDate::parse_from_str(day_key, "%Y-%m-%d") {
                Ok(day) => day >= cutoff,
                Err(_) => false,
            });
        let removed = before - inner.data.daily_usage.len();
        if removed > 0 {
            info!(removed_days = removed, "Pruned old usage records");
            self.persist(&inner.data).await;
        }
        removed
    }

    async fn persist(&self, data: &UsageData) {
        let json = match serde_json::to_vec_pretty(data) {
            Ok(json) => json,
            Err(e) => {
                error!(error = %e, "Failed to serialize usage data");
                return;
            }
        };
        if let Err(e) = tokio::fs::write(&self.config.tracking_file, json).await {
            error!(
                path = %self.config.tracking_file.display(),
                error = %e,
                "Failed to persist usage data"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    async fn monitor_with_limit(dir: &std::path::Path, limit: u64) -> QuotaMonitor {
        QuotaMonitor::open(QuotaConfig {
            tracking_file: dir.join("usage.json"),
            monthly_requests_limit: limit,
            ..QuotaConfig::default()
        })
        .await
    }

    #[tokio::test]
    async fn test_log_request_counters() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = monitor_with_limit(dir.path(), 30_000).await;
        let today = day("2024-06-15");

        monitor.record_on(today, "copernicus_sentinel", 1.0).await;
        monitor.record_on(today, "copernicus_sentinel", 2.5).await;
        monitor.record_on(today, "copernicus_sentinel_failed", 0.1).await;

        let stats = monitor.stats_on(today).await;
        assert_eq!(stats.requests_today, 3);
        assert_eq!(stats.session_requests, 3);
        assert_eq!(stats.total_requests, 3);
        assert!((stats.today_cost - 3.6).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_persists_across_reopen_but_session_resets() {
        let dir = tempfile::tempdir().unwrap();
        let today = day("2024-06-15");
        {
            let monitor = monitor_with_limit(dir.path(), 30_000).await;
            monitor.record_on(today, "copernicus_sentinel", 1.0).await;
        }

        let monitor = monitor_with_limit(dir.path(), 30_000).await;
        let stats = monitor.stats_on(today).await;
        assert_eq!(stats.total_requests, 1);
        assert_eq!(stats.requests_today, 1);
        assert_eq!(stats.session_requests, 0);
    }

    #[tokio::test]
    async fn test_status_thresholds() {
        let dir = tempfile::tempdir().unwrap();
        // Sustainable daily share = 300/30 = 10 requests.
        let monitor = monitor_with_limit(dir.path(), 300).await;
        assert_eq!(monitor.status_for(2), UsageStatus::Low);
        assert_eq!(monitor.status_for(3), UsageStatus::Moderate);
        assert_eq!(monitor.status_for(6), UsageStatus::Moderate);
        assert_eq!(monitor.status_for(7), UsageStatus::High);
        assert_eq!(monitor.status_for(9), UsageStatus::High);
        assert_eq!(monitor.status_for(10), UsageStatus::VeryHigh);
    }

    #[tokio::test]
    async fn test_rollups_by_week_and_month() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = monitor_with_limit(dir.path(), 30_000).await;
        let today = day("2024-06-15");

        monitor.record_on(day("2024-06-15"), "a", 1.0).await;
        monitor.record_on(day("2024-06-14"), "a", 1.0).await;
        monitor.record_on(day("2024-06-14"), "a", 1.0).await;
        monitor.record_on(day("2024-06-01"), "a", 1.0).await;
        // Outside both week and month.
        monitor.record_on(day("2024-05-20"), "a", 1.0).await;

        let stats = monitor.stats_on(today).await;
        assert_eq!(stats.yesterday_requests, 2);
        assert_eq!(stats.requests_this_month, 4);
        // Two recorded days within the trailing week: (1 + 2) / 2.
        assert!((stats.weekly_average - 1.5).abs() < 1e-9);
        assert_eq!(stats.total_requests, 5);
    }

    #[tokio::test]
    async fn test_cleanup_old_data() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = monitor_with_limit(dir.path(), 30_000).await;
        let today = day("2024-06-15");

        monitor.record_on(day("2024-06-10"), "a", 1.0).await;
        monitor.record_on(day("2024-05-01"), "a", 1.0).await;
        monitor.record_on(day("2024-04-01"), "a", 1.0).await;

        let removed = monitor.cleanup_on(today, 30).await;
        assert_eq!(removed, 2);
        assert_eq!(monitor.cleanup_on(today, 30).await, 0);

        let stats = monitor.stats_on(today).await;
        assert_eq!(stats.requests_this_month, 1);
        // Lifetime counter is unaffected by retention sweeps.
        assert_eq!(stats.total_requests, 3);
    }
}
