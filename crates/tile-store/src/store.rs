//! Two-layer tile store: lru memory cache over a file-backed cold layer.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use chrono::Utc;
use lru::LruCache;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use sat_common::{DateWindow, Raster, SatError, SatResult, VegetationIndex};

use crate::key::CacheKey;
use crate::metadata::{EntryMeta, MetadataIndex};

const METADATA_FILE: &str = "cache_metadata.json";
const RASTER_EXT: &str = "ras";

/// Tile store configuration.
#[derive(Debug, Clone)]
pub struct TileStoreConfig {
    /// Directory holding raster files and the metadata index.
    pub cache_dir: PathBuf,
    /// Maximum rasters held in the memory layer.
    pub memory_capacity: usize,
    /// Size budget applied by the automatic housekeeping pass.
    pub max_size_mb: u64,
    /// Probability that a `put` triggers housekeeping. Amortizes cleanup
    /// cost without a scheduler; it is not a correctness mechanism, and a
    /// deployment needing a hard size bound must still call
    /// `evict_by_size` on a schedule.
    pub housekeeping_probability: f64,
}

impl Default for TileStoreConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("./.sat_cache"),
            memory_capacity: 64,
            max_size_mb: 1000,
            housekeeping_probability: 0.05,
        }
    }
}

/// Descriptive fields recorded alongside a stored raster.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub requested: DateWindow,
    pub used: DateWindow,
    pub index: VegetationIndex,
    pub attempt: u32,
}

/// Snapshot of store state and effectiveness.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StoreStats {
    pub entry_count: usize,
    pub memory_entry_count: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub hit_rate_percent: f64,
    pub total_size_mb: f64,
    pub last_cleanup: Option<chrono::DateTime<Utc>>,
}

struct Inner {
    memory: LruCache<String, Raster>,
    index: MetadataIndex,
}

/// Durable key -> raster mapping with a volatile hot layer.
///
/// Construct one instance at process start and pass it by reference;
/// tests point their own instance at a temp directory. Cache failures
/// never propagate: every read/write error degrades to a miss with a log.
pub struct TileStore {
    cache_dir: PathBuf,
    metadata_path: PathBuf,
    max_size_mb: u64,
    housekeeping_probability: f64,
    inner: Mutex<Inner>,
}

impl TileStore {
    /// Open (or create) the store at the configured directory.
    ///
    /// An unusable cache directory is the one construction-time error;
    /// everything after this degrades gracefully instead of failing.
    pub async fn open(config: TileStoreConfig) -> SatResult<Self> {
        tokio::fs::create_dir_all(&config.cache_dir)
            .await
            .map_err(|e| {
                SatError::StorageError(format!(
                    "cannot create cache dir {}: {}",
                    config.cache_dir.display(),
                    e
                ))
            })?;

        let metadata_path = config.cache_dir.join(METADATA_FILE);
        let index = MetadataIndex::load(&metadata_path).await;
        let capacity =
            NonZeroUsize::new(config.memory_capacity.max(1)).expect("capacity is nonzero");

        debug!(
            dir = %config.cache_dir.display(),
            entries = index.entries.len(),
            "Opened tile store"
        );

        Ok(Self {
            cache_dir: config.cache_dir,
            metadata_path,
            max_size_mb: config.max_size_mb,
            housekeeping_probability: config.housekeeping_probability.clamp(0.0, 1.0),
            inner: Mutex::new(Inner {
                memory: LruCache::new(capacity),
                index,
            }),
        })
    }

    fn raster_path(&self, key: &CacheKey) -> PathBuf {
        self.cache_dir.join(format!("{}.{}", key, RASTER_EXT))
    }

    /// Look up a raster. Memory first, then disk with an integrity check;
    /// disk hits are promoted into memory. A corrupt disk entry is
    /// deleted on the spot and reported as a miss.
    pub async fn get(&self, key: &CacheKey) -> Option<Raster> {
        let mut inner = self.inner.lock().await;

        if let Some(raster) = inner.memory.get(key.as_str()) {
            let raster = raster.clone();
            inner.index.stats.cache_hits += 1;
            self.persist(&inner).await;
            debug!(key = %key, "Memory cache hit");
            return Some(raster);
        }

        if inner.index.entries.contains_key(key.as_str()) {
            match self.read_raster(&self.raster_path(key)).await {
                Ok(raster) => {
                    inner.memory.put(key.as_str().to_string(), raster.clone());
                    inner.index.stats.cache_hits += 1;
                    self.persist(&inner).await;
                    debug!(key = %key, "Disk cache hit");
                    return Some(raster);
                }
                Err(reason) => {
                    warn!(key = %key, reason = %reason, "Corrupt cache entry, removing");
                    self.remove_entry(&mut inner, key.as_str()).await;
                }
            }
        }

        inner.index.stats.cache_misses += 1;
        self.persist(&inner).await;
        None
    }

    /// Metadata for an entry, if present and intact enough to be indexed.
    pub async fn entry(&self, key: &CacheKey) -> Option<EntryMeta> {
        let inner = self.inner.lock().await;
        inner.index.entries.get(key.as_str()).cloned()
    }

    /// Store a raster. Memory is updated unconditionally; the disk write
    /// is best-effort (a failed write leaves a memory-only entry for this
    /// process lifetime). Occasionally triggers a housekeeping pass.
    pub async fn put(&self, key: &CacheKey, raster: &Raster, entry: NewEntry) {
        let mut inner = self.inner.lock().await;
        inner.memory.put(key.as_str().to_string(), raster.clone());

        let bytes = raster.to_bytes();
        let path = self.raster_path(key);
        match tokio::fs::write(&path, &bytes).await {
            Ok(()) => {
                inner.index.entries.insert(
                    key.as_str().to_string(),
                    EntryMeta {
                        created_at: Utc::now(),
                        requested: entry.requested,
                        used: entry.used,
                        index: entry.index,
                        width: raster.width() as u32,
                        height: raster.height() as u32,
                        file_size: bytes.len() as u64,
                        attempt: entry.attempt,
                    },
                );
                self.persist(&inner).await;
                debug!(key = %key, bytes = bytes.len(), "Stored cache entry");
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Disk write failed, entry is memory-only");
            }
        }

        if rand::random::<f64>() < self.housekeeping_probability {
            debug!("Housekeeping pass triggered");
            self.sweep_corrupted(&mut inner).await;
            self.sweep_by_size(&mut inner, self.max_size_mb).await;
            self.persist(&inner).await;
        }
    }

    /// Evict oldest entries until total recorded size fits the budget.
    /// Returns the number of entries removed.
    pub async fn evict_by_size(&self, max_size_mb: u64) -> usize {
        let mut inner = self.inner.lock().await;
        let removed = self.sweep_by_size(&mut inner, max_size_mb).await;
        self.persist(&inner).await;
        removed
    }

    /// Remove entries whose backing file is missing, empty, or unreadable.
    /// Returns the number of entries removed.
    pub async fn evict_corrupted(&self) -> usize {
        let mut inner = self.inner.lock().await;
        let removed = self.sweep_corrupted(&mut inner).await;
        self.persist(&inner).await;
        removed
    }

    /// Current counters and sizes.
    pub async fn stats(&self) -> StoreStats {
        let inner = self.inner.lock().await;
        let stats = &inner.index.stats;
        let total_requests = stats.cache_hits + stats.cache_misses;
        let hit_rate = if total_requests > 0 {
            stats.cache_hits as f64 / total_requests as f64 * 100.0
        } else {
            0.0
        };
        let total_bytes: u64 = inner.index.entries.values().map(|e| e.file_size).sum();

        StoreStats {
            entry_count: inner.index.entries.len(),
            memory_entry_count: inner.memory.len(),
            cache_hits: stats.cache_hits,
            cache_misses: stats.cache_misses,
            hit_rate_percent: (hit_rate * 100.0).round() / 100.0,
            total_size_mb: mb(total_bytes),
            last_cleanup: stats.last_cleanup,
        }
    }

    async fn read_raster(&self, path: &Path) -> Result<Raster, String> {
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| format!("stat failed: {}", e))?;
        if meta.len() == 0 {
            return Err("zero-length file".to_string());
        }
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| format!("read failed: {}", e))?;
        Raster::from_bytes(&bytes).map_err(|e| e.to_string())
    }

    async fn remove_entry(&self, inner: &mut Inner, key: &str) {
        inner.memory.pop(key);
        inner.index.entries.remove(key);
        let path = self.cache_dir.join(format!("{}.{}", key, RASTER_EXT));
        if let Err(e) = tokio::fs::remove_file(&path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(key = %key, error = %e, "Failed to delete cache file");
            }
        }
    }

    async fn sweep_corrupted(&self, inner: &mut Inner) -> usize {
        let keys: Vec<String> = inner.index.entries.keys().cloned().collect();
        let mut corrupted = Vec::new();
        for key in keys {
            let path = self.cache_dir.join(format!("{}.{}", key, RASTER_EXT));
            let intact = matches!(tokio::fs::metadata(&path).await, Ok(m) if m.len() > 0);
            if !intact {
                corrupted.push(key);
            }
        }

        for key in &corrupted {
            self.remove_entry(inner, key).await;
        }

        if !corrupted.is_empty() {
            inner.index.stats.last_cleanup = Some(Utc::now());
            info!(count = corrupted.len(), "Removed corrupt cache entries");
        }
        corrupted.len()
    }

    async fn sweep_by_size(&self, inner: &mut Inner, max_size_mb: u64) -> usize {
        // Measure actual files rather than trusting recorded sizes.
        let mut entries: Vec<(String, u64, chrono::DateTime<Utc>)> = Vec::new();
        let mut total_bytes = 0u64;
        for (key, meta) in &inner.index.entries {
            let path = self.cache_dir.join(format!("{}.{}", key, RASTER_EXT));
            if let Ok(stat) = tokio::fs::metadata(&path).await {
                total_bytes += stat.len();
                entries.push((key.clone(), stat.len(), meta.created_at));
            }
        }

        let budget_bytes = max_size_mb * 1024 * 1024;
        debug!(
            current_mb = mb(total_bytes),
            budget_mb = max_size_mb,
            "Cache size check"
        );
        if total_bytes <= budget_bytes {
            return 0;
        }

        // Oldest first: past scenes never go stale, so only space pressure
        // decides, and recency of creation breaks the tie.
        entries.sort_by_key(|(_, _, created_at)| *created_at);

        let mut removed = 0usize;
        let mut freed_bytes = 0u64;
        for (key, size, _) in entries {
            if total_bytes - freed_bytes <= budget_bytes {
                break;
            }
            self.remove_entry(inner, &key).await;
            freed_bytes += size;
            removed += 1;
        }

        inner.index.stats.last_cleanup = Some(Utc::now());
        if removed > 0 {
            info!(
                removed = removed,
                freed_mb = mb(freed_bytes),
                "Size-based eviction complete"
            );
        }
        removed
    }

    async fn persist(&self, inner: &Inner) {
        if let Err(e) = inner.index.save(&self.metadata_path).await {
            warn!(error = %e, "Failed to persist cache metadata");
        }
    }
}

fn mb(bytes: u64) -> f64 {
    (bytes as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0
}
