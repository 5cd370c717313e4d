//! On-disk metadata index for the tile store.
//!
//! The index is the source of truth for which entries exist and whether
//! they are intact. It is rewritten wholesale on each mutation; concurrent
//! writers from multiple processes can race and lose updates, which is an
//! accepted limitation of the single-process deployment.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use sat_common::{DateWindow, VegetationIndex};

/// Metadata record for one cached raster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryMeta {
    pub created_at: DateTime<Utc>,
    /// The window the caller asked for; this is what the key addresses.
    pub requested: DateWindow,
    /// The (possibly widened) window that actually produced the data.
    pub used: DateWindow,
    pub index: VegetationIndex,
    pub width: u32,
    pub height: u32,
    pub file_size: u64,
    /// Widening round that produced the data (1-based; informational).
    pub attempt: u32,
}

/// Cumulative hit/miss counters plus the last housekeeping timestamp.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexStats {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub last_cleanup: Option<DateTime<Utc>>,
}

/// The whole on-disk index document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataIndex {
    pub entries: HashMap<String, EntryMeta>,
    pub stats: IndexStats,
}

impl MetadataIndex {
    /// Load the index from disk. A missing or unreadable file yields a
    /// fresh index; a cache that cannot remember its metadata still works,
    /// it just re-fetches.
    pub async fn load(path: &Path) -> MetadataIndex {
        match tokio::fs::read(path).await {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(index) => index,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Corrupt metadata index, starting fresh");
                    MetadataIndex::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => MetadataIndex::default(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read metadata index, starting fresh");
                MetadataIndex::default()
            }
        }
    }

    /// Persist the whole index. Errors are the caller's to absorb.
    pub async fn save(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(path, json).await
    }
}
