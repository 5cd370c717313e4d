//! Deterministic cache key derivation.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use sat_common::{AreaOfInterest, DateWindow, VegetationIndex};

/// Hex characters kept from the digest; plenty of collision headroom for
/// any realistic number of cached windows.
const KEY_LEN: usize = 16;

/// An opaque cache key: a truncated hex digest over the normalized request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the cache key for one request tuple.
///
/// Identical requests always produce the same key; any change to the
/// geometry, window, index, or resolution changes it. Never fails: a
/// malformed geometry falls back to a timestamp-salted key, which
/// guarantees a cache miss instead of an error.
pub fn make_cache_key(
    aoi: &AreaOfInterest,
    window: &DateWindow,
    index: VegetationIndex,
    resolution: (u32, u32),
) -> CacheKey {
    let geom_part = match aoi.normalized_ring() {
        Ok(ring) => ring_fragment(&ring),
        Err(e) => {
            warn!(error = %e, "Cache key fallback for malformed geometry");
            return fallback_key();
        }
    };

    let input = format!(
        "{}_{}_{}_{}_{}x{}",
        geom_part,
        window.start_iso(),
        window.end_iso(),
        index.as_str(),
        resolution.0,
        resolution.1
    );
    CacheKey(digest16(input.as_bytes()))
}

fn ring_fragment(ring: &[[f64; 2]]) -> String {
    let mut s = String::with_capacity(ring.len() * 20);
    for [x, y] in ring {
        s.push_str(&format!("{:.6},{:.6};", x, y));
    }
    s
}

fn digest16(input: &[u8]) -> String {
    let digest = Sha256::digest(input);
    hex::encode(digest)[..KEY_LEN].to_string()
}

fn fallback_key() -> CacheKey {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    CacheKey(digest16(nanos.to_string().as_bytes()))
}
