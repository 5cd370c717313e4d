//! Single-window composite computation.

use sat_common::{ImageryProvider, Raster, SatResult};

use crate::fetcher::{FetchRequest, ResilientFetcher};

/// A composite raster and the window that actually produced it.
#[derive(Debug, Clone)]
pub struct Composite {
    pub raster: Raster,
    pub used_window: sat_common::DateWindow,
    /// 0 when served from cache, else the widening round that succeeded.
    pub attempt: u32,
}

impl<P: ImageryProvider> ResilientFetcher<P> {
    /// Compute one composite for the requested window.
    ///
    /// Returns None when no widening round found usable imagery - the
    /// caller renders "no data for this period", it is not an error.
    pub async fn compute_composite(
        &self,
        token: &str,
        request: &FetchRequest,
    ) -> SatResult<Option<Composite>> {
        let outcome = self.fetch_window(token, request).await?;
        Ok(match (outcome.raster, outcome.used_window) {
            (Some(raster), Some(used_window)) => Some(Composite {
                raster,
                used_window,
                attempt: outcome.attempt,
            }),
            _ => None,
        })
    }
}

/// Convenience: the valid-pixel fraction of a composite, for quality
/// displays.
pub fn valid_fraction(raster: &Raster) -> f64 {
    if raster.is_empty() {
        return 0.0;
    }
    raster.finite_count() as f64 / raster.len() as f64
}
