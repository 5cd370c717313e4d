//! Anomaly computation: current composite minus the per-pixel median of
//! reference-year composites.

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use sat_common::{ImageryProvider, Raster, SatError, SatResult};

use crate::fetcher::{FetchRequest, ResilientFetcher};

impl<P: ImageryProvider> ResilientFetcher<P> {
    /// Compute the anomaly of the requested window against the same
    /// calendar interval in each reference year.
    ///
    /// Reference years with no usable imagery are skipped with a warning;
    /// if none produce data the request shape itself is the problem and
    /// an `InsufficientReferenceData` error is raised. Results are
    /// memoized per process on top of the tile store, since each anomaly
    /// recomputes a median over several cached composites.
    pub async fn compute_anomaly(
        &self,
        token: &str,
        request: &FetchRequest,
        reference_years: &[i32],
    ) -> SatResult<Raster> {
        let memo_key = anomaly_memo_key(request, reference_years);
        if let Some(cached) = self.anomaly_memo.lock().await.get(&memo_key) {
            debug!(years = ?reference_years, "Anomaly served from memo");
            return Ok(cached.clone());
        }

        info!(window = %request.window, years = ?reference_years, "Computing anomaly");

        let current = self
            .fetch_window(token, request)
            .await?
            .raster
            .ok_or_else(|| {
                SatError::DataNotAvailable(format!(
                    "no usable imagery for current window {}",
                    request.window
                ))
            })?;

        let mut references = Vec::with_capacity(reference_years.len());
        for &year in reference_years {
            let mut shifted = request.clone();
            shifted.window = request.window.shift_to_year(year);

            match self.fetch_window(token, &shifted).await {
                Ok(outcome) => match outcome.raster {
                    Some(raster) => references.push(raster),
                    None => {
                        warn!(year = year, window = %shifted.window, "Reference year has no data, skipping");
                    }
                },
                Err(e) => {
                    warn!(year = year, error = %e, "Reference year fetch failed, skipping");
                }
            }
        }

        if references.is_empty() {
            return Err(SatError::InsufficientReferenceData {
                requested: reference_years.len(),
            });
        }
        if references.len() < reference_years.len() {
            warn!(
                usable = references.len(),
                requested = reference_years.len(),
                "Anomaly computed from a partial reference set"
            );
        }

        let reference_median =
            Raster::median_stack(&references).expect("non-empty reference stack");
        let anomaly = current.subtract(&reference_median);

        debug!(
            valid = anomaly.finite_count(),
            total = anomaly.len(),
            "Anomaly array ready"
        );

        self.anomaly_memo
            .lock()
            .await
            .put(memo_key, anomaly.clone());
        Ok(anomaly)
    }
}

/// Memo key over every input that shapes the result.
fn anomaly_memo_key(request: &FetchRequest, reference_years: &[i32]) -> String {
    let mut hasher = Sha256::new();
    if let Ok(ring) = request.aoi.normalized_ring() {
        for [x, y] in ring {
            hasher.update(x.to_le_bytes());
            hasher.update(y.to_le_bytes());
        }
    }
    hasher.update(request.window.start_iso().as_bytes());
    hasher.update(request.window.end_iso().as_bytes());
    hasher.update(request.index.as_str().as_bytes());
    hasher.update(request.width.to_le_bytes());
    hasher.update(request.height.to_le_bytes());
    for year in reference_years {
        hasher.update(year.to_le_bytes());
    }
    hex::encode(hasher.finalize())[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sat_common::{AreaOfInterest, DateWindow, VegetationIndex};

    fn request() -> FetchRequest {
        FetchRequest::new(
            AreaOfInterest::Polygon(vec![
                [-4.5, 37.2],
                [-4.4, 37.2],
                [-4.4, 37.3],
                [-4.5, 37.3],
            ]),
            DateWindow::from_iso("2024-06-01", "2024-06-10").unwrap(),
            VegetationIndex::Ndvi,
            64,
            64,
        )
    }

    #[test]
    fn test_memo_key_sensitive_to_years() {
        let base = anomaly_memo_key(&request(), &[2021, 2022, 2023]);
        assert_eq!(base, anomaly_memo_key(&request(), &[2021, 2022, 2023]));
        assert_ne!(base, anomaly_memo_key(&request(), &[2021, 2022]));

        let mut other = request();
        other.width = 128;
        assert_ne!(base, anomaly_memo_key(&other, &[2021, 2022, 2023]));
    }
}
