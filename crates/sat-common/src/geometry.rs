//! Area-of-interest geometry handling.
//!
//! Requests address imagery by a polygon ring, a multi-polygon, or a plain
//! bounding box. This module normalizes those shapes for cache keying and
//! provider payloads, and carries the small amount of planar math the core
//! needs (area estimate, auto-resolution).

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::bbox::BoundingBox;
use crate::error::{SatError, SatResult};

/// Decimal places kept when normalizing ring coordinates (~0.1 m),
/// absorbing floating-point jitter between otherwise-identical geometries.
const COORD_PRECISION: i32 = 6;

/// Fallback area estimate when a geometry is too malformed to measure.
const FALLBACK_AREA_HA: f64 = 10.0;

/// The spatial extent of an imagery request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AreaOfInterest {
    /// A single exterior ring of lon/lat pairs. May be open; normalization
    /// closes it. Interior holes are not supported.
    Polygon(Vec<[f64; 2]>),
    /// Multiple polygons, each an exterior ring. The largest by area is
    /// used for keying and requests.
    MultiPolygon(Vec<Vec<[f64; 2]>>),
    /// A four-corner extent.
    BBox(BoundingBox),
}

impl AreaOfInterest {
    /// The exterior ring representing this AOI: the ring itself for a
    /// polygon, the largest sub-polygon's ring for a multi-polygon, the
    /// corner ring for a bbox.
    pub fn exterior_ring(&self) -> SatResult<Vec<[f64; 2]>> {
        match self {
            AreaOfInterest::Polygon(ring) => {
                if ring.len() < 3 {
                    return Err(SatError::InvalidGeometry(format!(
                        "polygon ring needs at least 3 points, got {}",
                        ring.len()
                    )));
                }
                Ok(ring.clone())
            }
            AreaOfInterest::MultiPolygon(rings) => rings
                .iter()
                .filter(|r| r.len() >= 3)
                .max_by(|a, b| {
                    planar_ring_area(a.as_slice()).total_cmp(&planar_ring_area(b.as_slice()))
                })
                .cloned()
                .ok_or_else(|| {
                    SatError::InvalidGeometry("multi-polygon has no usable ring".to_string())
                }),
            AreaOfInterest::BBox(bbox) => {
                if bbox.width() <= 0.0 || bbox.height() <= 0.0 {
                    return Err(SatError::InvalidGeometry(format!(
                        "degenerate bbox: {}",
                        bbox.cache_key()
                    )));
                }
                Ok(bbox.corner_ring())
            }
        }
    }

    /// Exterior ring rounded to a fixed precision and explicitly closed.
    /// Two logically identical geometries normalize to the same ring.
    pub fn normalized_ring(&self) -> SatResult<Vec<[f64; 2]>> {
        let ring = self.exterior_ring()?;
        let mut out: Vec<[f64; 2]> = ring
            .iter()
            .map(|&[x, y]| [round_coord(x), round_coord(y)])
            .collect();
        if out.first() != out.last() {
            let first = out[0];
            out.push(first);
        }
        Ok(out)
    }

    /// Bounding box of the exterior ring.
    pub fn bounding_box(&self) -> SatResult<BoundingBox> {
        if let AreaOfInterest::BBox(bbox) = self {
            return Ok(*bbox);
        }
        let ring = self.exterior_ring()?;
        let mut min_x = f64::INFINITY;
        let mut min_y = f64::INFINITY;
        let mut max_x = f64::NEG_INFINITY;
        let mut max_y = f64::NEG_INFINITY;
        for &[x, y] in &ring {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
        Ok(BoundingBox::new(min_x, min_y, max_x, max_y))
    }

    /// Approximate area in hectares via an equirectangular projection
    /// around the ring centroid. Falls back to a default on malformed
    /// input rather than failing, since the estimate only steers
    /// resolution heuristics.
    pub fn area_hectares(&self) -> f64 {
        match self.try_area_hectares() {
            Ok(area) => area,
            Err(e) => {
                warn!(error = %e, "Area estimate failed, using fallback");
                FALLBACK_AREA_HA
            }
        }
    }

    fn try_area_hectares(&self) -> SatResult<f64> {
        let ring = self.exterior_ring()?;
        let lat_mid = ring.iter().map(|p| p[1]).sum::<f64>() / ring.len() as f64;
        let m_per_deg_lat = 111_000.0;
        let m_per_deg_lon = 111_000.0 * lat_mid.to_radians().cos().abs().max(0.1);

        let meters: Vec<[f64; 2]> = ring
            .iter()
            .map(|&[x, y]| [x * m_per_deg_lon, y * m_per_deg_lat])
            .collect();
        Ok(planar_ring_area(&meters) / 10_000.0)
    }
}

fn round_coord(v: f64) -> f64 {
    let scale = 10f64.powi(COORD_PRECISION);
    (v * scale).round() / scale
}

/// Shoelace area of a ring in its own planar units (absolute value).
fn planar_ring_area(ring: &[[f64; 2]]) -> f64 {
    if ring.len() < 3 {
        return 0.0;
    }
    let mut sum = 0.0;
    for i in 0..ring.len() {
        let [x1, y1] = ring[i];
        let [x2, y2] = ring[(i + 1) % ring.len()];
        sum += x1 * y2 - x2 * y1;
    }
    sum.abs() / 2.0
}

/// Compute output dimensions for a bbox at a target ground resolution,
/// clamped to `[min_dim, max_dim]` per axis.
pub fn dims_for_bbox(
    bbox: &BoundingBox,
    target_m_per_px: f64,
    min_dim: u32,
    max_dim: u32,
) -> (u32, u32) {
    let lat_mid = (bbox.min_y + bbox.max_y) / 2.0;
    let m_per_deg_lat = 111_000.0;
    let m_per_deg_lon = 111_000.0 * lat_mid.to_radians().cos().abs().max(0.1);
    let width_m = bbox.width() * m_per_deg_lon;
    let height_m = bbox.height() * m_per_deg_lat;
    let w = ((width_m / target_m_per_px).round() as i64).clamp(min_dim as i64, max_dim as i64);
    let h = ((height_m / target_m_per_px).round() as i64).clamp(min_dim as i64, max_dim as i64);
    (w as u32, h as u32)
}

/// Scale dimensions down uniformly if they exceed the provider's pixel
/// budget (a conservative limit below the documented request maximum).
pub fn clamp_pixel_budget(width: u32, height: u32, max_pixels: u64) -> (u32, u32) {
    let pixels = width as u64 * height as u64;
    if pixels <= max_pixels {
        return (width, height);
    }
    let scale = (max_pixels as f64 / pixels as f64).sqrt();
    (
        ((width as f64 * scale) as u32).max(1),
        ((height as f64 * scale) as u32).max(1),
    )
}
