//! Integration tests combining AOI normalization with window handling,
//! mirroring how the acquisition layer prepares requests.

use sat_common::geometry::{clamp_pixel_budget, dims_for_bbox};
use sat_common::{AreaOfInterest, BoundingBox, DateWindow};

fn farm_ring() -> Vec<[f64; 2]> {
    vec![
        [-4.5123456, 37.2123456],
        [-4.4012345, 37.2123456],
        [-4.4012345, 37.3234567],
        [-4.5123456, 37.3234567],
    ]
}

#[test]
fn test_polygon_and_multipolygon_normalize_identically() {
    let poly = AreaOfInterest::Polygon(farm_ring());
    let multi = AreaOfInterest::MultiPolygon(vec![
        // A sliver that must lose to the real parcel.
        vec![[0.0, 0.0], [0.001, 0.0], [0.001, 0.001]],
        farm_ring(),
    ]);
    assert_eq!(
        poly.normalized_ring().unwrap(),
        multi.normalized_ring().unwrap()
    );
}

#[test]
fn test_request_preparation_pipeline() {
    let aoi = AreaOfInterest::Polygon(farm_ring());
    let bbox = aoi.bounding_box().unwrap();
    assert!(bbox.contains_point(-4.45, 37.25));

    // A parcel of ~11km x 12km at 10 m/px lands inside the clamp range.
    let (w, h) = dims_for_bbox(&bbox, 10.0, 512, 2048);
    assert!(w >= 512 && w <= 2048);
    assert!(h >= 512 && h <= 2048);
    let (w, h) = clamp_pixel_budget(w, h, 2300 * 2300);
    assert!(w as u64 * h as u64 <= 2300 * 2300);

    let window = DateWindow::from_iso("2024-06-01", "2024-06-10").unwrap();
    let reference = window.shift_to_year(2021);
    assert_eq!(reference.start_iso(), "2021-06-01");
    assert_eq!(window.days(), reference.days());
}

#[test]
fn test_bbox_aoi_roundtrip() {
    let bbox = BoundingBox::new(-4.5, 37.2, -4.4, 37.3);
    let aoi = AreaOfInterest::BBox(bbox);
    let ring = aoi.normalized_ring().unwrap();
    assert_eq!(ring.len(), 5);
    assert_eq!(aoi.bounding_box().unwrap(), bbox);
    assert!(aoi.area_hectares() > 0.0);
}
