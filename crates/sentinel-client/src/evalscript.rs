//! Evalscript generation for Sentinel-2 vegetation indices.
//!
//! Two families per index: a simple single-sample script, and a masked
//! variant that requests TILE mosaicking, filters samples through the
//! scene-classification layer (SCL) plus the data mask, and reduces the
//! surviving samples with a per-pixel median.

use sat_common::VegetationIndex;

/// Build the evalscript for an index.
///
/// `masked` selects SCL + dataMask filtering with temporal-median
/// mosaicking; `include_water` additionally keeps water-classified pixels.
pub fn build_evalscript(index: VegetationIndex, masked: bool, include_water: bool) -> String {
    if masked {
        masked_script(index, include_water)
    } else {
        simple_script(index)
    }
}

/// Band pair and denominator offset for an index: (nir, other, offset).
/// NDVI = (B08-B04)/(B08+B04), OSAVI adds 0.16 to the denominator,
/// NDRE swaps B04 for the red-edge band B05.
fn index_terms(index: VegetationIndex) -> (&'static str, &'static str, f64) {
    match index {
        VegetationIndex::Ndvi => ("B08", "B04", 0.0),
        VegetationIndex::Osavi => ("B08", "B04", 0.16),
        VegetationIndex::Ndre => ("B08", "B05", 0.0),
    }
}

fn denominator(nir: &str, other: &str, offset: f64) -> String {
    if offset > 0.0 {
        format!("s.{} + s.{} + {} + 1e-6", nir, other, offset)
    } else {
        format!("s.{} + s.{} + 1e-6", nir, other)
    }
}

fn simple_script(index: VegetationIndex) -> String {
    let (nir, other, offset) = index_terms(index);
    format!(
        r#"//VERSION=3
function setup() {{
  return {{
    input: ["{nir}", "{other}"],
    output: {{ bands: 1, sampleType: "FLOAT32" }}
  }};
}}
function evaluatePixel(s) {{
  var den = {den};
  var value = (s.{nir} - s.{other}) / den;
  return [value];
}}
"#,
        nir = nir,
        other = other,
        den = denominator(nir, other, offset),
    )
}

/// SCL classes kept when masking: vegetation (4), not vegetated (5),
/// unclassified (7), optionally water (6).
fn keep_classes(include_water: bool) -> String {
    if include_water {
        "4,5,7,6".to_string()
    } else {
        "4,5,7".to_string()
    }
}

fn masked_script(index: VegetationIndex, include_water: bool) -> String {
    let (nir, other, offset) = index_terms(index);
    format!(
        r#"//VERSION=3
function setup() {{
  return {{
    input: [{{ bands: ["{nir}", "{other}", "SCL", "dataMask"] }}],
    output: {{ bands: 1, sampleType: "FLOAT32" }},
    mosaicking: "TILE"
  }};
}}
function median(vals) {{
  if (!vals || vals.length === 0) return NaN;
  vals.sort(function(a,b){{ return a-b; }});
  var m = Math.floor(vals.length / 2);
  return (vals.length % 2) ? vals[m] : 0.5 * (vals[m-1] + vals[m]);
}}
const KEEP = new Set([{keep}]);

function evaluatePixel(samples) {{
  var vals = [];
  for (var i = 0; i < samples.length; i++) {{
    var s = samples[i];
    if (s.dataMask === 0) continue;
    if (!KEEP.has(s.SCL)) continue;
    var den = {den};
    if (den <= 0) continue;
    var value = (s.{nir} - s.{other}) / den;
    if (isFinite(value)) vals.push(value);
  }}
  return [ median(vals) ];
}}
"#,
        nir = nir,
        other = other,
        keep = keep_classes(include_water),
        den = denominator(nir, other, offset),
    )
}
