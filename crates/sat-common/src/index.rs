//! Vegetation index identifiers.

use serde::{Deserialize, Serialize};

/// Supported per-pixel vegetation indices.
///
/// The cache and fetcher treat these as opaque identifiers; only the
/// provider client knows the band math behind each one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VegetationIndex {
    Ndvi,
    Osavi,
    Ndre,
}

impl VegetationIndex {
    pub fn as_str(&self) -> &'static str {
        match self {
            VegetationIndex::Ndvi => "NDVI",
            VegetationIndex::Osavi => "OSAVI",
            VegetationIndex::Ndre => "NDRE",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "NDVI" => Some(VegetationIndex::Ndvi),
            "OSAVI" => Some(VegetationIndex::Osavi),
            "NDRE" => Some(VegetationIndex::Ndre),
            _ => None,
        }
    }
}

impl std::fmt::Display for VegetationIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_names() {
        for ix in [
            VegetationIndex::Ndvi,
            VegetationIndex::Osavi,
            VegetationIndex::Ndre,
        ] {
            assert_eq!(VegetationIndex::from_name(ix.as_str()), Some(ix));
        }
        assert_eq!(VegetationIndex::from_name("ndvi"), Some(VegetationIndex::Ndvi));
        assert_eq!(VegetationIndex::from_name("EVI"), None);
    }
}
