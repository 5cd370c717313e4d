//! Common types and utilities shared across all sentinel-tiles crates.

pub mod bbox;
pub mod error;
pub mod geometry;
pub mod index;
pub mod provider;
pub mod raster;
pub mod window;

pub use bbox::BoundingBox;
pub use error::{SatError, SatResult};
pub use geometry::AreaOfInterest;
pub use index::VegetationIndex;
pub use provider::{ImageryProvider, MosaickingOrder, ProviderError, SceneRequest};
pub use raster::Raster;
pub use window::DateWindow;
