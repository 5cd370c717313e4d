//! The remote-imagery provider seam.
//!
//! The acquisition layer talks to the provider exclusively through
//! [`ImageryProvider`], so tests substitute stubs and the HTTP client
//! stays in its own crate.

use std::time::Duration;

use async_trait::async_trait;

use crate::geometry::AreaOfInterest;
use crate::index::VegetationIndex;
use crate::raster::Raster;
use crate::window::DateWindow;

/// Which source scene wins per pixel when a window holds multiple
/// observations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum MosaickingOrder {
    /// Prefer the observation with the least cloud cover.
    LeastCc,
    /// Prefer the most recent observation.
    MostRecent,
}

impl MosaickingOrder {
    /// Wire name used in provider request payloads.
    pub fn wire_name(&self) -> &'static str {
        match self {
            MosaickingOrder::LeastCc => "leastCC",
            MosaickingOrder::MostRecent => "mostRecent",
        }
    }
}

/// One imagery request: what to compute, where, when, and under which
/// quality filters.
#[derive(Debug, Clone)]
pub struct SceneRequest {
    pub aoi: AreaOfInterest,
    pub window: DateWindow,
    pub index: VegetationIndex,
    /// Apply scene-classification masking and temporal-median mosaicking.
    pub masked: bool,
    /// Keep water-classified pixels when masking.
    pub include_water: bool,
    pub width: u32,
    pub height: u32,
    /// Maximum acceptable cloud coverage percentage for input scenes.
    pub max_cloud_coverage: f64,
    pub mosaicking_order: MosaickingOrder,
}

impl SceneRequest {
    /// A masked request with the default quality filters.
    pub fn new(
        aoi: AreaOfInterest,
        window: DateWindow,
        index: VegetationIndex,
        width: u32,
        height: u32,
    ) -> Self {
        Self {
            aoi,
            window,
            index,
            masked: true,
            include_water: false,
            width,
            height,
            max_cloud_coverage: 20.0,
            mosaicking_order: MosaickingOrder::LeastCc,
        }
    }
}

/// Errors surfaced by a provider implementation for a single call.
///
/// Retry policy lives in the caller; implementations report each outcome
/// once and never sleep or loop internally.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// HTTP 429. `retry_after` is the provider's requested delay, already
    /// converted from its millisecond header convention.
    #[error("Provider rate limit hit")]
    RateLimited { retry_after: Option<Duration> },

    /// Any other non-success HTTP status.
    #[error("Provider HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Transport-level failure (connect, timeout, interrupted body).
    #[error("Network error: {0}")]
    Network(String),

    /// Response body was not a decodable raster.
    #[error("Undecodable raster response: {0}")]
    Decode(String),
}

impl ProviderError {
    /// Whether a retry with backoff could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::RateLimited { .. } | ProviderError::Network(_) => true,
            ProviderError::Http { status, .. } => *status >= 500,
            ProviderError::Decode(_) => false,
        }
    }
}

impl From<ProviderError> for crate::error::SatError {
    fn from(err: ProviderError) -> Self {
        match err {
            // Terminal rate limiting is mapped by the retry layer, which
            // knows the attempt count; this conversion covers the rest.
            ProviderError::RateLimited { .. } => crate::error::SatError::Provider {
                status: Some(429),
                message: "rate limited".to_string(),
            },
            ProviderError::Http { status, message } => crate::error::SatError::Provider {
                status: Some(status),
                message,
            },
            ProviderError::Network(message) => crate::error::SatError::Provider {
                status: None,
                message,
            },
            ProviderError::Decode(message) => crate::error::SatError::DecodeError(message),
        }
    }
}

/// A remote satellite-imagery source producing index composites.
#[async_trait]
pub trait ImageryProvider: Send + Sync {
    /// Fetch one composite raster for the request window.
    ///
    /// An all-NaN raster is a valid response meaning "no usable imagery in
    /// this window" - data absence is not an error.
    async fn fetch_scene(&self, token: &str, request: &SceneRequest)
        -> Result<Raster, ProviderError>;
}
