//! Copernicus Data Space client: token acquisition, Process API requests,
//! and evalscript generation for the supported vegetation indices.
//!
//! The client reports each call's outcome exactly once; retry and backoff
//! belong to the acquisition layer.

pub mod client;
pub mod evalscript;

pub use client::{SentinelClient, SentinelConfig};
pub use evalscript::build_evalscript;
