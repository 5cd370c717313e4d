//! Resilient imagery acquisition: cache-fronted fetching with bounded
//! retry, progressive date-window widening, and the composite/anomaly
//! calculators layered on top.

pub mod anomaly;
pub mod composite;
pub mod fetcher;

pub use composite::Composite;
pub use fetcher::{
    FetchOutcome, FetchRequest, ResilientFetcher, RetryPolicy, WideningPolicy, WideningRound,
};
