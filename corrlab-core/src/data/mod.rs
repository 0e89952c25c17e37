//! Market data: provider trait, Yahoo Finance client, Parquet price cache,
//! universe metadata and the download orchestrator.

pub mod cache;
pub mod circuit_breaker;
pub mod download;
pub mod provider;
pub mod universe;
pub mod yahoo;

pub use cache::{CacheMeta, CacheStatus, PriceCache};
pub use circuit_breaker::CircuitBreaker;
pub use download::{download_symbols, DownloadSummary};
pub use provider::{
    close_series, DataError, DataSource, DownloadProgress, FetchResult, LogProgress, PriceBar,
    PriceProvider,
};
pub use universe::Universe;
pub use yahoo::{RetryPolicy, YahooProvider};
