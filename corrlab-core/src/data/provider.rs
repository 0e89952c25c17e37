//! Price provider trait and structured error types.
//!
//! The PriceProvider trait abstracts over market-data sources (Yahoo Finance,
//! the local Parquet cache) so the aggregator can be pointed at either and
//! mocked in tests.

use crate::domain::{Granularity, PriceSeries, SeriesError};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

/// Raw OHLCV bar from a data provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub timestamp: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
    pub adj_close: f64,
}

/// Structured error types for data operations.
///
/// These are designed to be displayable in both log lines and CLI output.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("authentication required: {0}")]
    AuthenticationRequired(String),

    #[error("symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("hard stop: data provider has blocked requests (circuit breaker tripped)")]
    CircuitBreakerTripped,

    #[error("cache error: {0}")]
    CacheError(String),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("parquet I/O error: {0}")]
    ParquetError(String),

    #[error("no cached {granularity} prices for symbol '{symbol}'; run `download` first")]
    NoCachedData {
        symbol: String,
        granularity: Granularity,
    },

    #[error("universe error: {0}")]
    Universe(String),

    #[error(transparent)]
    Series(#[from] SeriesError),

    #[error("data error: {0}")]
    Other(String),
}

/// Result of a successful data fetch for a single symbol.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub symbol: String,
    pub granularity: Granularity,
    pub bars: Vec<PriceBar>,
    pub source: DataSource,
}

impl FetchResult {
    /// Closing-price series, sorted and validated.
    pub fn close_series(&self) -> Result<PriceSeries, DataError> {
        close_series(self.granularity, &self.bars)
    }
}

/// Where the data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataSource {
    YahooFinance,
    Cache,
    Fixture,
}

/// Build a close-price series from bars. Bars must be strictly increasing in
/// time; NaN closes become gaps.
pub fn close_series(granularity: Granularity, bars: &[PriceBar]) -> Result<PriceSeries, DataError> {
    Ok(PriceSeries::from_points(
        granularity,
        bars.iter().map(|b| (b.timestamp, b.close)),
    )?)
}

/// Trait for price providers (Yahoo Finance, cache, fixtures).
///
/// Implementations handle the specifics of fetching from one source.
pub trait PriceProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Fetch OHLCV bars for a symbol. `start`/`end` bound daily requests;
    /// minute requests use the provider's own lookback.
    fn fetch(
        &self,
        symbol: &str,
        granularity: Granularity,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<FetchResult, DataError>;

    /// Check if the provider is currently available (not rate-limited, not blocked).
    fn is_available(&self) -> bool;
}

/// Progress callback for multi-symbol operations.
pub trait DownloadProgress: Send + Sync {
    /// Called when starting to fetch a symbol.
    fn on_start(&self, symbol: &str, index: usize, total: usize);

    /// Called when a symbol fetch completes.
    fn on_complete(&self, symbol: &str, index: usize, total: usize, result: &Result<(), DataError>);

    /// Called when the entire batch is done.
    fn on_batch_complete(&self, succeeded: usize, failed: usize, total: usize);
}

/// Progress reporter that writes through `tracing`.
pub struct LogProgress;

impl DownloadProgress for LogProgress {
    fn on_start(&self, symbol: &str, index: usize, total: usize) {
        info!("[{}/{}] fetching {symbol}", index + 1, total);
    }

    fn on_complete(
        &self,
        symbol: &str,
        _index: usize,
        _total: usize,
        result: &Result<(), DataError>,
    ) {
        match result {
            Ok(()) => info!(symbol, "ok"),
            Err(e) => warn!(symbol, error = %e, "fetch failed"),
        }
    }

    fn on_batch_complete(&self, succeeded: usize, failed: usize, total: usize) {
        info!("download complete: {succeeded}/{total} succeeded, {failed} failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(day: u32, close: f64) -> PriceBar {
        PriceBar {
            timestamp: NaiveDate::from_ymd_opt(2024, 1, day)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            open: close,
            high: close,
            low: close,
            close,
            volume: 10,
            adj_close: close,
        }
    }

    #[test]
    fn close_series_maps_nan_to_gap() {
        let s = close_series(Granularity::Daily, &[bar(2, 10.0), bar(3, f64::NAN)]).unwrap();
        assert_eq!(s.closes(), &[Some(10.0), None]);
    }

    #[test]
    fn close_series_rejects_duplicates() {
        let err = close_series(Granularity::Daily, &[bar(2, 10.0), bar(2, 11.0)]).unwrap_err();
        assert!(matches!(err, DataError::Series(_)));
    }
}
