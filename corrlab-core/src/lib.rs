//! CorrLab Core: domain types, returns, correlation, projection, enrichment
//! and market data.
//!
//! This crate holds every pure stage of the pipeline:
//! - Domain types (granularity, instruments, price and return series)
//! - Return calculator (simple and log period returns)
//! - Universe return table (single multi-way outer join, melt)
//! - Correlation engine (pairwise-complete Pearson)
//! - Projection engine (exact t-SNE, seeded)
//! - Enrichment stage (metadata and recent-return joins)
//! - Data layer (provider trait, Yahoo client, Parquet cache, universe)

pub mod correlation;
pub mod data;
pub mod domain;
pub mod enrich;
pub mod projection;
pub mod returns;
pub mod table;

pub use correlation::{correlation_matrix, CorrelationError, CorrelationMatrix};
pub use enrich::{enrich, enrich_window, EnrichedRow, ProjectedInstrument};
pub use projection::{project, ProjectionConfig, ProjectionError, ProjectionResult, ProjectionTable};
pub use returns::compute_returns;
pub use table::{ColumnKey, LongReturn, ReturnKind, ReturnTable, TableError};

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: pipeline values cross the aggregator's worker
    /// threads, so they must stay Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<domain::PriceSeries>();
        require_sync::<domain::PriceSeries>();
        require_send::<domain::ReturnSeries>();
        require_sync::<domain::ReturnSeries>();
        require_send::<domain::InstrumentMeta>();
        require_sync::<domain::InstrumentMeta>();

        require_send::<ReturnTable>();
        require_sync::<ReturnTable>();
        require_send::<CorrelationMatrix>();
        require_sync::<CorrelationMatrix>();
        require_send::<ProjectionTable>();
        require_sync::<ProjectionTable>();
        require_send::<EnrichedRow>();
        require_sync::<EnrichedRow>();

        require_send::<data::DataError>();
        require_sync::<data::DataError>();
        require_send::<data::FetchResult>();
        require_sync::<data::FetchResult>();
        require_send::<data::CircuitBreaker>();
        require_sync::<data::CircuitBreaker>();
        require_send::<data::PriceCache>();
        require_sync::<data::PriceCache>();
        require_send::<data::YahooProvider>();
        require_sync::<data::YahooProvider>();
    }

    /// Providers are used as trait objects from the aggregator's pool.
    #[test]
    fn providers_are_object_safe() {
        fn _takes_provider(p: &dyn data::PriceProvider) -> bool {
            p.is_available()
        }
        let dir = std::env::temp_dir();
        let cache = data::PriceCache::new(dir);
        assert!(_takes_provider(&cache));
    }
}
