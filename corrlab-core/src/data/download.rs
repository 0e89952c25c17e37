//! Download orchestrator: fetches every symbol at every granularity into the
//! price cache, with progress reporting.

use super::cache::PriceCache;
use super::provider::{DataError, DownloadProgress, PriceProvider};
use crate::domain::Granularity;
use chrono::NaiveDate;

/// Download `symbols` at each of `granularities` and cache the bars.
///
/// Without `force`, a symbol whose cached range already reaches `end` is left
/// alone. Stops early once the provider becomes unavailable (circuit breaker).
pub fn download_symbols(
    provider: &dyn PriceProvider,
    cache: &PriceCache,
    symbols: &[&str],
    granularities: &[Granularity],
    start: NaiveDate,
    end: NaiveDate,
    force: bool,
    progress: &dyn DownloadProgress,
) -> DownloadSummary {
    let jobs: Vec<(&str, Granularity)> = granularities
        .iter()
        .flat_map(|&g| symbols.iter().map(move |&s| (s, g)))
        .collect();
    let total = jobs.len();
    let mut succeeded = 0;
    let mut failed = 0;
    let mut errors: Vec<(String, Granularity, DataError)> = Vec::new();

    for (i, &(symbol, granularity)) in jobs.iter().enumerate() {
        progress.on_start(symbol, i, total);

        if !force && is_fresh(cache, symbol, granularity, end) {
            progress.on_complete(symbol, i, total, &Ok(()));
            succeeded += 1;
            continue;
        }

        let result = download_single(provider, cache, symbol, granularity, start, end);
        progress.on_complete(symbol, i, total, &result);

        match result {
            Ok(()) => succeeded += 1,
            Err(e) => {
                errors.push((symbol.to_string(), granularity, e));
                failed += 1;
            }
        }

        if !provider.is_available() {
            for &(sym, g) in &jobs[(i + 1)..] {
                errors.push((sym.to_string(), g, DataError::CircuitBreakerTripped));
                failed += 1;
            }
            break;
        }
    }

    progress.on_batch_complete(succeeded, failed, total);

    DownloadSummary {
        total,
        succeeded,
        failed,
        errors,
    }
}

fn is_fresh(cache: &PriceCache, symbol: &str, granularity: Granularity, end: NaiveDate) -> bool {
    cache
        .get_meta(symbol, granularity)
        .is_some_and(|meta| meta.end.date() >= end)
}

/// fetch → validate → cache.
fn download_single(
    provider: &dyn PriceProvider,
    cache: &PriceCache,
    symbol: &str,
    granularity: Granularity,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<(), DataError> {
    let fetched = provider.fetch(symbol, granularity, start, end)?;
    // Reject unusable data before it replaces a good cache entry.
    fetched.close_series()?;
    cache.write(&fetched)?;
    Ok(())
}

/// Summary of a batch download operation.
#[derive(Debug)]
pub struct DownloadSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub errors: Vec<(String, Granularity, DataError)>,
}

impl DownloadSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::provider::{DataSource, FetchResult, PriceBar};
    use std::sync::Mutex;

    struct FixtureProvider {
        calls: Mutex<Vec<(String, Granularity)>>,
    }

    impl PriceProvider for FixtureProvider {
        fn name(&self) -> &str {
            "fixture"
        }

        fn fetch(
            &self,
            symbol: &str,
            granularity: Granularity,
            start: NaiveDate,
            _end: NaiveDate,
        ) -> Result<FetchResult, DataError> {
            self.calls.lock().unwrap().push((symbol.to_string(), granularity));
            if symbol == "BAD" {
                return Err(DataError::SymbolNotFound {
                    symbol: symbol.to_string(),
                });
            }
            let bars = (0..3)
                .map(|i| PriceBar {
                    timestamp: (start + chrono::Duration::days(i)).and_hms_opt(0, 0, 0).unwrap(),
                    open: 10.0,
                    high: 10.0,
                    low: 10.0,
                    close: 10.0 + i as f64,
                    volume: 1,
                    adj_close: 10.0 + i as f64,
                })
                .collect();
            Ok(FetchResult {
                symbol: symbol.to_string(),
                granularity,
                bars,
                source: DataSource::Fixture,
            })
        }

        fn is_available(&self) -> bool {
            true
        }
    }

    struct Quiet;

    impl DownloadProgress for Quiet {
        fn on_start(&self, _: &str, _: usize, _: usize) {}
        fn on_complete(&self, _: &str, _: usize, _: usize, _: &Result<(), DataError>) {}
        fn on_batch_complete(&self, _: usize, _: usize, _: usize) {}
    }

    #[test]
    fn downloads_every_symbol_and_granularity() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PriceCache::new(dir.path());
        let provider = FixtureProvider {
            calls: Mutex::new(vec![]),
        };
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();

        let summary = download_symbols(
            &provider,
            &cache,
            &["AAA", "BAD"],
            &Granularity::ALL,
            start,
            start,
            false,
            &Quiet,
        );

        assert_eq!(summary.total, 4);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 2);
        assert!(!summary.all_succeeded());
        assert!(cache.load("AAA", Granularity::Minute).is_ok());
    }

    #[test]
    fn fresh_cache_is_not_refetched_unless_forced() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PriceCache::new(dir.path());
        let provider = FixtureProvider {
            calls: Mutex::new(vec![]),
        };
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let daily = [Granularity::Daily];

        download_symbols(&provider, &cache, &["AAA"], &daily, start, start, false, &Quiet);
        download_symbols(&provider, &cache, &["AAA"], &daily, start, start, false, &Quiet);
        assert_eq!(provider.calls.lock().unwrap().len(), 1);

        download_symbols(&provider, &cache, &["AAA"], &daily, start, start, true, &Quiet);
        assert_eq!(provider.calls.lock().unwrap().len(), 2);
    }
}
