//! In-memory price provider and workspace setup shared by the runner tests.

#![allow(dead_code)]

use chrono::{Duration, NaiveDate, NaiveDateTime};
use corrlab_core::data::{DataError, DataSource, FetchResult, PriceBar, PriceProvider};
use corrlab_core::domain::Granularity;
use corrlab_runner::config::PipelineConfig;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

pub fn day(d: i64) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        + Duration::days(d)
}

pub fn minute(m: i64) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 2)
        .unwrap()
        .and_hms_opt(14, 30, 0)
        .unwrap()
        + Duration::minutes(m)
}

/// "Now" for the tests: a month after the last fixture bar.
pub fn now() -> NaiveDateTime {
    day(60)
}

/// Serves fixed close paths; symbols in `failing` return `SymbolNotFound`.
pub struct FixtureProvider {
    closes: HashMap<String, Vec<f64>>,
    failing: HashSet<String>,
    pub calls: AtomicUsize,
}

impl FixtureProvider {
    pub fn new() -> Self {
        Self {
            closes: HashMap::new(),
            failing: HashSet::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with(mut self, symbol: &str, closes: Vec<f64>) -> Self {
        self.closes.insert(symbol.to_string(), closes);
        self
    }

    pub fn failing(mut self, symbol: &str) -> Self {
        self.failing.insert(symbol.to_string());
        self
    }

    /// Five instruments in two co-moving groups.
    pub fn standard() -> Self {
        let base: Vec<f64> = (0..30)
            .map(|i| 100.0 + (i as f64 * 0.7).sin() * 5.0 + i as f64 * 0.2)
            .collect();
        let other: Vec<f64> = (0..30)
            .map(|i| 50.0 + (i as f64 * 1.3).cos() * 3.0)
            .collect();
        Self::new()
            .with("AAA", base.clone())
            .with("BBB", base.iter().map(|p| p * 1.5 + 2.0).collect())
            .with("CCC", base.iter().map(|p| 400.0 - p).collect())
            .with("DDD", other.clone())
            .with("EEE", other.iter().map(|p| p * 0.5 + 10.0).collect())
    }
}

impl PriceProvider for FixtureProvider {
    fn name(&self) -> &str {
        "fixture"
    }

    fn fetch(
        &self,
        symbol: &str,
        granularity: Granularity,
        _start: NaiveDate,
        _end: NaiveDate,
    ) -> Result<FetchResult, DataError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if self.failing.contains(symbol) {
            return Err(DataError::SymbolNotFound {
                symbol: symbol.to_string(),
            });
        }
        let closes = self.closes.get(symbol).ok_or_else(|| DataError::SymbolNotFound {
            symbol: symbol.to_string(),
        })?;
        let bars = closes
            .iter()
            .enumerate()
            .map(|(i, &close)| PriceBar {
                timestamp: match granularity {
                    Granularity::Daily => day(i as i64),
                    Granularity::Minute => minute(i as i64),
                },
                open: close,
                high: close,
                low: close,
                close,
                volume: 1_000,
                adj_close: close,
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

/// Universe CSV for `symbols` with alternating sectors.
pub fn write_universe(base: &Path, symbols: &[&str]) {
    let mut csv = String::from("Symbol,Security,GICS Sector\n");
    for (i, s) in symbols.iter().enumerate() {
        let sector = if i % 2 == 0 { "Industrials" } else { "Utilities" };
        csv.push_str(&format!("{s},{s} Corp,{sector}\n"));
    }
    std::fs::create_dir_all(base).unwrap();
    std::fs::write(base.join("universe.csv"), csv).unwrap();
}

/// Fast, deterministic configuration rooted at `base`.
pub fn test_config(base: &Path) -> PipelineConfig {
    let mut config = PipelineConfig::with_seed(42);
    config.storage.base_dir = base.to_path_buf();
    config.aggregation.concurrency = 1;
    config.projection.perplexity = 1.5;
    config.projection.max_iter = 300;
    config
}
