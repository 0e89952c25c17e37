//! Parquet price cache with Hive-style partitioning.
//!
//! Layout: `{cache_dir}/{granularity}/symbol={SYMBOL}/bars.parquet`
//!
//! - Atomic writes (write to .tmp, rename into place)
//! - Integrity validation on load (schema check, row count > 0)
//! - Quarantine for corrupt files (`bars.parquet.quarantined`)
//! - Metadata sidecar per symbol (hash, time range, source)
//!
//! Timestamps are stored as epoch milliseconds in an `i64` column.

use super::provider::{DataError, DataSource, FetchResult, PriceBar, PriceProvider};
use crate::domain::Granularity;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

const BARS_FILE: &str = "bars.parquet";
const EXPECTED_COLUMNS: [&str; 7] = [
    "timestamp_ms",
    "open",
    "high",
    "low",
    "close",
    "volume",
    "adj_close",
];

/// Metadata sidecar for a cached symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMeta {
    pub symbol: String,
    pub granularity: Granularity,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub bar_count: usize,
    pub data_hash: String,
    pub source: DataSource,
    pub cached_at: NaiveDateTime,
}

/// The Parquet price cache.
pub struct PriceCache {
    cache_dir: PathBuf,
}

impl PriceCache {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// `{cache_dir}/{granularity}/symbol={SYMBOL}/`
    fn symbol_dir(&self, symbol: &str, granularity: Granularity) -> PathBuf {
        self.cache_dir
            .join(granularity.as_str())
            .join(format!("symbol={symbol}"))
    }

    fn bars_path(&self, symbol: &str, granularity: Granularity) -> PathBuf {
        self.symbol_dir(symbol, granularity).join(BARS_FILE)
    }

    fn meta_path(&self, symbol: &str, granularity: Granularity) -> PathBuf {
        self.symbol_dir(symbol, granularity).join("meta.json")
    }

    /// Replace the cached bars of one symbol at one granularity.
    pub fn write(&self, fetched: &FetchResult) -> Result<CacheMeta, DataError> {
        let (first, last) = match (fetched.bars.first(), fetched.bars.last()) {
            (Some(f), Some(l)) => (f.timestamp, l.timestamp),
            _ => return Err(DataError::CacheError("no bars to cache".into())),
        };

        let sym_dir = self.symbol_dir(&fetched.symbol, fetched.granularity);
        fs::create_dir_all(&sym_dir)
            .map_err(|e| DataError::CacheError(format!("failed to create dir: {e}")))?;

        let df = bars_to_dataframe(&fetched.bars)?;
        let path = self.bars_path(&fetched.symbol, fetched.granularity);
        let tmp_path = path.with_extension("parquet.tmp");
        write_parquet(&df, &tmp_path)?;
        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            DataError::CacheError(format!("atomic rename failed: {e}"))
        })?;

        let meta = CacheMeta {
            symbol: fetched.symbol.clone(),
            granularity: fetched.granularity,
            start: first,
            end: last,
            bar_count: fetched.bars.len(),
            data_hash: blake3::hash(
                &serde_json::to_vec(&fetched.bars)
                    .map_err(|e| DataError::CacheError(format!("hash serialization: {e}")))?,
            )
            .to_hex()
            .to_string(),
            source: fetched.source,
            cached_at: chrono::Local::now().naive_local(),
        };
        let meta_json = serde_json::to_string_pretty(&meta)
            .map_err(|e| DataError::CacheError(format!("meta serialization: {e}")))?;
        fs::write(self.meta_path(&fetched.symbol, fetched.granularity), meta_json)
            .map_err(|e| DataError::CacheError(format!("meta write: {e}")))?;

        Ok(meta)
    }

    /// Load cached bars, sorted by timestamp ascending. A corrupt file is
    /// quarantined and reported as missing.
    pub fn load(&self, symbol: &str, granularity: Granularity) -> Result<Vec<PriceBar>, DataError> {
        let path = self.bars_path(symbol, granularity);
        let missing = || DataError::NoCachedData {
            symbol: symbol.to_string(),
            granularity,
        };
        if !path.exists() {
            return Err(missing());
        }

        match load_and_validate_parquet(&path) {
            Ok(mut bars) => {
                bars.sort_by_key(|b| b.timestamp);
                Ok(bars)
            }
            Err(e) => {
                let quarantine = path.with_extension("parquet.quarantined");
                warn!(path = %path.display(), error = %e, "quarantining corrupt cache file");
                let _ = fs::rename(&path, &quarantine);
                Err(missing())
            }
        }
    }

    pub fn get_meta(&self, symbol: &str, granularity: Granularity) -> Option<CacheMeta> {
        let content = fs::read_to_string(self.meta_path(symbol, granularity)).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Which symbols have cached data at `granularity`, and their ranges.
    pub fn status(&self, symbols: &[&str], granularity: Granularity) -> Vec<CacheStatus> {
        symbols
            .iter()
            .map(|sym| {
                let meta = self.get_meta(sym, granularity);
                CacheStatus {
                    symbol: sym.to_string(),
                    cached: meta.is_some(),
                    start: meta.as_ref().map(|m| m.start),
                    end: meta.as_ref().map(|m| m.end),
                    bar_count: meta.as_ref().map(|m| m.bar_count),
                }
            })
            .collect()
    }
}

impl PriceProvider for PriceCache {
    fn name(&self) -> &str {
        "cache"
    }

    /// Cached bars inside `[start, end]` for daily data. Minute data is
    /// returned whole since it only ever spans the provider's lookback.
    fn fetch(
        &self,
        symbol: &str,
        granularity: Granularity,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<FetchResult, DataError> {
        let mut bars = self.load(symbol, granularity)?;
        if granularity == Granularity::Daily {
            bars.retain(|b| b.timestamp.date() >= start && b.timestamp.date() <= end);
        }
        Ok(FetchResult {
            symbol: symbol.to_string(),
            granularity,
            bars,
            source: DataSource::Cache,
        })
    }

    fn is_available(&self) -> bool {
        self.cache_dir.exists()
    }
}

/// Cache status for a single symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStatus {
    pub symbol: String,
    pub cached: bool,
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
    pub bar_count: Option<usize>,
}

// ── Parquet I/O helpers ─────────────────────────────────────────────

fn bars_to_dataframe(bars: &[PriceBar]) -> Result<DataFrame, DataError> {
    let timestamps: Vec<i64> = bars
        .iter()
        .map(|b| b.timestamp.and_utc().timestamp_millis())
        .collect();
    let opens: Vec<f64> = bars.iter().map(|b| b.open).collect();
    let highs: Vec<f64> = bars.iter().map(|b| b.high).collect();
    let lows: Vec<f64> = bars.iter().map(|b| b.low).collect();
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let volumes: Vec<u64> = bars.iter().map(|b| b.volume).collect();
    let adj_closes: Vec<f64> = bars.iter().map(|b| b.adj_close).collect();

    DataFrame::new(vec![
        Column::new("timestamp_ms".into(), timestamps),
        Column::new("open".into(), opens),
        Column::new("high".into(), highs),
        Column::new("low".into(), lows),
        Column::new("close".into(), closes),
        Column::new("volume".into(), volumes),
        Column::new("adj_close".into(), adj_closes),
    ])
    .map_err(|e| DataError::ParquetError(format!("dataframe creation: {e}")))
}

fn write_parquet(df: &DataFrame, path: &Path) -> Result<(), DataError> {
    let file =
        fs::File::create(path).map_err(|e| DataError::ParquetError(format!("create file: {e}")))?;
    ParquetWriter::new(file)
        .finish(&mut df.clone())
        .map_err(|e| DataError::ParquetError(format!("write parquet: {e}")))?;
    Ok(())
}

fn load_and_validate_parquet(path: &Path) -> Result<Vec<PriceBar>, DataError> {
    let file = fs::File::open(path).map_err(|e| DataError::ParquetError(format!("open: {e}")))?;
    let df = ParquetReader::new(file)
        .finish()
        .map_err(|e| DataError::ParquetError(format!("read: {e}")))?;

    if df.height() == 0 {
        return Err(DataError::ValidationError("empty parquet file".into()));
    }
    for col_name in EXPECTED_COLUMNS {
        if df.column(col_name).is_err() {
            return Err(DataError::ValidationError(format!(
                "missing column '{col_name}'"
            )));
        }
    }

    dataframe_to_bars(&df)
}

fn dataframe_to_bars(df: &DataFrame) -> Result<Vec<PriceBar>, DataError> {
    let column = |name: &str| {
        df.column(name)
            .map_err(|e| DataError::ParquetError(format!("column read: {e}")))
    };
    let type_err = |name: &str, e: PolarsError| {
        DataError::ParquetError(format!("{name} column type: {e}"))
    };

    let ts_ca = column("timestamp_ms")?
        .i64()
        .map_err(|e| type_err("timestamp_ms", e))?;
    let open_ca = column("open")?.f64().map_err(|e| type_err("open", e))?;
    let high_ca = column("high")?.f64().map_err(|e| type_err("high", e))?;
    let low_ca = column("low")?.f64().map_err(|e| type_err("low", e))?;
    let close_ca = column("close")?.f64().map_err(|e| type_err("close", e))?;
    let vol_ca = column("volume")?.u64().map_err(|e| type_err("volume", e))?;
    let adj_ca = column("adj_close")?
        .f64()
        .map_err(|e| type_err("adj_close", e))?;

    let n = df.height();
    let mut bars = Vec::with_capacity(n);
    for i in 0..n {
        let ms = ts_ca
            .get(i)
            .ok_or_else(|| DataError::ParquetError(format!("null timestamp at row {i}")))?;
        let timestamp = DateTime::from_timestamp_millis(ms)
            .ok_or_else(|| DataError::ParquetError(format!("timestamp out of range at row {i}")))?
            .naive_utc();

        bars.push(PriceBar {
            timestamp,
            open: open_ca.get(i).unwrap_or(f64::NAN),
            high: high_ca.get(i).unwrap_or(f64::NAN),
            low: low_ca.get(i).unwrap_or(f64::NAN),
            close: close_ca.get(i).unwrap_or(f64::NAN),
            volume: vol_ca.get(i).unwrap_or(0),
            adj_close: adj_ca.get(i).unwrap_or(f64::NAN),
        });
    }

    Ok(bars)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    fn fetched(granularity: Granularity, stamps: &[NaiveDateTime]) -> FetchResult {
        FetchResult {
            symbol: "SPY".into(),
            granularity,
            bars: stamps
                .iter()
                .enumerate()
                .map(|(i, &timestamp)| PriceBar {
                    timestamp,
                    open: 100.0 + i as f64,
                    high: 102.0 + i as f64,
                    low: 99.0 + i as f64,
                    close: 101.0 + i as f64,
                    volume: 1000 + i as u64,
                    adj_close: 101.0 + i as f64,
                })
                .collect(),
            source: DataSource::Fixture,
        }
    }

    #[test]
    fn write_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PriceCache::new(dir.path());

        cache
            .write(&fetched(Granularity::Daily, &[ts(2, 0, 0), ts(3, 0, 0)]))
            .unwrap();
        let loaded = cache.load("SPY", Granularity::Daily).unwrap();

        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].timestamp, ts(2, 0, 0));
        assert_eq!(loaded[0].open, 100.0);
        assert_eq!(loaded[1].close, 102.0);
        assert_eq!(loaded[1].volume, 1001);
    }

    #[test]
    fn granularities_are_kept_apart() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PriceCache::new(dir.path());

        cache
            .write(&fetched(Granularity::Minute, &[ts(2, 14, 30), ts(2, 14, 31)]))
            .unwrap();

        assert_eq!(cache.load("SPY", Granularity::Minute).unwrap()[1].timestamp, ts(2, 14, 31));
        assert!(matches!(
            cache.load("SPY", Granularity::Daily),
            Err(DataError::NoCachedData { .. })
        ));
    }

    #[test]
    fn meta_and_status() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PriceCache::new(dir.path());
        cache
            .write(&fetched(Granularity::Daily, &[ts(2, 0, 0), ts(3, 0, 0)]))
            .unwrap();

        let meta = cache.get_meta("SPY", Granularity::Daily).unwrap();
        assert_eq!(meta.bar_count, 2);
        assert_eq!(meta.start, ts(2, 0, 0));
        assert_eq!(meta.source, DataSource::Fixture);

        let statuses = cache.status(&["SPY", "QQQ"], Granularity::Daily);
        assert!(statuses[0].cached);
        assert!(!statuses[1].cached);
    }

    #[test]
    fn corrupt_file_is_quarantined() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PriceCache::new(dir.path());
        let path = cache.bars_path("BAD", Granularity::Daily);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"not parquet").unwrap();

        assert!(cache.load("BAD", Granularity::Daily).is_err());
        assert!(!path.exists());
        assert!(path.with_extension("parquet.quarantined").exists());
    }

    #[test]
    fn fetch_filters_daily_window() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PriceCache::new(dir.path());
        cache
            .write(&fetched(
                Granularity::Daily,
                &[ts(2, 0, 0), ts(3, 0, 0), ts(4, 0, 0)],
            ))
            .unwrap();

        let d = |day| NaiveDate::from_ymd_opt(2024, 1, day).unwrap();
        let result = cache.fetch("SPY", Granularity::Daily, d(3), d(31)).unwrap();
        assert_eq!(result.source, DataSource::Cache);
        assert_eq!(result.bars.len(), 2);
    }
}
