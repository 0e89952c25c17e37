//! CSV artifact storage.
//!
//! Every artifact is rendered in memory and written with write-to-`.tmp` plus
//! rename, so a reader never sees a half-written file. Directories that are
//! replaced wholesale (per-instrument return series) go through
//! [`StagedDir`]: the old directory survives until every new file is in place.
//!
//! Layout conventions:
//! - index column `Date` (daily) or `Datetime` (minute)
//! - missing values are empty fields
//! - floats use the shortest representation that reads back exactly

use chrono::NaiveDateTime;
use corrlab_core::correlation::{CorrelationError, CorrelationMatrix};
use corrlab_core::domain::{Granularity, ReturnSeries, SeriesError};
use corrlab_core::enrich::EnrichedRow;
use corrlab_core::projection::{ProjectionError, ProjectionTable};
use corrlab_core::table::{ColumnKey, ReturnKind, ReturnTable, TableError};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("CSV error in {path}: {source}")]
    Csv { path: PathBuf, source: csv::Error },

    #[error("malformed {path}: {message}")]
    Malformed { path: PathBuf, message: String },

    #[error("invalid table in {path}: {source}")]
    Table { path: PathBuf, source: TableError },

    #[error("invalid series in {path}: {source}")]
    Series { path: PathBuf, source: SeriesError },

    #[error("invalid correlation matrix in {path}: {source}")]
    Correlation {
        path: PathBuf,
        source: CorrelationError,
    },

    #[error("invalid projection in {path}: {source}")]
    Projection {
        path: PathBuf,
        source: ProjectionError,
    },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StorageError + '_ {
    move |source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn csv_err(path: &Path) -> impl FnOnce(csv::Error) -> StorageError + '_ {
    move |source| StorageError::Csv {
        path: path.to_path_buf(),
        source,
    }
}

fn malformed(path: &Path, message: impl Into<String>) -> StorageError {
    StorageError::Malformed {
        path: path.to_path_buf(),
        message: message.into(),
    }
}

// ─── Atomic files ───────────────────────────────────────────────────

/// Write `bytes` to `path` through a sibling `.tmp` file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err(parent))?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes).map_err(io_err(&tmp))?;
    fs::rename(&tmp, path).map_err(|source| {
        let _ = fs::remove_file(&tmp);
        StorageError::Io {
            path: path.to_path_buf(),
            source,
        }
    })?;
    debug!(path = %path.display(), bytes = bytes.len(), "wrote artifact");
    Ok(())
}

/// A staging directory that replaces `target` on [`StagedDir::commit`].
///
/// Dropping an uncommitted stage deletes it and leaves `target` untouched.
#[derive(Debug)]
pub struct StagedDir {
    target: PathBuf,
    staging: PathBuf,
    committed: bool,
}

impl StagedDir {
    pub fn begin(target: &Path) -> Result<Self, StorageError> {
        let staging = sibling(target, "staging");
        if staging.exists() {
            fs::remove_dir_all(&staging).map_err(io_err(&staging))?;
        }
        fs::create_dir_all(&staging).map_err(io_err(&staging))?;
        Ok(Self {
            target: target.to_path_buf(),
            staging,
            committed: false,
        })
    }

    /// Where new files should be written.
    pub fn path(&self) -> &Path {
        &self.staging
    }

    /// Swap the staging directory into place and remove the old contents.
    pub fn commit(self) -> Result<(), StorageError> {
        Self::commit_all(vec![self])
    }

    /// Swap every stage into place, or none of them.
    ///
    /// Current targets are moved aside first; if any rename fails, the new
    /// directories already placed go back to staging and the old ones are
    /// restored.
    pub fn commit_all(mut stages: Vec<StagedDir>) -> Result<(), StorageError> {
        for stage in &stages {
            let old = stage.old_path();
            if old.exists() {
                fs::remove_dir_all(&old).map_err(io_err(&old))?;
            }
        }

        let mut moved_aside = Vec::new();
        for (i, stage) in stages.iter().enumerate() {
            if !stage.target.exists() {
                continue;
            }
            if let Err(source) = fs::rename(&stage.target, stage.old_path()) {
                roll_back(&stages, &moved_aside, &[]);
                return Err(StorageError::Io {
                    path: stage.target.clone(),
                    source,
                });
            }
            moved_aside.push(i);
        }

        let mut placed = Vec::new();
        for (i, stage) in stages.iter().enumerate() {
            if let Err(source) = fs::rename(&stage.staging, &stage.target) {
                roll_back(&stages, &moved_aside, &placed);
                return Err(StorageError::Io {
                    path: stage.target.clone(),
                    source,
                });
            }
            placed.push(i);
        }

        for stage in &mut stages {
            stage.committed = true;
        }
        for &i in &moved_aside {
            let old = stages[i].old_path();
            fs::remove_dir_all(&old).map_err(io_err(&old))?;
        }
        for stage in &stages {
            debug!(path = %stage.target.display(), "replaced directory");
        }
        Ok(())
    }

    fn old_path(&self) -> PathBuf {
        sibling(&self.target, "old")
    }
}

fn roll_back(stages: &[StagedDir], moved_aside: &[usize], placed: &[usize]) {
    for &i in placed {
        let stage = &stages[i];
        if let Err(e) = fs::rename(&stage.target, &stage.staging) {
            warn!(path = %stage.target.display(), error = %e, "failed to withdraw new directory");
        }
    }
    for &i in moved_aside {
        let stage = &stages[i];
        if let Err(e) = fs::rename(stage.old_path(), &stage.target) {
            warn!(path = %stage.target.display(), error = %e, "failed to restore previous directory");
        }
    }
}

impl Drop for StagedDir {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_dir_all(&self.staging);
        }
    }
}

/// `{parent}/.{name}.{suffix}`
fn sibling(target: &Path, suffix: &str) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "dir".into());
    target.with_file_name(format!(".{name}.{suffix}"))
}

// ─── Field formatting ───────────────────────────────────────────────

fn format_value(v: Option<f64>) -> String {
    v.map(|x| x.to_string()).unwrap_or_default()
}

fn parse_value(path: &Path, field: &str) -> Result<Option<f64>, StorageError> {
    let field = field.trim();
    if field.is_empty() || field.eq_ignore_ascii_case("nan") {
        return Ok(None);
    }
    field
        .parse::<f64>()
        .map(Some)
        .map_err(|_| malformed(path, format!("invalid number '{field}'")))
}

fn parse_required(path: &Path, field: &str) -> Result<f64, StorageError> {
    parse_value(path, field)?.ok_or_else(|| malformed(path, "missing required number"))
}

fn parse_ts(path: &Path, field: &str) -> Result<NaiveDateTime, StorageError> {
    Granularity::parse_timestamp(field)
        .ok_or_else(|| malformed(path, format!("invalid timestamp '{field}'")))
}

fn finish(path: &Path, wtr: csv::Writer<Vec<u8>>) -> Result<(), StorageError> {
    let bytes = wtr
        .into_inner()
        .map_err(|e| malformed(path, format!("flush: {e}")))?;
    write_atomic(path, &bytes)
}

fn reader(path: &Path) -> Result<csv::Reader<fs::File>, StorageError> {
    let file = fs::File::open(path).map_err(io_err(path))?;
    Ok(csv::ReaderBuilder::new().flexible(false).from_reader(file))
}

// ─── Return series ──────────────────────────────────────────────────

/// `{Date|Datetime}, Return, Log Return`
pub fn write_return_series(path: &Path, series: &ReturnSeries) -> Result<(), StorageError> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    let g = series.granularity;
    wtr.write_record([
        g.index_label(),
        ReturnKind::Simple.label(),
        ReturnKind::Log.label(),
    ])
    .map_err(csv_err(path))?;
    for i in 0..series.len() {
        wtr.write_record([
            g.format_timestamp(series.timestamps[i]),
            format_value(series.simple[i]),
            format_value(series.log[i]),
        ])
        .map_err(csv_err(path))?;
    }
    finish(path, wtr)
}

pub fn read_return_series(path: &Path, granularity: Granularity) -> Result<ReturnSeries, StorageError> {
    let mut rdr = reader(path)?;
    let headers = rdr.headers().map_err(csv_err(path))?.clone();
    let expected = [
        granularity.index_label(),
        ReturnKind::Simple.label(),
        ReturnKind::Log.label(),
    ];
    if headers.iter().map(str::trim).ne(expected.iter().copied()) {
        return Err(malformed(
            path,
            format!("expected header {expected:?}, found {:?}", headers.iter().collect::<Vec<_>>()),
        ));
    }

    let (mut ts, mut simple, mut log) = (Vec::new(), Vec::new(), Vec::new());
    for record in rdr.records() {
        let record = record.map_err(csv_err(path))?;
        ts.push(parse_ts(path, &record[0])?);
        simple.push(parse_value(path, &record[1])?);
        log.push(parse_value(path, &record[2])?);
    }
    ReturnSeries::from_parts(granularity, ts, simple, log).map_err(|source| StorageError::Series {
        path: path.to_path_buf(),
        source,
    })
}

// ─── Universe table ─────────────────────────────────────────────────

/// `{Date|Datetime}, "{SYM} Return", "{SYM} Log Return", ...`
pub fn write_universe_table(path: &Path, table: &ReturnTable) -> Result<(), StorageError> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    let g = table.granularity();
    let mut header = vec![g.index_label().to_string()];
    header.extend(table.columns().iter().map(ColumnKey::label));
    wtr.write_record(&header).map_err(csv_err(path))?;

    let mut row = Vec::with_capacity(header.len());
    for (r, ts) in table.index().iter().enumerate() {
        row.clear();
        row.push(g.format_timestamp(*ts));
        for c in 0..table.column_count() {
            row.push(format_value(table.column_values(c)[r]));
        }
        wtr.write_record(&row).map_err(csv_err(path))?;
    }
    finish(path, wtr)
}

pub fn read_universe_table(path: &Path, granularity: Granularity) -> Result<ReturnTable, StorageError> {
    let mut rdr = reader(path)?;
    let headers = rdr.headers().map_err(csv_err(path))?.clone();
    if headers.is_empty() {
        return Err(malformed(path, "empty header"));
    }
    let columns = headers
        .iter()
        .skip(1)
        .map(|label| {
            ColumnKey::parse(label)
                .ok_or_else(|| malformed(path, format!("unrecognized column '{label}'")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut index = Vec::new();
    let mut values: Vec<Vec<Option<f64>>> = vec![Vec::new(); columns.len()];
    for record in rdr.records() {
        let record = record.map_err(csv_err(path))?;
        index.push(parse_ts(path, &record[0])?);
        for (c, column) in values.iter_mut().enumerate() {
            column.push(parse_value(path, &record[c + 1])?);
        }
    }
    ReturnTable::new(granularity, index, columns, values).map_err(|source| StorageError::Table {
        path: path.to_path_buf(),
        source,
    })
}

// ─── Correlation matrix ─────────────────────────────────────────────

/// `Symbol, SYM1, SYM2, ...`; one row per symbol.
pub fn write_correlation(path: &Path, matrix: &CorrelationMatrix) -> Result<(), StorageError> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    let mut header = vec!["Symbol".to_string()];
    header.extend(matrix.symbols().iter().cloned());
    wtr.write_record(&header).map_err(csv_err(path))?;

    for (i, symbol) in matrix.symbols().iter().enumerate() {
        let mut row = vec![symbol.clone()];
        row.extend(matrix.row(i).iter().map(|v| format_value(*v)));
        wtr.write_record(&row).map_err(csv_err(path))?;
    }
    finish(path, wtr)
}

pub fn read_correlation(path: &Path) -> Result<CorrelationMatrix, StorageError> {
    let mut rdr = reader(path)?;
    let headers = rdr.headers().map_err(csv_err(path))?.clone();
    let symbols: Vec<String> = headers.iter().skip(1).map(|s| s.trim().to_string()).collect();

    let mut values = Vec::with_capacity(symbols.len() * symbols.len());
    for (i, record) in rdr.records().enumerate() {
        let record = record.map_err(csv_err(path))?;
        let row_symbol = record[0].trim();
        if symbols.get(i).map(String::as_str) != Some(row_symbol) {
            return Err(malformed(
                path,
                format!("row {i} is '{row_symbol}', expected the column order"),
            ));
        }
        for field in record.iter().skip(1) {
            values.push(parse_value(path, field)?);
        }
    }
    CorrelationMatrix::new(symbols, values).map_err(|source| StorageError::Correlation {
        path: path.to_path_buf(),
        source,
    })
}

// ─── Projection ─────────────────────────────────────────────────────

const PROJECTION_HEADER: [&str; 3] = ["Symbol", "d1", "d2"];

pub fn write_projection(path: &Path, table: &ProjectionTable) -> Result<(), StorageError> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(PROJECTION_HEADER).map_err(csv_err(path))?;
    for (symbol, [d1, d2]) in table.iter() {
        wtr.write_record([symbol.to_string(), d1.to_string(), d2.to_string()])
            .map_err(csv_err(path))?;
    }
    finish(path, wtr)
}

pub fn read_projection(path: &Path) -> Result<ProjectionTable, StorageError> {
    let mut rdr = reader(path)?;
    let headers = rdr.headers().map_err(csv_err(path))?.clone();
    if headers.iter().map(str::trim).ne(PROJECTION_HEADER.iter().copied()) {
        return Err(malformed(path, "expected header Symbol, d1, d2"));
    }
    let mut symbols = Vec::new();
    let mut coords = Vec::new();
    for record in rdr.records() {
        let record = record.map_err(csv_err(path))?;
        symbols.push(record[0].trim().to_string());
        coords.push([parse_required(path, &record[1])?, parse_required(path, &record[2])?]);
    }
    ProjectionTable::new(symbols, coords).map_err(|source| StorageError::Projection {
        path: path.to_path_buf(),
        source,
    })
}

// ─── Enriched table ─────────────────────────────────────────────────

const ENRICHED_HEADER: [&str; 7] = ["Symbol", "d1", "d2", "Date", "Security", "GICS Sector", "Return"];

pub fn write_enriched(path: &Path, rows: &[EnrichedRow]) -> Result<(), StorageError> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(ENRICHED_HEADER).map_err(csv_err(path))?;
    for r in rows {
        wtr.write_record([
            r.symbol.clone(),
            r.d1.to_string(),
            r.d2.to_string(),
            Granularity::Daily.format_timestamp(r.timestamp),
            r.name.clone().unwrap_or_default(),
            r.sector.clone().unwrap_or_default(),
            r.value.to_string(),
        ])
        .map_err(csv_err(path))?;
    }
    finish(path, wtr)
}

pub fn read_enriched(path: &Path) -> Result<Vec<EnrichedRow>, StorageError> {
    let mut rdr = reader(path)?;
    let headers = rdr.headers().map_err(csv_err(path))?.clone();
    if headers.iter().map(str::trim).ne(ENRICHED_HEADER.iter().copied()) {
        return Err(malformed(path, "unexpected enriched-table header"));
    }
    let optional = |s: &str| {
        let s = s.trim();
        (!s.is_empty()).then(|| s.to_string())
    };
    rdr.records()
        .map(|record| {
            let record = record.map_err(csv_err(path))?;
            Ok(EnrichedRow {
                symbol: record[0].trim().to_string(),
                d1: parse_required(path, &record[1])?,
                d2: parse_required(path, &record[2])?,
                timestamp: parse_ts(path, &record[3])?,
                name: optional(&record[4]),
                sector: optional(&record[5]),
                value: parse_required(path, &record[6])?,
            })
        })
        .collect()
}
