//! Return aggregator: per-instrument returns at every granularity, folded
//! into one universe table per granularity.
//!
//! Per-instrument retrieval and computation run on a private rayon pool sized
//! by `concurrency`. Results are collected, then merged once on the calling
//! thread in universe order, so the output never depends on scheduling.
//!
//! All files for a granularity are written into a staging directory. The
//! staging directories replace `returns/{granularity}/` together, only after
//! every table was built.

use chrono::NaiveDate;
use corrlab_core::data::{DataError, PriceProvider};
use corrlab_core::domain::{Granularity, ReturnSeries};
use corrlab_core::returns::compute_returns;
use corrlab_core::table::{ReturnTable, TableError};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{ArtifactPaths, FailurePolicy, UNIVERSE_TABLE_NAME};
use crate::storage::{self, StagedDir, StorageError};

#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("failed to retrieve {granularity} prices for '{symbol}': {source}")]
    Retrieval {
        symbol: String,
        granularity: Granularity,
        source: DataError,
    },

    #[error("aggregation cancelled")]
    Cancelled,

    #[error("no instruments left to aggregate")]
    Empty,

    #[error("failed to build worker pool: {0}")]
    ThreadPool(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Table(#[from] TableError),
}

/// How to run one aggregation.
#[derive(Debug, Clone)]
pub struct AggregateOptions {
    pub granularities: Vec<Granularity>,
    pub policy: FailurePolicy,
    pub concurrency: usize,
    /// First daily bar requested.
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// An instrument left out under [`FailurePolicy::Skip`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedInstrument {
    pub symbol: String,
    pub granularity: Granularity,
    pub reason: String,
}

#[derive(Debug)]
pub struct AggregateOutput {
    /// One universe table per requested granularity, in request order.
    pub tables: Vec<ReturnTable>,
    /// Instruments present in every table, in universe order.
    pub symbols: Vec<String>,
    pub skipped: Vec<SkippedInstrument>,
}

impl AggregateOutput {
    pub fn table(&self, granularity: Granularity) -> Option<&ReturnTable> {
        self.tables.iter().find(|t| t.granularity() == granularity)
    }
}

enum Outcome {
    Done(Vec<ReturnSeries>),
    Failed(Granularity, DataError),
    Storage(StorageError),
    Interrupted,
}

/// Run the aggregator over `symbols` (universe order).
pub fn aggregate(
    provider: &dyn PriceProvider,
    symbols: &[&str],
    paths: &ArtifactPaths,
    options: &AggregateOptions,
    cancel: Option<&AtomicBool>,
) -> Result<AggregateOutput, AggregateError> {
    let stages = options
        .granularities
        .iter()
        .map(|g| StagedDir::begin(&paths.returns_dir(*g)))
        .collect::<Result<Vec<_>, _>>()?;

    // Set on the first failure under fail-fast so idle workers stop early.
    let abort = AtomicBool::new(false);
    let stopped = || abort.load(Ordering::Relaxed) || cancel.is_some_and(|f| f.load(Ordering::Relaxed));

    let work = |symbol: &&str| -> Outcome {
        if stopped() {
            return Outcome::Interrupted;
        }
        let outcome = process_instrument(provider, symbol, options, &stages);
        let fatal = match outcome {
            Outcome::Failed(..) => options.policy == FailurePolicy::FailFast,
            Outcome::Storage(_) => true,
            _ => false,
        };
        if fatal {
            abort.store(true, Ordering::Relaxed);
        }
        outcome
    };

    let outcomes: Vec<Outcome> = if options.concurrency > 1 {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.concurrency)
            .build()
            .map_err(|e| AggregateError::ThreadPool(e.to_string()))?;
        pool.install(|| symbols.par_iter().map(work).collect())
    } else {
        symbols.iter().map(work).collect()
    };

    if cancel.is_some_and(|f| f.load(Ordering::Relaxed)) {
        return Err(AggregateError::Cancelled);
    }

    let mut included: Vec<(String, Vec<ReturnSeries>)> = Vec::with_capacity(symbols.len());
    let mut skipped = Vec::new();
    for (&symbol, outcome) in symbols.iter().zip(outcomes) {
        match outcome {
            Outcome::Storage(e) => return Err(e.into()),
            Outcome::Done(series) => included.push((symbol.to_string(), series)),
            Outcome::Failed(granularity, source) => match options.policy {
                FailurePolicy::FailFast => {
                    return Err(AggregateError::Retrieval {
                        symbol: symbol.to_string(),
                        granularity,
                        source,
                    })
                }
                FailurePolicy::Skip => {
                    warn!(symbol, %granularity, error = %source, "skipping instrument");
                    discard_staged(&stages, symbol)?;
                    skipped.push(SkippedInstrument {
                        symbol: symbol.to_string(),
                        granularity,
                        reason: source.to_string(),
                    });
                }
            },
            // Only reachable after a fatal failure, which is reported at its
            // own position in universe order.
            Outcome::Interrupted => {}
        }
    }

    if included.is_empty() {
        return Err(AggregateError::Empty);
    }

    let mut tables = Vec::with_capacity(options.granularities.len());
    for (k, (&granularity, stage)) in options.granularities.iter().zip(&stages).enumerate() {
        let columns: Vec<(String, ReturnSeries)> = included
            .iter()
            .map(|(symbol, series)| (symbol.clone(), series[k].clone()))
            .collect();
        let table = ReturnTable::union_join(granularity, &columns)?;
        storage::write_universe_table(
            &stage.path().join(format!("{UNIVERSE_TABLE_NAME}.csv")),
            &table,
        )?;
        info!(
            %granularity,
            instruments = columns.len(),
            rows = table.row_count(),
            columns = table.column_count(),
            "universe table built"
        );
        tables.push(table);
    }

    StagedDir::commit_all(stages)?;

    Ok(AggregateOutput {
        tables,
        symbols: included.into_iter().map(|(s, _)| s).collect(),
        skipped,
    })
}

/// fetch → returns → per-instrument file, for every granularity.
fn process_instrument(
    provider: &dyn PriceProvider,
    symbol: &str,
    options: &AggregateOptions,
    stages: &[StagedDir],
) -> Outcome {
    let mut out = Vec::with_capacity(options.granularities.len());
    for (&granularity, stage) in options.granularities.iter().zip(stages) {
        let series = match provider
            .fetch(symbol, granularity, options.start, options.end)
            .and_then(|fetched| fetched.close_series())
        {
            Ok(prices) => compute_returns(&prices),
            Err(e) => return Outcome::Failed(granularity, e),
        };

        let path = stage.path().join(format!("{symbol}.csv"));
        if let Err(e) = storage::write_return_series(&path, &series) {
            return Outcome::Storage(e);
        }
        debug!(symbol, %granularity, rows = series.len(), valid = series.valid_count(), "returns computed");
        out.push(series);
    }
    Outcome::Done(out)
}

/// Remove a skipped instrument's files from every stage.
fn discard_staged(stages: &[StagedDir], symbol: &str) -> Result<(), StorageError> {
    for stage in stages {
        let path = stage.path().join(format!("{symbol}.csv"));
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => return Err(StorageError::Io { path, source }),
        }
    }
    Ok(())
}

/// Reload the persisted universe table for one granularity.
pub fn load_universe_table(
    paths: &ArtifactPaths,
    granularity: Granularity,
) -> Result<ReturnTable, StorageError> {
    storage::read_universe_table(&paths.universe_table(granularity), granularity)
}
