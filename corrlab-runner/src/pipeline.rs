//! Stage runner: returns → correlation → projection → enrichment → plot.
//!
//! Each stage reads the previous stage's value, persists its own artifact
//! and returns it. The `*_from_disk` variants reload the previous artifact
//! instead, so a run can resume from any stage.

use chrono::{Duration, NaiveDateTime};
use corrlab_core::correlation::{correlation_matrix, CorrelationMatrix};
use corrlab_core::data::{CircuitBreaker, DataError, PriceCache, PriceProvider, RetryPolicy, Universe, YahooProvider};
use corrlab_core::domain::Granularity;
use corrlab_core::enrich::{enrich_window, EnrichedRow};
use corrlab_core::projection::{project, ProjectionError, ProjectionResult, ProjectionTable};
use corrlab_core::table::ReturnTable;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::aggregator::{self, AggregateError, AggregateOptions, AggregateOutput, SkippedInstrument};
use crate::config::{ArtifactPaths, ConfigError, PipelineConfig, PriceSourceKind};
use crate::plot::{self, PlotError};
use crate::storage::{self, StorageError};

/// Current schema version of the run manifest.
pub const MANIFEST_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Returns,
    Correlation,
    Projection,
    Enrichment,
    Plot,
    Manifest,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Returns => "returns",
            Stage::Correlation => "correlation",
            Stage::Projection => "projection",
            Stage::Enrichment => "enrichment",
            Stage::Plot => "plot",
            Stage::Manifest => "manifest",
        })
    }
}

#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Aggregate(#[from] AggregateError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Projection(#[from] ProjectionError),
    #[error(transparent)]
    Data(#[from] DataError),
    #[error(transparent)]
    Plot(#[from] PlotError),
    #[error("failed to write manifest: {0}")]
    Manifest(#[from] serde_json::Error),
}

/// A stage failure, naming the stage.
#[derive(Debug, Error)]
#[error("{stage} stage failed: {source}")]
pub struct PipelineError {
    pub stage: Stage,
    #[source]
    pub source: StageError,
}

trait InStage<T> {
    fn in_stage(self, stage: Stage) -> Result<T, PipelineError>;
}

impl<T, E: Into<StageError>> InStage<T> for Result<T, E> {
    fn in_stage(self, stage: Stage) -> Result<T, PipelineError> {
        self.map_err(|e| PipelineError {
            stage,
            source: e.into(),
        })
    }
}

/// Written to `correlation/manifest.json` after a full run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    pub schema_version: u32,
    pub started_at: NaiveDateTime,
    pub finished_at: NaiveDateTime,
    pub config: PipelineConfig,
    pub instruments: usize,
    pub skipped: Vec<SkippedInstrument>,
    /// blake3 of each persisted `all_stocks` table, by granularity.
    pub universe_table_hashes: BTreeMap<Granularity, String>,
    pub kl_divergence: f64,
    pub iterations: usize,
    pub enriched_rows: usize,
}

/// What a full run produced.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub manifest: RunManifest,
    pub plot_path: PathBuf,
}

pub struct Pipeline {
    config: PipelineConfig,
    paths: ArtifactPaths,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let paths = config.artifact_paths();
        Ok(Self { config, paths })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn paths(&self) -> &ArtifactPaths {
        &self.paths
    }

    pub fn load_universe(&self) -> Result<Universe, PipelineError> {
        Universe::from_file(&self.paths.universe).in_stage(Stage::Returns)
    }

    /// The Parquet cache, or Yahoo Finance per `aggregation.source`.
    pub fn price_provider(&self) -> Result<Box<dyn PriceProvider>, PipelineError> {
        match self.config.aggregation.source {
            PriceSourceKind::Cache => Ok(Box::new(PriceCache::new(&self.paths.prices_dir))),
            PriceSourceKind::Yahoo => Ok(Box::new(self.yahoo_provider().in_stage(Stage::Returns)?)),
        }
    }

    pub fn yahoo_provider(&self) -> Result<YahooProvider, DataError> {
        let p = &self.config.provider;
        let breaker = CircuitBreaker::new(
            std::time::Duration::from_secs(p.breaker_cooldown_secs),
            p.breaker_failure_threshold,
        );
        YahooProvider::new(
            Arc::new(breaker),
            RetryPolicy {
                timeout: std::time::Duration::from_secs(p.timeout_secs),
                max_retries: p.max_retries,
                base_delay: std::time::Duration::from_millis(p.base_delay_ms),
            },
        )
    }

    // ─── Stages ─────────────────────────────────────────────────────

    pub fn returns(
        &self,
        universe: &Universe,
        provider: &dyn PriceProvider,
        cancel: Option<&AtomicBool>,
        today: NaiveDateTime,
    ) -> Result<AggregateOutput, PipelineError> {
        let agg = &self.config.aggregation;
        let options = AggregateOptions {
            granularities: agg.granularities.clone(),
            policy: agg.failure_policy,
            concurrency: agg.concurrency,
            start: agg.history_start,
            end: today.date(),
        };
        info!(
            instruments = universe.len(),
            source = provider.name(),
            concurrency = agg.concurrency,
            "computing returns"
        );
        aggregator::aggregate(provider, &universe.symbols(), &self.paths, &options, cancel)
            .in_stage(Stage::Returns)
    }

    pub fn correlate(&self, table: &ReturnTable) -> Result<CorrelationMatrix, PipelineError> {
        let c = &self.config.correlation;
        let start = c.start.and_then(|d| d.and_hms_opt(0, 0, 0));
        let matrix = correlation_matrix(table, c.kind, start);
        storage::write_correlation(&self.paths.correlation_matrix(), &matrix)
            .in_stage(Stage::Correlation)?;
        info!(symbols = matrix.len(), kind = %c.kind, "correlation matrix written");
        Ok(matrix)
    }

    pub fn correlate_from_disk(&self) -> Result<CorrelationMatrix, PipelineError> {
        let g = self.config.correlation.granularity;
        let table = aggregator::load_universe_table(&self.paths, g).in_stage(Stage::Correlation)?;
        self.correlate(&table)
    }

    pub fn project(&self, matrix: &CorrelationMatrix) -> Result<ProjectionResult, PipelineError> {
        let result = project(matrix, &self.config.projection).in_stage(Stage::Projection)?;
        storage::write_projection(&self.paths.projection(), &result.table)
            .in_stage(Stage::Projection)?;
        Ok(result)
    }

    pub fn project_from_disk(&self) -> Result<ProjectionResult, PipelineError> {
        let matrix =
            storage::read_correlation(&self.paths.correlation_matrix()).in_stage(Stage::Projection)?;
        self.project(&matrix)
    }

    /// Join projection, metadata and the trailing window of daily returns
    /// ending at `now`.
    pub fn enrich(
        &self,
        projection: &ProjectionTable,
        universe: &Universe,
        daily: &ReturnTable,
        now: NaiveDateTime,
    ) -> Result<Vec<EnrichedRow>, PipelineError> {
        let start = now - Duration::days(i64::from(self.config.enrichment.window_days));
        let rows = enrich_window(projection, universe.instruments(), daily, start);
        storage::write_enriched(&self.paths.enriched(), &rows).in_stage(Stage::Enrichment)?;
        info!(rows = rows.len(), since = %start.date(), "enriched table written");
        Ok(rows)
    }

    pub fn enrich_from_disk(&self, now: NaiveDateTime) -> Result<Vec<EnrichedRow>, PipelineError> {
        let projection = storage::read_projection(&self.paths.projection()).in_stage(Stage::Enrichment)?;
        let universe = Universe::from_file(&self.paths.universe).in_stage(Stage::Enrichment)?;
        let daily = aggregator::load_universe_table(&self.paths, Granularity::Daily)
            .in_stage(Stage::Enrichment)?;
        self.enrich(&projection, &universe, &daily, now)
    }

    pub fn plot(&self, rows: &[EnrichedRow]) -> Result<PathBuf, PipelineError> {
        let html = plot::render_html(rows, "Instrument correlation map").in_stage(Stage::Plot)?;
        let path = self.paths.plot();
        storage::write_atomic(&path, html.as_bytes()).in_stage(Stage::Plot)?;
        info!(path = %path.display(), "plot written");
        Ok(path)
    }

    pub fn plot_from_disk(&self) -> Result<PathBuf, PipelineError> {
        let rows = storage::read_enriched(&self.paths.enriched()).in_stage(Stage::Plot)?;
        self.plot(&rows)
    }

    /// Every stage in order, then the manifest.
    pub fn run(
        &self,
        provider: &dyn PriceProvider,
        cancel: Option<&AtomicBool>,
        now: NaiveDateTime,
    ) -> Result<RunSummary, PipelineError> {
        let started_at = chrono::Local::now().naive_local();
        let universe = self.load_universe()?;
        // Checked again by the projection stage: skipped instruments shrink n.
        self.config
            .projection
            .validate_for(universe.len())
            .in_stage(Stage::Projection)?;

        let aggregated = self.returns(&universe, provider, cancel, now)?;
        let missing_table = |g: Granularity| PipelineError {
            stage: Stage::Returns,
            source: StageError::Storage(StorageError::Malformed {
                path: self.paths.universe_table(g),
                message: "table was not built".into(),
            }),
        };
        let corr_g = self.config.correlation.granularity;
        let corr_table = aggregated.table(corr_g).ok_or_else(|| missing_table(corr_g))?;
        let daily = aggregated
            .table(Granularity::Daily)
            .ok_or_else(|| missing_table(Granularity::Daily))?;

        let matrix = self.correlate(corr_table)?;
        let projection = self.project(&matrix)?;
        let rows = self.enrich(&projection.table, &universe, daily, now)?;
        let plot_path = self.plot(&rows)?;

        let mut hashes = BTreeMap::new();
        for table in &aggregated.tables {
            let path = self.paths.universe_table(table.granularity());
            let bytes = std::fs::read(&path)
                .map_err(|source| StorageError::Io { path, source })
                .in_stage(Stage::Manifest)?;
            hashes.insert(table.granularity(), blake3::hash(&bytes).to_hex().to_string());
        }

        let manifest = RunManifest {
            schema_version: MANIFEST_VERSION,
            started_at,
            finished_at: chrono::Local::now().naive_local(),
            config: self.config.clone(),
            instruments: aggregated.symbols.len(),
            skipped: aggregated.skipped.clone(),
            universe_table_hashes: hashes,
            kl_divergence: projection.kl_divergence,
            iterations: projection.iterations,
            enriched_rows: rows.len(),
        };
        let json = serde_json::to_string_pretty(&manifest).in_stage(Stage::Manifest)?;
        storage::write_atomic(&self.paths.manifest(), json.as_bytes())
            .in_stage(Stage::Manifest)?;

        info!(
            instruments = manifest.instruments,
            skipped = manifest.skipped.len(),
            "pipeline finished"
        );
        Ok(RunSummary {
            manifest,
            plot_path,
        })
    }
}
