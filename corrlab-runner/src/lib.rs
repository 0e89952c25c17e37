//! CorrLab Runner: pipeline orchestration over `corrlab-core`.
//!
//! This crate provides:
//! - TOML pipeline configuration and artifact layout
//! - Concurrent return aggregation with fail-fast or skip policies
//! - CSV artifact storage with atomic writes and staged directories
//! - Interactive Plotly scatter rendering
//! - The stage runner with per-stage resume and a run manifest
//! - `tracing` subscriber setup

pub mod aggregator;
pub mod config;
pub mod logging;
pub mod pipeline;
pub mod plot;
pub mod storage;

pub use aggregator::{aggregate, AggregateError, AggregateOptions, AggregateOutput, SkippedInstrument};
pub use config::{
    AggregationConfig, ArtifactPaths, ConfigError, FailurePolicy, LogFormat, LoggingConfig,
    PipelineConfig, PriceSourceKind,
};
pub use logging::init_logging;
pub use pipeline::{Pipeline, PipelineError, RunManifest, RunSummary, Stage, StageError};
pub use plot::{render_html, ColorScale, PlotError};
pub use storage::{StagedDir, StorageError};
