//! Pipeline configuration (`corrlab.toml`).
//!
//! Every section except `[projection]` has defaults, so the smallest valid
//! file is:
//!
//! ```toml
//! [projection]
//! seed = 42
//! ```
//!
//! Artifact locations are resolved once into [`ArtifactPaths`].

use chrono::NaiveDate;
use corrlab_core::domain::Granularity;
use corrlab_core::projection::{ProjectionConfig, ProjectionError};
use corrlab_core::table::ReturnKind;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name the universe-wide return table is stored under.
pub const UNIVERSE_TABLE_NAME: &str = "all_stocks";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid [{section}] setting: {message}")]
    Invalid {
        section: &'static str,
        message: String,
    },

    #[error(transparent)]
    Projection(#[from] ProjectionError),
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub aggregation: AggregationConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub correlation: CorrelationConfig,
    pub projection: ProjectionConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Base directory plus sub-paths, each relative to `base_dir` unless absolute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub base_dir: PathBuf,
    pub universe: PathBuf,
    pub prices_dir: PathBuf,
    pub returns_dir: PathBuf,
    pub correlation_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("data"),
            universe: PathBuf::from("universe.csv"),
            prices_dir: PathBuf::from("prices"),
            returns_dir: PathBuf::from("returns"),
            correlation_dir: PathBuf::from("correlation"),
        }
    }
}

/// What to do when one instrument's prices cannot be retrieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Abort the aggregation on the first failure.
    #[default]
    FailFast,
    /// Drop the instrument from the universe tables and continue.
    Skip,
}

/// Where the aggregator reads prices from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceSourceKind {
    /// The local Parquet cache filled by `download`.
    #[default]
    Cache,
    /// Yahoo Finance, fetched on the fly.
    Yahoo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Worker threads for per-instrument work; 1 runs sequentially.
    pub concurrency: usize,
    pub failure_policy: FailurePolicy,
    pub source: PriceSourceKind,
    /// First daily bar requested.
    pub history_start: NaiveDate,
    pub granularities: Vec<Granularity>,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            failure_policy: FailurePolicy::FailFast,
            source: PriceSourceKind::Cache,
            history_start: NaiveDate::from_ymd_opt(2015, 12, 1).unwrap_or_default(),
            granularities: Granularity::ALL.to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub breaker_cooldown_secs: u64,
    pub breaker_failure_threshold: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_retries: 3,
            base_delay_ms: 500,
            breaker_cooldown_secs: 30 * 60,
            breaker_failure_threshold: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    pub granularity: Granularity,
    pub kind: ReturnKind,
    /// Rows before this date are ignored; unset uses the full history.
    pub start: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    /// Trailing window of daily returns joined onto the projection.
    pub window_days: u32,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self { window_days: 365 }
    }
}

/// Log line layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Compact,
    Pretty,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing` filter directive, overridden by `RUST_LOG`.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::Compact,
        }
    }
}

impl PipelineConfig {
    /// All defaults plus the one required setting.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            storage: StorageConfig::default(),
            aggregation: AggregationConfig::default(),
            provider: ProviderConfig::default(),
            correlation: CorrelationConfig::default(),
            projection: ProjectionConfig::with_seed(seed),
            enrichment: EnrichmentConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Checks that do not need the data. Perplexity against the instrument
    /// count is checked again by the projection stage.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.aggregation.concurrency == 0 {
            return Err(ConfigError::Invalid {
                section: "aggregation",
                message: "concurrency must be at least 1".into(),
            });
        }
        if self.aggregation.granularities.is_empty() {
            return Err(ConfigError::Invalid {
                section: "aggregation",
                message: "at least one granularity is required".into(),
            });
        }
        if !self
            .aggregation
            .granularities
            .contains(&self.correlation.granularity)
        {
            return Err(ConfigError::Invalid {
                section: "correlation",
                message: format!(
                    "granularity '{}' is not aggregated",
                    self.correlation.granularity
                ),
            });
        }
        if !self.aggregation.granularities.contains(&Granularity::Daily) {
            return Err(ConfigError::Invalid {
                section: "aggregation",
                message: "daily returns are required by the enrichment stage".into(),
            });
        }
        if self.provider.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                section: "provider",
                message: "timeout_secs must be positive".into(),
            });
        }
        if self.enrichment.window_days == 0 {
            return Err(ConfigError::Invalid {
                section: "enrichment",
                message: "window_days must be positive".into(),
            });
        }
        self.projection.validate()?;
        Ok(())
    }

    pub fn artifact_paths(&self) -> ArtifactPaths {
        ArtifactPaths::resolve(&self.storage)
    }
}

/// Every artifact location, resolved from [`StorageConfig`].
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactPaths {
    pub base_dir: PathBuf,
    pub universe: PathBuf,
    pub prices_dir: PathBuf,
    pub returns_dir: PathBuf,
    pub correlation_dir: PathBuf,
}

impl ArtifactPaths {
    pub fn resolve(storage: &StorageConfig) -> Self {
        let under = |p: &Path| {
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                storage.base_dir.join(p)
            }
        };
        Self {
            base_dir: storage.base_dir.clone(),
            universe: under(&storage.universe),
            prices_dir: under(&storage.prices_dir),
            returns_dir: under(&storage.returns_dir),
            correlation_dir: under(&storage.correlation_dir),
        }
    }

    /// `{returns}/{daily|minute}/`
    pub fn returns_dir(&self, granularity: Granularity) -> PathBuf {
        self.returns_dir.join(granularity.as_str())
    }

    /// `{returns}/{granularity}/{SYMBOL}.csv`
    pub fn return_series(&self, granularity: Granularity, symbol: &str) -> PathBuf {
        self.returns_dir(granularity).join(format!("{symbol}.csv"))
    }

    /// `{returns}/{granularity}/all_stocks.csv`
    pub fn universe_table(&self, granularity: Granularity) -> PathBuf {
        self.return_series(granularity, UNIVERSE_TABLE_NAME)
    }

    pub fn correlation_matrix(&self) -> PathBuf {
        self.correlation_dir.join("correlation_matrix.csv")
    }

    pub fn projection(&self) -> PathBuf {
        self.correlation_dir.join("stock_vectors.csv")
    }

    pub fn enriched(&self) -> PathBuf {
        self.correlation_dir.join("projection_with_returns.csv")
    }

    pub fn plot(&self) -> PathBuf {
        self.correlation_dir.join("projection_plot.html")
    }

    pub fn manifest(&self) -> PathBuf {
        self.correlation_dir.join("manifest.json")
    }
}
