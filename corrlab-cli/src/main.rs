//! CorrLab CLI: price download, the correlation-map pipeline, and cache tools.
//!
//! Commands:
//! - `download`: fetch daily and minute bars from Yahoo Finance into the Parquet cache
//! - `returns`: build per-instrument returns and the universe tables
//! - `correlate` / `project` / `enrich` / `plot`: run one stage from the previous artifact
//! - `run`: every stage in order, then the run manifest
//! - `universe init`: write the built-in sample universe
//! - `cache status`: report cached ranges per symbol

use anyhow::{anyhow, bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use corrlab_core::data::{download_symbols, LogProgress, PriceCache, Universe};
use corrlab_core::domain::Granularity;
use corrlab_runner::{init_logging, Pipeline, PipelineConfig};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(
    name = "corrlab",
    about = "CorrLab CLI: return correlation maps for an equity universe"
)]
struct Cli {
    /// Pipeline config (TOML). Without it, defaults are used and --seed is required.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override `storage.base_dir`.
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    /// Projection seed. Overrides the config value.
    #[arg(long, global = true)]
    seed: Option<u64>,

    /// Log filter (e.g. `info`, `corrlab_runner=debug`). RUST_LOG wins.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download prices for every universe instrument into the Parquet cache.
    Download {
        /// First daily bar (YYYY-MM-DD). Defaults to `aggregation.history_start`.
        #[arg(long)]
        start: Option<String>,

        /// Last daily bar (YYYY-MM-DD). Defaults to today.
        #[arg(long)]
        end: Option<String>,

        /// Re-download even if the cache is current.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Compute returns and write the universe tables.
    Returns,
    /// Correlation matrix from the persisted universe table.
    Correlate,
    /// 2D projection from the persisted correlation matrix.
    Project,
    /// Join the projection with metadata and recent daily returns.
    Enrich,
    /// Render the interactive scatter from the enriched table.
    Plot,
    /// Every stage, then the run manifest.
    Run,
    /// Universe file management.
    Universe {
        #[command(subcommand)]
        action: UniverseAction,
    },
    /// Price cache inspection.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum UniverseAction {
    /// Write the built-in sample universe to `storage.universe`.
    Init {
        /// Overwrite an existing file.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Report cached date ranges and bar counts for the universe.
    Status {
        #[arg(long, default_value = "daily")]
        granularity: Granularity,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_logging(&config.logging).map_err(|e| anyhow!("failed to initialize logging: {e}"))?;
    let pipeline = Pipeline::new(config).context("invalid configuration")?;

    match cli.command {
        Commands::Download { start, end, force } => run_download(&pipeline, start, end, force),
        Commands::Returns => run_returns(&pipeline),
        Commands::Correlate => {
            let matrix = pipeline.correlate_from_disk()?;
            println!(
                "Correlation matrix: {} instruments -> {}",
                matrix.len(),
                pipeline.paths().correlation_matrix().display()
            );
            Ok(())
        }
        Commands::Project => {
            let result = pipeline.project_from_disk()?;
            println!(
                "Projection: {} instruments, KL divergence {:.4} after {} iterations -> {}",
                result.table.len(),
                result.kl_divergence,
                result.iterations,
                pipeline.paths().projection().display()
            );
            Ok(())
        }
        Commands::Enrich => {
            let rows = pipeline.enrich_from_disk(chrono::Local::now().naive_local())?;
            println!(
                "Enriched table: {} rows -> {}",
                rows.len(),
                pipeline.paths().enriched().display()
            );
            Ok(())
        }
        Commands::Plot => {
            let path = pipeline.plot_from_disk()?;
            println!("Plot written to: {}", path.display());
            Ok(())
        }
        Commands::Run => run_all(&pipeline),
        Commands::Universe {
            action: UniverseAction::Init { force },
        } => run_universe_init(&pipeline, force),
        Commands::Cache {
            action: CacheAction::Status { granularity },
        } => run_cache_status(&pipeline, granularity),
    }
}

/// Config file (or defaults), then flag overrides.
fn load_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = match (&cli.config, cli.seed) {
        (Some(path), _) => PipelineConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        (None, Some(seed)) => PipelineConfig::with_seed(seed),
        (None, None) => bail!("--seed is required when no --config is given"),
    };
    if let Some(seed) = cli.seed {
        config.projection.seed = seed;
    }
    if let Some(base_dir) = &cli.base_dir {
        config.storage.base_dir = base_dir.clone();
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    Ok(config)
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").with_context(|| format!("invalid date '{s}'"))
}

fn run_download(
    pipeline: &Pipeline,
    start: Option<String>,
    end: Option<String>,
    force: bool,
) -> Result<()> {
    let config = pipeline.config();
    let start_date = start
        .as_deref()
        .map(parse_date)
        .transpose()?
        .unwrap_or(config.aggregation.history_start);
    let end_date = end
        .as_deref()
        .map(parse_date)
        .transpose()?
        .unwrap_or_else(|| chrono::Local::now().date_naive());

    let universe = pipeline.load_universe()?;
    let provider = pipeline
        .yahoo_provider()
        .context("failed to build Yahoo provider")?;
    let cache = PriceCache::new(&pipeline.paths().prices_dir);

    let summary = download_symbols(
        &provider,
        &cache,
        &universe.symbols(),
        &config.aggregation.granularities,
        start_date,
        end_date,
        force,
        &LogProgress,
    );

    println!(
        "Downloaded {}/{} (symbol, granularity) pairs into {}",
        summary.succeeded,
        summary.total,
        cache.cache_dir().display()
    );
    if !summary.all_succeeded() {
        for (sym, granularity, err) in &summary.errors {
            eprintln!("Error for {sym} ({granularity}): {err}");
        }
        bail!("{} download(s) failed", summary.failed);
    }
    Ok(())
}

fn run_returns(pipeline: &Pipeline) -> Result<()> {
    let universe = pipeline.load_universe()?;
    let provider = pipeline.price_provider()?;
    let out = pipeline.returns(
        &universe,
        provider.as_ref(),
        None,
        chrono::Local::now().naive_local(),
    )?;

    for table in &out.tables {
        println!(
            "{:<7} {} rows x {} columns -> {}",
            table.granularity(),
            table.row_count(),
            table.column_count(),
            pipeline.paths().universe_table(table.granularity()).display()
        );
    }
    print_skipped(&out.skipped);
    Ok(())
}

fn run_all(pipeline: &Pipeline) -> Result<()> {
    let provider = pipeline.price_provider()?;
    let summary = pipeline.run(provider.as_ref(), None, chrono::Local::now().naive_local())?;
    let m = &summary.manifest;

    println!();
    println!("=== CorrLab Run ===");
    println!("Instruments:    {}", m.instruments);
    println!("Skipped:        {}", m.skipped.len());
    println!("KL divergence:  {:.4}", m.kl_divergence);
    println!("Iterations:     {}", m.iterations);
    println!("Enriched rows:  {}", m.enriched_rows);
    println!("Seed:           {}", m.config.projection.seed);
    print_skipped(&m.skipped);
    println!();
    println!("Plot:     {}", summary.plot_path.display());
    println!("Manifest: {}", pipeline.paths().manifest().display());
    Ok(())
}

fn print_skipped(skipped: &[corrlab_runner::SkippedInstrument]) {
    for s in skipped {
        println!("WARNING: skipped {} ({}): {}", s.symbol, s.granularity, s.reason);
    }
}

fn run_universe_init(pipeline: &Pipeline, force: bool) -> Result<()> {
    let path = &pipeline.paths().universe;
    if path.exists() && !force {
        bail!(
            "{} already exists (pass --force to overwrite)",
            path.display()
        );
    }
    let universe = Universe::sample_us();
    let content = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => universe.to_toml()?,
        _ => universe.to_csv()?,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))?;
    info!(instruments = universe.len(), path = %path.display(), "universe written");
    println!("Wrote {} instruments to {}", universe.len(), path.display());
    Ok(())
}

fn run_cache_status(pipeline: &Pipeline, granularity: Granularity) -> Result<()> {
    let universe = pipeline.load_universe()?;
    let cache = PriceCache::new(&pipeline.paths().prices_dir);
    let rows = cache.status(&universe.symbols(), granularity);

    println!("Cache: {} ({granularity})", cache.cache_dir().display());
    println!(
        "Cached: {}/{}",
        rows.iter().filter(|r| r.cached).count(),
        rows.len()
    );
    println!();
    println!("{:<8} {:<25} {:>10}", "Symbol", "Range", "Bars");
    println!("{}", "-".repeat(45));
    for row in &rows {
        let range = match (row.start, row.end) {
            (Some(s), Some(e)) => format!("{} to {}", s.date(), e.date()),
            _ => "(not cached)".into(),
        };
        let bars = row.bar_count.map(|n| n.to_string()).unwrap_or_default();
        println!("{:<8} {:<25} {:>10}", row.symbol, range, bars);
    }
    Ok(())
}
