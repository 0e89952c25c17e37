//! Full runs against a fixture provider: every artifact, resume from each
//! stage, and the manifest.

mod common;

use common::{now, test_config, write_universe, FixtureProvider};
use corrlab_core::domain::Granularity;
use corrlab_runner::config::FailurePolicy;
use corrlab_runner::pipeline::{Pipeline, RunManifest, Stage, StageError};
use corrlab_runner::storage;
use std::sync::atomic::Ordering;

const SYMBOLS: [&str; 5] = ["AAA", "BBB", "CCC", "DDD", "EEE"];

fn run_once(base: &std::path::Path) -> (Pipeline, corrlab_runner::RunSummary) {
    write_universe(base, &SYMBOLS);
    let pipeline = Pipeline::new(test_config(base)).unwrap();
    let summary = pipeline
        .run(&FixtureProvider::standard(), None, now())
        .unwrap();
    (pipeline, summary)
}

#[test]
fn run_writes_every_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let (pipeline, summary) = run_once(dir.path());
    let paths = pipeline.paths();

    assert!(paths.universe_table(Granularity::Daily).exists());
    assert!(paths.universe_table(Granularity::Minute).exists());
    assert!(paths.correlation_matrix().exists());
    assert!(paths.projection().exists());
    assert!(paths.enriched().exists());
    assert!(paths.manifest().exists());
    assert_eq!(summary.plot_path, paths.plot());

    let html = std::fs::read_to_string(paths.plot()).unwrap();
    assert!(html.contains("Plotly.newPlot"));
    assert!(html.contains("Industrials"));

    let matrix = storage::read_correlation(&paths.correlation_matrix()).unwrap();
    assert_eq!(matrix.symbols(), SYMBOLS);
    assert!(matrix.is_symmetric(1e-12));
    assert!(matrix.get_by_symbol("AAA", "BBB").unwrap() > 0.99);
    assert!(matrix.get_by_symbol("AAA", "CCC").unwrap() < -0.99);

    let projection = storage::read_projection(&paths.projection()).unwrap();
    assert_eq!(projection.symbols(), SYMBOLS);
    assert!(projection.coords().iter().flatten().all(|v| v.is_finite()));

    // 29 valid daily returns for each of the five instruments
    let rows = storage::read_enriched(&paths.enriched()).unwrap();
    assert_eq!(rows.len(), 5 * 29);
    assert!(rows.iter().all(|r| r.sector.is_some()));
}

#[test]
fn manifest_records_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let (pipeline, summary) = run_once(dir.path());

    let text = std::fs::read_to_string(pipeline.paths().manifest()).unwrap();
    let manifest: RunManifest = serde_json::from_str(&text).unwrap();

    assert_eq!(manifest.instruments, 5);
    assert!(manifest.skipped.is_empty());
    assert_eq!(manifest.config.projection.seed, 42);
    assert_eq!(manifest.universe_table_hashes.len(), 2);
    assert_eq!(manifest.enriched_rows, 5 * 29);
    assert_eq!(manifest.iterations, summary.manifest.iterations);

    let bytes = std::fs::read(pipeline.paths().universe_table(Granularity::Daily)).unwrap();
    assert_eq!(
        manifest.universe_table_hashes[&Granularity::Daily],
        blake3::hash(&bytes).to_hex().to_string()
    );
}

#[test]
fn same_seed_gives_identical_projection() {
    let a = tempfile::tempdir().unwrap();
    let b = tempfile::tempdir().unwrap();
    let (pa, _) = run_once(a.path());
    let (pb, _) = run_once(b.path());

    assert_eq!(
        std::fs::read(pa.paths().projection()).unwrap(),
        std::fs::read(pb.paths().projection()).unwrap()
    );
    assert_eq!(
        std::fs::read(pa.paths().correlation_matrix()).unwrap(),
        std::fs::read(pb.paths().correlation_matrix()).unwrap()
    );
}

#[test]
fn resume_from_each_stage_reproduces_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let (pipeline, _) = run_once(dir.path());
    let paths = pipeline.paths();

    let matrix_before = std::fs::read(paths.correlation_matrix()).unwrap();
    let projection_before = std::fs::read(paths.projection()).unwrap();
    let enriched_before = std::fs::read(paths.enriched()).unwrap();
    let plot_before = std::fs::read(paths.plot()).unwrap();

    pipeline.correlate_from_disk().unwrap();
    assert_eq!(std::fs::read(paths.correlation_matrix()).unwrap(), matrix_before);

    pipeline.project_from_disk().unwrap();
    assert_eq!(std::fs::read(paths.projection()).unwrap(), projection_before);

    pipeline.enrich_from_disk(now()).unwrap();
    assert_eq!(std::fs::read(paths.enriched()).unwrap(), enriched_before);

    pipeline.plot_from_disk().unwrap();
    assert_eq!(std::fs::read(paths.plot()).unwrap(), plot_before);
}

#[test]
fn resume_without_prior_stage_names_the_stage() {
    let dir = tempfile::tempdir().unwrap();
    write_universe(dir.path(), &SYMBOLS);
    let pipeline = Pipeline::new(test_config(dir.path())).unwrap();

    let err = pipeline.correlate_from_disk().unwrap_err();
    assert_eq!(err.stage, Stage::Correlation);
    assert!(matches!(err.source, StageError::Storage(_)));

    let err = pipeline.project_from_disk().unwrap_err();
    assert_eq!(err.stage, Stage::Projection);
    assert!(err.to_string().starts_with("projection stage failed"));
}

#[test]
fn perplexity_too_large_fails_before_any_fetch() {
    let dir = tempfile::tempdir().unwrap();
    write_universe(dir.path(), &SYMBOLS);
    let mut config = test_config(dir.path());
    config.projection.perplexity = 5.0;
    let pipeline = Pipeline::new(config).unwrap();
    let provider = FixtureProvider::standard();

    let err = pipeline.run(&provider, None, now()).unwrap_err();

    assert_eq!(err.stage, Stage::Projection);
    assert!(matches!(err.source, StageError::Projection(_)));
    assert_eq!(provider.calls.load(Ordering::Relaxed), 0);
    assert!(!pipeline.paths().returns_dir.exists());
    assert!(!pipeline.paths().correlation_matrix().exists());
}

#[test]
fn skipped_instruments_are_rechecked_against_perplexity() {
    let dir = tempfile::tempdir().unwrap();
    write_universe(dir.path(), &SYMBOLS);
    let mut config = test_config(dir.path());
    config.aggregation.failure_policy = FailurePolicy::Skip;
    config.projection.perplexity = 3.0;
    let pipeline = Pipeline::new(config).unwrap();
    let provider = FixtureProvider::standard().failing("DDD").failing("EEE");

    let err = pipeline.run(&provider, None, now()).unwrap_err();

    // 3 < 5 passes up front; only 3 instruments survive aggregation.
    assert_eq!(err.stage, Stage::Projection);
    assert!(matches!(err.source, StageError::Projection(_)));
    assert!(pipeline.paths().correlation_matrix().exists());
}

#[test]
fn manifest_write_failure_names_the_manifest_stage() {
    let dir = tempfile::tempdir().unwrap();
    write_universe(dir.path(), &SYMBOLS);
    let pipeline = Pipeline::new(test_config(dir.path())).unwrap();
    // A non-empty directory where the manifest file belongs.
    let blocker = pipeline.paths().manifest();
    std::fs::create_dir_all(&blocker).unwrap();
    std::fs::write(blocker.join("keep"), "x").unwrap();

    let err = pipeline
        .run(&FixtureProvider::standard(), None, now())
        .unwrap_err();

    assert_eq!(err.stage, Stage::Manifest);
    assert!(err.to_string().starts_with("manifest stage failed"));
    assert!(pipeline.paths().plot().exists());
}

#[test]
fn short_enrichment_window_limits_rows() {
    let dir = tempfile::tempdir().unwrap();
    write_universe(dir.path(), &SYMBOLS);
    let mut config = test_config(dir.path());
    // Fixture bars run from day 0 to day 29, "now" is day 60.
    config.enrichment.window_days = 35;
    let pipeline = Pipeline::new(config).unwrap();

    let summary = pipeline
        .run(&FixtureProvider::standard(), None, now())
        .unwrap();
    // Days 25..=29 remain.
    assert_eq!(summary.manifest.enriched_rows, 5 * 5);
}
