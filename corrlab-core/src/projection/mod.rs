//! Projection engine: 2D layout of instruments from their correlation rows.
//!
//! Each instrument's row of the correlation matrix is treated as its feature
//! vector and embedded with exact t-SNE, so instruments that move together
//! land close together. Missing correlation cells are read as 0.0.
//!
//! The embedding starts from a random layout; the seed in
//! [`ProjectionConfig`] makes runs reproducible.

pub mod tsne;

use crate::correlation::CorrelationMatrix;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;
use tracing::info;

/// Number of output coordinates (`d1`, `d2`).
pub const OUTPUT_DIMS: usize = 2;

#[derive(Debug, Error, PartialEq)]
pub enum ProjectionError {
    #[error("projection needs at least 2 instruments, got {0}")]
    TooFewInstruments(usize),

    #[error("perplexity {perplexity} must be positive and less than the number of instruments ({instruments})")]
    InvalidPerplexity { perplexity: f64, instruments: usize },

    #[error("learning rate must be positive, got {0}")]
    InvalidLearningRate(f64),

    #[error("max_iter must be at least {min}, got {found}")]
    InvalidIterations { min: usize, found: usize },

    #[error("early exaggeration must be at least 1, got {0}")]
    InvalidExaggeration(f64),

    #[error("projection has {symbols} symbols but {rows} coordinate rows")]
    Shape { symbols: usize, rows: usize },

    #[error("symbol '{0}' appears more than once")]
    DuplicateSymbol(String),
}

/// Gradient-descent step size.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningRate {
    /// `max(n / early_exaggeration / 4, 50)`.
    #[default]
    Auto,
    Fixed(f64),
}

impl LearningRate {
    pub fn resolve(&self, n: usize, early_exaggeration: f64) -> f64 {
        match self {
            LearningRate::Auto => (n as f64 / early_exaggeration / 4.0).max(50.0),
            LearningRate::Fixed(rate) => *rate,
        }
    }
}

/// t-SNE settings. The seed has no default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionConfig {
    #[serde(default = "default_perplexity")]
    pub perplexity: f64,
    #[serde(default = "default_max_iter")]
    pub max_iter: usize,
    #[serde(default = "default_early_exaggeration")]
    pub early_exaggeration: f64,
    #[serde(default)]
    pub learning_rate: LearningRate,
    pub seed: u64,
}

fn default_perplexity() -> f64 {
    3.0
}

fn default_max_iter() -> usize {
    3000
}

fn default_early_exaggeration() -> f64 {
    1.0
}

impl ProjectionConfig {
    /// Defaults (perplexity 3, 3000 iterations, no exaggeration, auto rate).
    pub fn with_seed(seed: u64) -> Self {
        Self {
            perplexity: default_perplexity(),
            max_iter: default_max_iter(),
            early_exaggeration: default_early_exaggeration(),
            learning_rate: LearningRate::Auto,
            seed,
        }
    }

    /// Checks that do not depend on the input size.
    pub fn validate(&self) -> Result<(), ProjectionError> {
        if !(self.perplexity > 0.0) {
            return Err(ProjectionError::InvalidPerplexity {
                perplexity: self.perplexity,
                instruments: 0,
            });
        }
        if self.max_iter < tsne::EXPLORATION_ITER {
            return Err(ProjectionError::InvalidIterations {
                min: tsne::EXPLORATION_ITER,
                found: self.max_iter,
            });
        }
        if !(self.early_exaggeration >= 1.0) {
            return Err(ProjectionError::InvalidExaggeration(self.early_exaggeration));
        }
        if let LearningRate::Fixed(rate) = self.learning_rate {
            if !(rate > 0.0) {
                return Err(ProjectionError::InvalidLearningRate(rate));
            }
        }
        Ok(())
    }

    /// Full validation against `n` instruments.
    pub fn validate_for(&self, n: usize) -> Result<(), ProjectionError> {
        if n < 2 {
            return Err(ProjectionError::TooFewInstruments(n));
        }
        self.validate()?;
        if self.perplexity >= n as f64 {
            return Err(ProjectionError::InvalidPerplexity {
                perplexity: self.perplexity,
                instruments: n,
            });
        }
        Ok(())
    }
}

/// 2D coordinates per instrument, in correlation-matrix order.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionTable {
    symbols: Vec<String>,
    coords: Vec<[f64; OUTPUT_DIMS]>,
}

impl ProjectionTable {
    pub fn new(symbols: Vec<String>, coords: Vec<[f64; OUTPUT_DIMS]>) -> Result<Self, ProjectionError> {
        if symbols.len() != coords.len() {
            return Err(ProjectionError::Shape {
                symbols: symbols.len(),
                rows: coords.len(),
            });
        }
        let mut seen = HashSet::new();
        if let Some(dup) = symbols.iter().find(|s| !seen.insert(s.as_str())) {
            return Err(ProjectionError::DuplicateSymbol(dup.clone()));
        }
        Ok(Self { symbols, coords })
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn coords(&self) -> &[[f64; OUTPUT_DIMS]] {
        &self.coords
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn get(&self, symbol: &str) -> Option<[f64; OUTPUT_DIMS]> {
        self.symbols
            .iter()
            .position(|s| s == symbol)
            .map(|i| self.coords[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, [f64; OUTPUT_DIMS])> {
        self.symbols
            .iter()
            .map(String::as_str)
            .zip(self.coords.iter().copied())
    }
}

/// Projection table plus optimizer diagnostics.
#[derive(Debug, Clone)]
pub struct ProjectionResult {
    pub table: ProjectionTable,
    pub kl_divergence: f64,
    pub iterations: usize,
}

/// Embed the instruments of `matrix` into 2D.
///
/// Configuration is validated against the matrix size before any work.
pub fn project(
    matrix: &CorrelationMatrix,
    config: &ProjectionConfig,
) -> Result<ProjectionResult, ProjectionError> {
    let n = matrix.len();
    config.validate_for(n)?;

    let features: Vec<Vec<f64>> = (0..n)
        .map(|i| matrix.row(i).iter().map(|v| v.unwrap_or(0.0)).collect())
        .collect();

    let params = tsne::TsneParams {
        perplexity: config.perplexity,
        max_iter: config.max_iter,
        early_exaggeration: config.early_exaggeration,
        learning_rate: config
            .learning_rate
            .resolve(n, config.early_exaggeration),
        dims: OUTPUT_DIMS,
    };
    let mut rng = StdRng::seed_from_u64(config.seed);
    let output = tsne::fit(&features, &params, &mut rng);

    info!(
        instruments = n,
        iterations = output.iterations,
        kl_divergence = output.kl_divergence,
        "t-SNE projection finished"
    );

    let coords = output
        .embedding
        .chunks_exact(OUTPUT_DIMS)
        .map(|c| [c[0], c[1]])
        .collect();

    Ok(ProjectionResult {
        table: ProjectionTable {
            symbols: matrix.symbols().to_vec(),
            coords,
        },
        kl_divergence: output.kl_divergence,
        iterations: output.iterations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two blocks of three: high correlation inside a block, negative across.
    fn two_cluster_matrix() -> CorrelationMatrix {
        let symbols: Vec<String> = ["A1", "A2", "A3", "B1", "B2", "B3"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let mut values = Vec::new();
        for i in 0..6 {
            for j in 0..6 {
                let v = if i == j {
                    1.0
                } else if (i < 3) == (j < 3) {
                    0.9
                } else {
                    -0.2
                };
                values.push(Some(v));
            }
        }
        CorrelationMatrix::new(symbols, values).unwrap()
    }

    fn quick_config(seed: u64) -> ProjectionConfig {
        ProjectionConfig {
            perplexity: 2.0,
            max_iter: 500,
            ..ProjectionConfig::with_seed(seed)
        }
    }

    fn dist(a: [f64; 2], b: [f64; 2]) -> f64 {
        ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)).sqrt()
    }

    #[test]
    fn perplexity_must_be_below_instrument_count() {
        let m = two_cluster_matrix();
        let config = ProjectionConfig {
            perplexity: 6.0,
            ..ProjectionConfig::with_seed(1)
        };
        assert_eq!(
            project(&m, &config).unwrap_err(),
            ProjectionError::InvalidPerplexity {
                perplexity: 6.0,
                instruments: 6
            }
        );
    }

    #[test]
    fn other_parameters_validated() {
        let mut c = ProjectionConfig::with_seed(1);
        c.max_iter = 100;
        assert!(matches!(c.validate(), Err(ProjectionError::InvalidIterations { .. })));

        let mut c = ProjectionConfig::with_seed(1);
        c.learning_rate = LearningRate::Fixed(0.0);
        assert_eq!(c.validate(), Err(ProjectionError::InvalidLearningRate(0.0)));

        let mut c = ProjectionConfig::with_seed(1);
        c.early_exaggeration = 0.5;
        assert_eq!(c.validate(), Err(ProjectionError::InvalidExaggeration(0.5)));

        assert_eq!(
            ProjectionConfig::with_seed(1).validate_for(1),
            Err(ProjectionError::TooFewInstruments(1))
        );
    }

    #[test]
    fn one_row_per_instrument_in_matrix_order() {
        let m = two_cluster_matrix();
        let result = project(&m, &quick_config(3)).unwrap();
        assert_eq!(result.table.symbols(), m.symbols());
        assert_eq!(result.table.len(), 6);
        assert!(result.table.coords().iter().all(|c| c[0].is_finite() && c[1].is_finite()));
    }

    #[test]
    fn same_seed_same_layout() {
        let m = two_cluster_matrix();
        let a = project(&m, &quick_config(11)).unwrap();
        let b = project(&m, &quick_config(11)).unwrap();
        assert_eq!(a.table, b.table);
    }

    #[test]
    fn correlated_instruments_land_together() {
        let m = two_cluster_matrix();
        let t = project(&m, &quick_config(5)).unwrap().table;

        let within = dist(t.get("A1").unwrap(), t.get("A2").unwrap())
            .max(dist(t.get("B1").unwrap(), t.get("B3").unwrap()));
        let across = dist(t.get("A1").unwrap(), t.get("B1").unwrap())
            .min(dist(t.get("A3").unwrap(), t.get("B2").unwrap()));
        assert!(within < across, "within {within} vs across {across}");
    }

    #[test]
    fn auto_learning_rate_floor() {
        assert_eq!(LearningRate::Auto.resolve(10, 1.0), 50.0);
        assert_eq!(LearningRate::Auto.resolve(1000, 1.0), 250.0);
        assert_eq!(LearningRate::Fixed(12.5).resolve(1000, 1.0), 12.5);
    }

    #[test]
    fn table_rejects_duplicates() {
        let err = ProjectionTable::new(vec!["A".into(), "A".into()], vec![[0.0, 0.0]; 2]).unwrap_err();
        assert_eq!(err, ProjectionError::DuplicateSymbol("A".into()));
    }
}
