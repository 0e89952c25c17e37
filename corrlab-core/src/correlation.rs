//! Correlation engine.
//!
//! Pairwise-complete Pearson correlation across the instruments of a return
//! table: each cell uses only the timestamps where both series are present,
//! so two instruments with different gap patterns are still compared on
//! their mutual overlap.
//!
//! A cell is `None` when the overlap has fewer than two observations or when
//! either side has zero variance over it. The diagonal is 1 for every
//! instrument with at least one valid return in the window.

use crate::table::{ReturnKind, ReturnTable};
use chrono::NaiveDateTime;
use std::collections::HashSet;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, PartialEq)]
pub enum CorrelationError {
    #[error("matrix for {symbols} symbols needs {expected} values, got {found}")]
    Shape {
        symbols: usize,
        expected: usize,
        found: usize,
    },

    #[error("symbol '{0}' appears more than once")]
    DuplicateSymbol(String),
}

/// Square symmetric correlation matrix indexed by symbol (row-major).
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelationMatrix {
    symbols: Vec<String>,
    values: Vec<Option<f64>>,
}

impl CorrelationMatrix {
    /// Build from a symbol index and `n * n` row-major values.
    pub fn new(symbols: Vec<String>, values: Vec<Option<f64>>) -> Result<Self, CorrelationError> {
        let n = symbols.len();
        if values.len() != n * n {
            return Err(CorrelationError::Shape {
                symbols: n,
                expected: n * n,
                found: values.len(),
            });
        }
        let mut seen = HashSet::new();
        if let Some(dup) = symbols.iter().find(|s| !seen.insert(s.as_str())) {
            return Err(CorrelationError::DuplicateSymbol(dup.clone()));
        }
        Ok(Self { symbols, values })
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn get(&self, i: usize, j: usize) -> Option<f64> {
        self.values[i * self.symbols.len() + j]
    }

    pub fn get_by_symbol(&self, a: &str, b: &str) -> Option<f64> {
        let i = self.position(a)?;
        let j = self.position(b)?;
        self.get(i, j)
    }

    pub fn position(&self, symbol: &str) -> Option<usize> {
        self.symbols.iter().position(|s| s == symbol)
    }

    pub fn row(&self, i: usize) -> &[Option<f64>] {
        let n = self.symbols.len();
        &self.values[i * n..(i + 1) * n]
    }

    /// True when every pair of mirrored cells agrees within `tol`
    /// (both missing counts as agreement).
    pub fn is_symmetric(&self, tol: f64) -> bool {
        let n = self.len();
        (0..n).all(|i| {
            (i + 1..n).all(|j| match (self.get(i, j), self.get(j, i)) {
                (Some(a), Some(b)) => (a - b).abs() <= tol,
                (None, None) => true,
                _ => false,
            })
        })
    }
}

/// Correlate the columns of one return kind, keeping rows at or after `start`.
///
/// `start = None` uses the full history.
pub fn correlation_matrix(
    table: &ReturnTable,
    kind: ReturnKind,
    start: Option<NaiveDateTime>,
) -> CorrelationMatrix {
    let windowed;
    let table = match start {
        Some(start) => {
            windowed = table.since(start);
            &windowed
        }
        None => table,
    };

    let columns = table.select(kind);
    let n = columns.len();
    let mut values = vec![None; n * n];

    for i in 0..n {
        let has_data = columns[i].1.iter().any(|v| v.is_some());
        values[i * n + i] = has_data.then_some(1.0);
        for j in (i + 1)..n {
            let r = pearson_pairwise(columns[i].1, columns[j].1);
            values[i * n + j] = r;
            values[j * n + i] = r;
        }
    }

    debug!(
        symbols = n,
        rows = table.row_count(),
        kind = %kind,
        "correlation matrix computed"
    );

    CorrelationMatrix {
        symbols: columns.iter().map(|(s, _)| (*s).to_string()).collect(),
        values,
    }
}

/// Pearson correlation over the timestamps where both series are present.
pub fn pearson_pairwise(a: &[Option<f64>], b: &[Option<f64>]) -> Option<f64> {
    let pairs: Vec<(f64, f64)> = a
        .iter()
        .zip(b)
        .filter_map(|(x, y)| Some(((*x)?, (*y)?)))
        .collect();
    if pairs.len() < 2 {
        return None;
    }
    // Exact check: a rounded mean can leave a constant series with a
    // tiny nonzero spread.
    let (x0, y0) = pairs[0];
    if pairs.iter().all(|(x, _)| *x == x0) || pairs.iter().all(|(_, y)| *y == y0) {
        return None;
    }

    let count = pairs.len() as f64;
    let mean_x = pairs.iter().map(|(x, _)| x).sum::<f64>() / count;
    let mean_y = pairs.iter().map(|(_, y)| y).sum::<f64>() / count;

    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (x, y) in &pairs {
        let dx = x - mean_x;
        let dy = y - mean_y;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }

    if sxx <= 0.0 || syy <= 0.0 {
        return None;
    }
    let r = sxy / (sxx.sqrt() * syy.sqrt());
    r.is_finite().then(|| r.clamp(-1.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Granularity, ReturnSeries};
    use chrono::NaiveDate;

    fn day(d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn series(days: std::ops::Range<u32>, simple: Vec<Option<f64>>) -> ReturnSeries {
        let timestamps: Vec<_> = days.map(day).collect();
        let log = simple.iter().map(|v| v.map(|r| (1.0 + r).ln())).collect();
        ReturnSeries::from_parts(Granularity::Daily, timestamps, simple, log).unwrap()
    }

    #[test]
    fn identical_series_correlate_to_one() {
        let a = vec![Some(0.01), Some(-0.02), Some(0.03), Some(0.0)];
        assert!((pearson_pairwise(&a, &a).unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn mirrored_series_correlate_to_minus_one() {
        let a = vec![Some(0.01), Some(-0.02), Some(0.03)];
        let b: Vec<_> = a.iter().map(|v| v.map(|x: f64| -x)).collect();
        assert!((pearson_pairwise(&a, &b).unwrap() + 1.0).abs() < 1e-12);
    }

    #[test]
    fn fewer_than_two_overlaps_is_missing() {
        let a = vec![Some(0.1), None, Some(0.3)];
        let b = vec![None, Some(0.2), Some(0.1)];
        assert_eq!(pearson_pairwise(&a, &b), None);
    }

    #[test]
    fn constant_series_is_missing() {
        let a = vec![Some(0.1), Some(0.1), Some(0.1)];
        let b = vec![Some(0.1), Some(0.2), Some(0.3)];
        assert_eq!(pearson_pairwise(&a, &b), None);
    }

    #[test]
    fn pairwise_not_listwise() {
        // CCC only overlaps AAA on days 5-7; AAA/BBB overlap everywhere.
        let table = ReturnTable::union_join(
            Granularity::Daily,
            &[
                (
                    "AAA".into(),
                    series(2..8, vec![None, Some(0.1), Some(0.2), Some(-0.1), Some(0.05), Some(0.0)]),
                ),
                (
                    "BBB".into(),
                    series(2..8, vec![None, Some(0.2), Some(0.4), Some(-0.2), Some(0.1), Some(0.0)]),
                ),
                ("CCC".into(), series(5..8, vec![Some(-0.1), Some(0.05), Some(0.1)])),
            ],
        )
        .unwrap();

        let m = correlation_matrix(&table, ReturnKind::Simple, None);
        assert_eq!(m.symbols(), &["AAA", "BBB", "CCC"]);
        assert!((m.get_by_symbol("AAA", "BBB").unwrap() - 1.0).abs() < 1e-12);
        assert!(m.get_by_symbol("AAA", "CCC").is_some());
        assert!(m.is_symmetric(0.0));
        for i in 0..3 {
            assert_eq!(m.get(i, i), Some(1.0));
        }
    }

    #[test]
    fn window_excludes_early_rows() {
        let table = ReturnTable::union_join(
            Granularity::Daily,
            &[
                ("AAA".into(), series(2..6, vec![None, Some(0.1), Some(0.2), Some(0.3)])),
                ("BBB".into(), series(2..4, vec![None, Some(0.1)])),
            ],
        )
        .unwrap();

        let m = correlation_matrix(&table, ReturnKind::Simple, Some(day(4)));
        assert_eq!(m.get_by_symbol("AAA", "AAA"), Some(1.0));
        // BBB has no valid return on or after day 4.
        assert_eq!(m.get_by_symbol("BBB", "BBB"), None);
        assert_eq!(m.get_by_symbol("AAA", "BBB"), None);
    }

    #[test]
    fn new_validates_shape() {
        let err = CorrelationMatrix::new(vec!["A".into(), "B".into()], vec![None; 3]).unwrap_err();
        assert!(matches!(err, CorrelationError::Shape { expected: 4, .. }));
        let err = CorrelationMatrix::new(vec!["A".into(), "A".into()], vec![None; 4]).unwrap_err();
        assert_eq!(err, CorrelationError::DuplicateSymbol("A".into()));
    }
}
