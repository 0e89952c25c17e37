//! Universe-wide return table.
//!
//! One row per timestamp, one column per (symbol, return kind). Built in a
//! single pass from every instrument's return series: the row index is the
//! union of all their timestamps and every absent combination holds `None`.
//!
//! Column labels follow the persisted layout: `"{SYMBOL} Return"` and
//! `"{SYMBOL} Log Return"`.

use crate::domain::{Granularity, ReturnSeries, SeriesError};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum TableError {
    #[error("symbol '{0}' appears more than once")]
    DuplicateSymbol(String),

    #[error("column '{0}' appears more than once")]
    DuplicateColumn(String),

    #[error("series for '{symbol}' is {found}, table is {expected}")]
    GranularityMismatch {
        symbol: String,
        expected: Granularity,
        found: Granularity,
    },

    #[error("column '{column}' has {found} values, index has {expected}")]
    ColumnLength {
        column: String,
        expected: usize,
        found: usize,
    },

    #[error(transparent)]
    Series(#[from] SeriesError),
}

/// Which of the two return columns to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnKind {
    #[default]
    Simple,
    Log,
}

impl ReturnKind {
    /// Column label in a single-instrument table.
    pub fn label(&self) -> &'static str {
        match self {
            ReturnKind::Simple => "Return",
            ReturnKind::Log => "Log Return",
        }
    }
}

impl fmt::Display for ReturnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReturnKind::Simple => "simple",
            ReturnKind::Log => "log",
        })
    }
}

impl FromStr for ReturnKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "simple" | "return" => Ok(ReturnKind::Simple),
            "log" | "log_return" => Ok(ReturnKind::Log),
            other => Err(format!("unknown return kind '{other}' (expected simple or log)")),
        }
    }
}

/// A (symbol, kind) column of the universe table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnKey {
    pub symbol: String,
    pub kind: ReturnKind,
}

impl ColumnKey {
    pub fn new(symbol: impl Into<String>, kind: ReturnKind) -> Self {
        Self {
            symbol: symbol.into(),
            kind,
        }
    }

    /// `"AAPL Return"` / `"AAPL Log Return"`.
    pub fn label(&self) -> String {
        format!("{} {}", self.symbol, self.kind.label())
    }

    /// Inverse of [`ColumnKey::label`]. The log suffix is checked first since
    /// it also ends in `" Return"`.
    pub fn parse(label: &str) -> Option<Self> {
        let label = label.trim();
        if let Some(symbol) = label.strip_suffix(" Log Return") {
            return (!symbol.is_empty()).then(|| Self::new(symbol, ReturnKind::Log));
        }
        label
            .strip_suffix(" Return")
            .filter(|s| !s.is_empty())
            .map(|symbol| Self::new(symbol, ReturnKind::Simple))
    }
}

/// One melted observation: a non-missing return for a symbol at a timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LongReturn {
    pub symbol: String,
    pub timestamp: NaiveDateTime,
    pub value: f64,
}

/// Wide return table for one granularity. Values are stored column-major.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnTable {
    granularity: Granularity,
    index: Vec<NaiveDateTime>,
    columns: Vec<ColumnKey>,
    values: Vec<Vec<Option<f64>>>,
}

impl ReturnTable {
    /// Assemble a table from raw parts, validating shape and index order.
    pub fn new(
        granularity: Granularity,
        index: Vec<NaiveDateTime>,
        columns: Vec<ColumnKey>,
        values: Vec<Vec<Option<f64>>>,
    ) -> Result<Self, TableError> {
        if let Some(pair) = index.windows(2).find(|p| p[1] <= p[0]) {
            return Err(SeriesError::NotIncreasing {
                prev: pair[0],
                next: pair[1],
            }
            .into());
        }
        if columns.len() != values.len() {
            return Err(TableError::ColumnLength {
                column: "<columns>".into(),
                expected: columns.len(),
                found: values.len(),
            });
        }
        let mut seen = HashSet::new();
        for (key, col) in columns.iter().zip(&values) {
            if !seen.insert(key) {
                return Err(TableError::DuplicateColumn(key.label()));
            }
            if col.len() != index.len() {
                return Err(TableError::ColumnLength {
                    column: key.label(),
                    expected: index.len(),
                    found: col.len(),
                });
            }
        }
        Ok(Self {
            granularity,
            index,
            columns,
            values,
        })
    }

    /// Outer-join every instrument's series on timestamp in one pass.
    ///
    /// Columns appear in input order, `Return` before `Log Return` for each
    /// symbol. The result does not depend on input order beyond that.
    pub fn union_join(
        granularity: Granularity,
        series: &[(String, ReturnSeries)],
    ) -> Result<Self, TableError> {
        let mut symbols = HashSet::new();
        let mut all_ts = BTreeSet::new();
        for (symbol, s) in series {
            if !symbols.insert(symbol.as_str()) {
                return Err(TableError::DuplicateSymbol(symbol.clone()));
            }
            if s.granularity != granularity {
                return Err(TableError::GranularityMismatch {
                    symbol: symbol.clone(),
                    expected: granularity,
                    found: s.granularity,
                });
            }
            all_ts.extend(s.timestamps.iter().copied());
        }

        let index: Vec<NaiveDateTime> = all_ts.into_iter().collect();
        let position: HashMap<NaiveDateTime, usize> =
            index.iter().enumerate().map(|(i, ts)| (*ts, i)).collect();

        let mut columns = Vec::with_capacity(series.len() * 2);
        let mut values = Vec::with_capacity(series.len() * 2);
        for (symbol, s) in series {
            let mut simple = vec![None; index.len()];
            let mut log = vec![None; index.len()];
            for (k, ts) in s.timestamps.iter().enumerate() {
                let row = position[ts];
                simple[row] = s.simple[k];
                log[row] = s.log[k];
            }
            columns.push(ColumnKey::new(symbol.clone(), ReturnKind::Simple));
            values.push(simple);
            columns.push(ColumnKey::new(symbol.clone(), ReturnKind::Log));
            values.push(log);
        }

        Ok(Self {
            granularity,
            index,
            columns,
            values,
        })
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    pub fn index(&self) -> &[NaiveDateTime] {
        &self.index
    }

    pub fn columns(&self) -> &[ColumnKey] {
        &self.columns
    }

    pub fn row_count(&self) -> usize {
        self.index.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Values of column `i`, aligned with [`ReturnTable::index`].
    pub fn column_values(&self, i: usize) -> &[Option<f64>] {
        &self.values[i]
    }

    pub fn column(&self, symbol: &str, kind: ReturnKind) -> Option<&[Option<f64>]> {
        self.columns
            .iter()
            .position(|c| c.symbol == symbol && c.kind == kind)
            .map(|i| self.values[i].as_slice())
    }

    /// Distinct symbols in column order.
    pub fn symbols(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.columns
            .iter()
            .filter(|c| seen.insert(c.symbol.as_str()))
            .map(|c| c.symbol.as_str())
            .collect()
    }

    /// Rows with `timestamp >= start`.
    pub fn since(&self, start: NaiveDateTime) -> ReturnTable {
        let first = self.index.partition_point(|ts| *ts < start);
        ReturnTable {
            granularity: self.granularity,
            index: self.index[first..].to_vec(),
            columns: self.columns.clone(),
            values: self.values.iter().map(|c| c[first..].to_vec()).collect(),
        }
    }

    /// Columns of one kind, labelled by bare symbol.
    pub fn select(&self, kind: ReturnKind) -> Vec<(&str, &[Option<f64>])> {
        self.columns
            .iter()
            .zip(&self.values)
            .filter(|(c, _)| c.kind == kind)
            .map(|(c, v)| (c.symbol.as_str(), v.as_slice()))
            .collect()
    }

    /// Long form of one kind: row-major (timestamp, then column order),
    /// missing values dropped.
    pub fn melt(&self, kind: ReturnKind) -> Vec<LongReturn> {
        let selected = self.select(kind);
        let mut out = Vec::new();
        for (row, ts) in self.index.iter().enumerate() {
            for (symbol, values) in &selected {
                if let Some(value) = values[row] {
                    out.push(LongReturn {
                        symbol: (*symbol).to_string(),
                        timestamp: *ts,
                        value,
                    });
                }
            }
        }
        out
    }
}
