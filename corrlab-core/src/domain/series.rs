//! Price and return series for a single instrument.

use super::Granularity;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum SeriesError {
    #[error("timestamps must be strictly increasing: {prev} is followed by {next}")]
    NotIncreasing {
        prev: NaiveDateTime,
        next: NaiveDateTime,
    },

    #[error("length mismatch: {timestamps} timestamps but {values} values")]
    LengthMismatch { timestamps: usize, values: usize },
}

/// Closing prices for one instrument at one granularity.
///
/// Invariant: timestamps strictly increasing. A `None` close is a provider gap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSeries {
    granularity: Granularity,
    timestamps: Vec<NaiveDateTime>,
    closes: Vec<Option<f64>>,
}

impl PriceSeries {
    pub fn new(
        granularity: Granularity,
        timestamps: Vec<NaiveDateTime>,
        closes: Vec<Option<f64>>,
    ) -> Result<Self, SeriesError> {
        if timestamps.len() != closes.len() {
            return Err(SeriesError::LengthMismatch {
                timestamps: timestamps.len(),
                values: closes.len(),
            });
        }
        check_increasing(&timestamps)?;
        Ok(Self {
            granularity,
            timestamps,
            closes,
        })
    }

    /// Build from `(timestamp, close)` pairs. NaN closes become gaps.
    pub fn from_points(
        granularity: Granularity,
        points: impl IntoIterator<Item = (NaiveDateTime, f64)>,
    ) -> Result<Self, SeriesError> {
        let (timestamps, closes): (Vec<_>, Vec<_>) = points
            .into_iter()
            .map(|(ts, close)| (ts, if close.is_nan() { None } else { Some(close) }))
            .unzip();
        Self::new(granularity, timestamps, closes)
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    pub fn timestamps(&self) -> &[NaiveDateTime] {
        &self.timestamps
    }

    pub fn closes(&self) -> &[Option<f64>] {
        &self.closes
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

/// Simple and log returns aligned 1:1 with the source price series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnSeries {
    pub granularity: Granularity,
    pub timestamps: Vec<NaiveDateTime>,
    pub simple: Vec<Option<f64>>,
    pub log: Vec<Option<f64>>,
}

impl ReturnSeries {
    /// Assemble a series from already-computed columns (e.g. a reloaded file).
    pub fn from_parts(
        granularity: Granularity,
        timestamps: Vec<NaiveDateTime>,
        simple: Vec<Option<f64>>,
        log: Vec<Option<f64>>,
    ) -> Result<Self, SeriesError> {
        for values in [&simple, &log] {
            if values.len() != timestamps.len() {
                return Err(SeriesError::LengthMismatch {
                    timestamps: timestamps.len(),
                    values: values.len(),
                });
            }
        }
        check_increasing(&timestamps)?;
        Ok(Self {
            granularity,
            timestamps,
            simple,
            log,
        })
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Number of timestamps carrying a simple return.
    pub fn valid_count(&self) -> usize {
        self.simple.iter().filter(|v| v.is_some()).count()
    }
}

fn check_increasing(timestamps: &[NaiveDateTime]) -> Result<(), SeriesError> {
    for pair in timestamps.windows(2) {
        if pair[1] <= pair[0] {
            return Err(SeriesError::NotIncreasing {
                prev: pair[0],
                next: pair[1],
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn day(d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    #[test]
    fn rejects_duplicate_timestamps() {
        let err = PriceSeries::new(
            Granularity::Daily,
            vec![day(2), day(2)],
            vec![Some(1.0), Some(2.0)],
        )
        .unwrap_err();
        assert!(matches!(err, SeriesError::NotIncreasing { .. }));
    }

    #[test]
    fn rejects_unsorted_timestamps() {
        assert!(PriceSeries::from_points(Granularity::Daily, [(day(3), 1.0), (day(2), 2.0)]).is_err());
    }

    #[test]
    fn nan_close_becomes_gap() {
        let s = PriceSeries::from_points(Granularity::Daily, [(day(2), 1.0), (day(3), f64::NAN)])
            .unwrap();
        assert_eq!(s.closes(), &[Some(1.0), None]);
    }

    #[test]
    fn length_mismatch_rejected() {
        let err = ReturnSeries::from_parts(Granularity::Daily, vec![day(2)], vec![], vec![None])
            .unwrap_err();
        assert_eq!(
            err,
            SeriesError::LengthMismatch {
                timestamps: 1,
                values: 0
            }
        );
    }
}
