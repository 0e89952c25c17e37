//! Return calculator.
//!
//! Converts a close-price series into simple and log period returns.
//! Lookback: 1 (the first timestamp never has a return).
//!
//! Missing data propagates as `None`; nothing here returns an error. A return
//! at `t` is missing when either price is missing or non-finite, or when the
//! previous price is zero or negative. The log return is additionally missing
//! whenever `1 + simple` is not strictly positive.

use crate::domain::{PriceSeries, ReturnSeries};

/// Compute simple and log returns for every timestamp of `prices`.
pub fn compute_returns(prices: &PriceSeries) -> ReturnSeries {
    let closes = prices.closes();
    let n = closes.len();
    let mut simple = vec![None; n];
    let mut log = vec![None; n];

    for t in 1..n {
        let r = simple_return(closes[t - 1], closes[t]);
        simple[t] = r;
        log[t] = r.and_then(log_return);
    }

    ReturnSeries {
        granularity: prices.granularity(),
        timestamps: prices.timestamps().to_vec(),
        simple,
        log,
    }
}

/// `curr / prev - 1`, or `None` if it is undefined.
pub fn simple_return(prev: Option<f64>, curr: Option<f64>) -> Option<f64> {
    let prev = prev.filter(|p| p.is_finite() && *p > 0.0)?;
    let curr = curr.filter(|c| c.is_finite())?;
    let r = curr / prev - 1.0;
    r.is_finite().then_some(r)
}

/// `ln(1 + r)`, or `None` for a non-positive argument.
pub fn log_return(simple: f64) -> Option<f64> {
    let growth = 1.0 + simple;
    (growth > 0.0 && growth.is_finite()).then(|| growth.ln())
}
