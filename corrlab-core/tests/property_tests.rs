//! Property tests for pipeline invariants.
//!
//! Uses proptest to verify:
//! 1. Returns: same length as prices, first value missing, bad previous
//!    prices never produce a log return
//! 2. Union join: rows = distinct timestamps, columns = 2 × instruments
//! 3. Correlation: symmetric, bounded, diagonal 1 exactly when data exists
//! 4. Projection: one finite row per instrument, in matrix order

use chrono::{NaiveDate, NaiveDateTime};
use proptest::prelude::*;
use std::collections::BTreeSet;

use corrlab_core::correlation::correlation_matrix;
use corrlab_core::domain::{Granularity, PriceSeries, ReturnSeries};
use corrlab_core::projection::{project, ProjectionConfig};
use corrlab_core::returns::compute_returns;
use corrlab_core::table::{ReturnKind, ReturnTable};

// ── Strategies (proptest) ────────────────────────────────────────────

fn day(offset: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2020, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        + chrono::Duration::days(offset as i64)
}

/// Prices that may be missing, zero or negative.
fn arb_price() -> impl Strategy<Value = Option<f64>> {
    prop_oneof![
        6 => (1.0..500.0_f64).prop_map(Some),
        1 => Just(None),
        1 => Just(Some(0.0)),
        1 => (-50.0..0.0_f64).prop_map(Some),
    ]
}

fn arb_prices() -> impl Strategy<Value = Vec<Option<f64>>> {
    prop::collection::vec(arb_price(), 0..40)
}

/// Sparse day offsets, sorted and unique.
fn arb_offsets() -> impl Strategy<Value = Vec<u32>> {
    prop::collection::btree_set(0u32..60, 0..30).prop_map(|s| s.into_iter().collect())
}

fn series_from_offsets(offsets: &[u32], seed: u32) -> ReturnSeries {
    let prices: Vec<Option<f64>> = offsets
        .iter()
        .map(|o| Some(100.0 + ((o * 7 + seed * 13) % 17) as f64))
        .collect();
    let ts = offsets.iter().map(|o| day(*o)).collect();
    compute_returns(&PriceSeries::new(Granularity::Daily, ts, prices).unwrap())
}

fn arb_universe() -> impl Strategy<Value = Vec<Vec<u32>>> {
    prop::collection::vec(arb_offsets(), 1..6)
}

fn join(universe: &[Vec<u32>]) -> ReturnTable {
    let series: Vec<(String, ReturnSeries)> = universe
        .iter()
        .enumerate()
        .map(|(i, offsets)| (format!("S{i}"), series_from_offsets(offsets, i as u32)))
        .collect();
    ReturnTable::union_join(Granularity::Daily, &series).unwrap()
}

// ── 1. Returns ───────────────────────────────────────────────────────

proptest! {
    #[test]
    fn returns_align_with_prices(prices in arb_prices()) {
        let ts: Vec<_> = (0..prices.len() as u32).map(day).collect();
        let series = PriceSeries::new(Granularity::Daily, ts, prices.clone()).unwrap();
        let r = compute_returns(&series);

        prop_assert_eq!(r.len(), prices.len());
        prop_assert_eq!(&r.timestamps, series.timestamps());
        if !prices.is_empty() {
            prop_assert!(r.simple[0].is_none());
            prop_assert!(r.log[0].is_none());
        }
    }

    #[test]
    fn bad_previous_price_means_missing_log_return(prices in arb_prices()) {
        let ts: Vec<_> = (0..prices.len() as u32).map(day).collect();
        let r = compute_returns(&PriceSeries::new(Granularity::Daily, ts, prices.clone()).unwrap());

        for t in 1..prices.len() {
            let usable = matches!(prices[t - 1], Some(p) if p > 0.0);
            if !usable || prices[t].is_none() {
                prop_assert!(r.log[t].is_none());
                prop_assert!(r.simple[t].is_none());
            }
            if let Some(l) = r.log[t] {
                prop_assert!(l.is_finite());
            }
        }
    }
}

// ── 2. Union join ────────────────────────────────────────────────────

proptest! {
    #[test]
    fn union_join_shape(universe in arb_universe()) {
        let table = join(&universe);
        let distinct: BTreeSet<u32> = universe.iter().flatten().copied().collect();

        prop_assert_eq!(table.row_count(), distinct.len());
        prop_assert_eq!(table.column_count(), 2 * universe.len());
        prop_assert!(table.index().windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn union_join_preserves_values(universe in arb_universe()) {
        let table = join(&universe);
        for (i, offsets) in universe.iter().enumerate() {
            let s = series_from_offsets(offsets, i as u32);
            let col = table.column(&format!("S{i}"), ReturnKind::Simple).unwrap();
            let present = col.iter().filter(|v| v.is_some()).count();
            prop_assert_eq!(present, s.valid_count());
        }
    }
}

// ── 3. Correlation ───────────────────────────────────────────────────

proptest! {
    #[test]
    fn correlation_symmetric_and_bounded(universe in arb_universe()) {
        let table = join(&universe);
        let m = correlation_matrix(&table, ReturnKind::Simple, None);

        prop_assert_eq!(m.len(), universe.len());
        prop_assert!(m.is_symmetric(1e-12));
        for i in 0..m.len() {
            for j in 0..m.len() {
                if let Some(v) = m.get(i, j) {
                    prop_assert!((-1.0..=1.0).contains(&v));
                }
            }
        }
    }

    #[test]
    fn diagonal_is_one_exactly_when_data_exists(universe in arb_universe()) {
        let table = join(&universe);
        let m = correlation_matrix(&table, ReturnKind::Simple, None);

        for (i, (_, values)) in table.select(ReturnKind::Simple).iter().enumerate() {
            let has_data = values.iter().any(|v| v.is_some());
            prop_assert_eq!(m.get(i, i), has_data.then_some(1.0));
        }
    }
}

// ── 4. Projection ────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn projection_keeps_every_instrument(
        universe in prop::collection::vec(arb_offsets(), 3..6),
        seed in any::<u64>(),
    ) {
        let table = join(&universe);
        let m = correlation_matrix(&table, ReturnKind::Simple, None);
        let config = ProjectionConfig {
            perplexity: 1.5,
            max_iter: 300,
            ..ProjectionConfig::with_seed(seed)
        };
        let result = project(&m, &config).unwrap();

        prop_assert_eq!(result.table.symbols(), m.symbols());
        prop_assert!(result.table.coords().iter().all(|c| c[0].is_finite() && c[1].is_finite()));
    }
}
