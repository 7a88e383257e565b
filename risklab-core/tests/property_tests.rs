//! Property tests for table and indicator invariants.
//!
//! Uses proptest to verify:
//! 1. Z-scores keep shape and missing cells, and standardize present values
//! 2. The credit ratio is the element-wise quotient of its inputs
//! 3. An all-zero z-score row scores exactly the neutral level
//! 4. Reindexing and forward-filling produce a gap-free daily calendar

use chrono::{Duration, NaiveDate};
use proptest::prelude::*;
use risklab_core::data::merge_tables;
use risklab_core::indicators::{add_credit_ratio, column_stats, zscore_column, CreditRatioSpec};
use risklab_core::scoring::stress::NEUTRAL_SCORE;
use risklab_core::scoring::{compute_stress_score, StressModel};
use risklab_core::SeriesTable;

fn start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2023, 1, 2).unwrap()
}

fn calendar(n: usize) -> Vec<NaiveDate> {
    (0..n).map(|i| start() + Duration::days(i as i64)).collect()
}

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_cell() -> impl Strategy<Value = Option<f64>> {
    prop_oneof![
        1 => Just(None),
        4 => (-100.0..100.0_f64).prop_map(Some),
    ]
}

fn arb_column(max: usize) -> impl Strategy<Value = Vec<Option<f64>>> {
    prop::collection::vec(arb_cell(), 1..max)
}

fn arb_price() -> impl Strategy<Value = Option<f64>> {
    prop_oneof![
        1 => Just(None),
        5 => (10.0..500.0_f64).prop_map(Some),
    ]
}

/// Strictly ascending, possibly sparse dates.
fn arb_sparse_dates() -> impl Strategy<Value = Vec<NaiveDate>> {
    prop::collection::vec(1..5_i64, 1..30).prop_map(|gaps| {
        let mut date = start();
        gaps.into_iter()
            .map(|gap| {
                date += Duration::days(gap);
                date
            })
            .collect()
    })
}

// ── 1. Z-scores ──────────────────────────────────────────────────────

proptest! {
    #[test]
    fn zscore_preserves_shape_and_gaps(values in arb_column(60)) {
        let z = zscore_column(&values);
        prop_assert_eq!(z.len(), values.len());
        for (v, z) in values.iter().zip(&z) {
            if v.is_none() {
                prop_assert!(z.is_none());
            }
        }
    }

    #[test]
    fn zscore_standardizes_present_values(values in arb_column(60)) {
        let stats = column_stats(&values);
        prop_assume!(stats.map_or(false, |s| s.std > 1e-3));

        let z: Vec<f64> = zscore_column(&values).into_iter().flatten().collect();
        let n = z.len() as f64;
        let mean = z.iter().sum::<f64>() / n;
        let var = z.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0);

        prop_assert!(mean.abs() < 1e-7, "mean {}", mean);
        prop_assert!((var.sqrt() - 1.0).abs() < 1e-7, "std {}", var.sqrt());
    }

    #[test]
    fn zscore_of_constant_column_is_missing(value in -100..100_i32, n in 1..40_usize) {
        let z = zscore_column(&vec![Some(f64::from(value)); n]);
        prop_assert!(z.iter().all(Option::is_none));
    }

    #[test]
    fn zscore_of_fractional_constant_is_missing(value in -100.0..100.0_f64, n in 1..40_usize) {
        let z = zscore_column(&vec![Some(value); n]);
        prop_assert!(z.iter().all(Option::is_none));
    }
}

// ── 2. Credit ratio ──────────────────────────────────────────────────

proptest! {
    #[test]
    fn credit_ratio_is_element_wise(
        pairs in prop::collection::vec((arb_price(), arb_price()), 1..50)
    ) {
        let (hy, ig): (Vec<_>, Vec<_>) = pairs.into_iter().unzip();
        let table = SeriesTable::from_columns(
            calendar(hy.len()),
            [("HYG", hy.clone()), ("LQD", ig.clone())],
        )
        .unwrap();

        let enriched = add_credit_ratio(&table, &CreditRatioSpec::default());
        let ratio = enriched.column("HYG/LQD").unwrap();
        for i in 0..hy.len() {
            match (hy[i], ig[i]) {
                (Some(h), Some(l)) => prop_assert_eq!(ratio[i], Some(h / l)),
                _ => prop_assert_eq!(ratio[i], None),
            }
        }
        prop_assert_eq!(enriched.column("HYG"), table.column("HYG"));
    }
}

// ── 3. Stress score ──────────────────────────────────────────────────

proptest! {
    #[test]
    fn all_zero_rows_score_neutral(rows in 1..30_usize) {
        let model = StressModel::default();
        let table = SeriesTable::from_columns(
            calendar(rows),
            model.columns().map(|c| (c.to_string(), vec![Some(0.0); rows])),
        )
        .unwrap();

        let series = compute_stress_score(&table, &model);
        let series = series.series().unwrap();
        prop_assert_eq!(series.len(), rows);
        prop_assert!(series.values.iter().all(|v| *v == NEUTRAL_SCORE));
    }

    #[test]
    fn score_is_linear_in_each_input(z in -5.0..5.0_f64, which in 0..7_usize) {
        let model = StressModel::default();
        let table = SeriesTable::from_columns(
            calendar(1),
            model.columns().enumerate().map(|(i, c)| {
                let value = if i == which { z } else { 0.0 };
                (c.to_string(), vec![Some(value)])
            }),
        )
        .unwrap();

        let score = compute_stress_score(&table, &model);
        let expected = model.base + model.scale * model.inputs[which].weight * z;
        prop_assert!((score.series().unwrap().values[0] - expected).abs() < 1e-9);
    }
}

// ── 4. Calendar ──────────────────────────────────────────────────────

proptest! {
    #[test]
    fn merge_yields_gap_free_filled_calendar(
        market_dates in arb_sparse_dates(),
        macro_dates in arb_sparse_dates(),
    ) {
        let market = SeriesTable::from_columns(
            market_dates.clone(),
            [("M", market_dates.iter().map(|_| Some(1.0)).collect())],
        )
        .unwrap();
        let macro_table = SeriesTable::from_columns(
            macro_dates.clone(),
            [("X", (0..macro_dates.len()).map(|i| Some(i as f64)).collect())],
        )
        .unwrap();

        let merged = merge_tables(&market, &macro_table).unwrap();
        let dates = merged.dates();
        for pair in dates.windows(2) {
            prop_assert_eq!(pair[1] - pair[0], Duration::days(1));
        }
        prop_assert_eq!(dates.first().copied(), Some(market_dates[0].min(macro_dates[0])));

        // once a column has a value it never goes missing again
        for (_, column) in merged.columns() {
            let first = column.iter().position(Option::is_some);
            if let Some(first) = first {
                prop_assert!(column[first..].iter().all(Option::is_some));
            }
        }
    }
}
