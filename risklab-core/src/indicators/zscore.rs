//! Full-window z-score normalization.
//!
//! Each column is standardized against its own mean and sample standard
//! deviation (n − 1 denominator) over the whole table. Missing cells are
//! excluded from the statistics and stay missing in the output. A column
//! with fewer than two observations, or zero spread, has no z-score.

use crate::table::SeriesTable;

/// Mean and sample standard deviation of the non-missing values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColumnStats {
    pub count: usize,
    pub mean: f64,
    pub std: f64,
}

/// `None` when there are fewer than two values or the spread is zero or
/// not finite.
pub fn column_stats(values: &[Option<f64>]) -> Option<ColumnStats> {
    let present: Vec<f64> = values.iter().flatten().copied().collect();
    stats_of(&present)
}

fn stats_of(values: &[f64]) -> Option<ColumnStats> {
    let count = values.len();
    if count < 2 || values.iter().all(|v| *v == values[0]) {
        return None;
    }
    let mean = values.iter().sum::<f64>() / count as f64;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (count - 1) as f64;
    let std = var.sqrt();
    // rounding in the mean leaves a residual spread on near-flat columns
    if !std.is_finite() || !mean.is_finite() || std <= f64::EPSILON * mean.abs().max(1.0) {
        return None;
    }
    Some(ColumnStats { count, mean, std })
}

pub fn zscore_column(values: &[Option<f64>]) -> Vec<Option<f64>> {
    match column_stats(values) {
        Some(stats) => values
            .iter()
            .map(|v| v.map(|x| (x - stats.mean) / stats.std))
            .collect(),
        None => vec![None; values.len()],
    }
}

/// Z-score every column. The result has the same shape as the input.
pub fn zscore_table(table: &SeriesTable) -> SeriesTable {
    table.map_columns(zscore_column)
}

/// Z-score of `current` against the distribution of `history`.
pub fn zscore_of(history: &[f64], current: f64) -> Option<f64> {
    let stats = stats_of(history)?;
    let z = (current - stats.mean) / stats.std;
    z.is_finite().then_some(z)
}
