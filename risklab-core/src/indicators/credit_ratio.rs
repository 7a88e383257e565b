//! High-yield over investment-grade price ratio (HYG/LQD by default).
//!
//! A falling ratio means junk bonds are underperforming quality credit.

use crate::table::SeriesTable;
use serde::{Deserialize, Serialize};

/// Which columns form the ratio and what the derived column is called.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreditRatioSpec {
    pub high_yield: String,
    pub investment_grade: String,
    pub column: String,
}

impl Default for CreditRatioSpec {
    fn default() -> Self {
        Self {
            high_yield: "HYG".into(),
            investment_grade: "LQD".into(),
            column: "HYG/LQD".into(),
        }
    }
}

/// Append the ratio column when both inputs are present.
///
/// Rows where either input is missing or the denominator is zero are missing
/// in the ratio. If an input column is absent, or the ratio column already
/// exists, the table is returned unchanged.
pub fn add_credit_ratio(table: &SeriesTable, spec: &CreditRatioSpec) -> SeriesTable {
    let (Some(hy), Some(ig)) = (
        table.column(&spec.high_yield),
        table.column(&spec.investment_grade),
    ) else {
        tracing::debug!(column = %spec.column, "credit ratio inputs absent, skipping");
        return table.clone();
    };

    let ratio: Vec<Option<f64>> = hy
        .iter()
        .zip(ig)
        .map(|(h, i)| match (h, i) {
            (Some(h), Some(i)) if *i != 0.0 => Some(h / i).filter(|r| r.is_finite()),
            _ => None,
        })
        .collect();

    match table.clone().with_column(spec.column.clone(), ratio) {
        Ok(enriched) => enriched,
        Err(e) => {
            tracing::debug!(error = %e, "credit ratio not added");
            table.clone()
        }
    }
}
