//! Derived-series indicators computed over a `SeriesTable`.
//!
//! Both indicators are pure: they return a new table and never touch the
//! input.

pub mod credit_ratio;
pub mod zscore;

pub use credit_ratio::{add_credit_ratio, CreditRatioSpec};
pub use zscore::{column_stats, zscore_column, zscore_of, zscore_table, ColumnStats};
