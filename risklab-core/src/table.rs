//! Date-indexed, column-per-series table.
//!
//! `SeriesTable` is the unit of exchange between every pipeline stage:
//! adapters produce one, the merge layer joins two, the cache persists one,
//! and the indicator layer derives new ones from it.
//!
//! Invariants (checked by every constructor):
//! - dates are strictly increasing, so they are also unique
//! - column names are unique
//! - every column holds exactly one cell per date
//!
//! Missing observations are `None` until an explicit fill or drop step.
//! Every transform returns a new table.

use chrono::{Duration, NaiveDate};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

/// A single dated value as delivered by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub date: NaiveDate,
    pub value: f64,
}

impl Observation {
    pub fn new(date: NaiveDate, value: f64) -> Self {
        Self { date, value }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TableError {
    #[error("dates must be strictly increasing: {prev} followed by {next}")]
    UnorderedDates { prev: NaiveDate, next: NaiveDate },

    #[error("column '{name}' has {actual} cells, expected {expected}")]
    LengthMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("duplicate column '{0}'")]
    DuplicateColumn(String),
}

/// Date-indexed numeric table with one column per series.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SeriesTable {
    dates: Vec<NaiveDate>,
    columns: IndexMap<String, Vec<Option<f64>>>,
}

impl SeriesTable {
    /// Build a table, validating all invariants.
    pub fn new(
        dates: Vec<NaiveDate>,
        columns: IndexMap<String, Vec<Option<f64>>>,
    ) -> Result<Self, TableError> {
        for pair in dates.windows(2) {
            if pair[0] >= pair[1] {
                return Err(TableError::UnorderedDates {
                    prev: pair[0],
                    next: pair[1],
                });
            }
        }
        for (name, values) in &columns {
            if values.len() != dates.len() {
                return Err(TableError::LengthMismatch {
                    name: name.clone(),
                    expected: dates.len(),
                    actual: values.len(),
                });
            }
        }
        Ok(Self { dates, columns })
    }

    /// Build a table from `(name, cells)` pairs. Duplicate names are rejected.
    pub fn from_columns<I, S>(dates: Vec<NaiveDate>, columns: I) -> Result<Self, TableError>
    where
        I: IntoIterator<Item = (S, Vec<Option<f64>>)>,
        S: Into<String>,
    {
        let mut map = IndexMap::new();
        for (name, values) in columns {
            let name = name.into();
            if map.contains_key(&name) {
                return Err(TableError::DuplicateColumn(name));
            }
            map.insert(name, values);
        }
        Self::new(dates, map)
    }

    /// Build a table from per-series observation lists.
    ///
    /// The index is the union of all observation dates. A series that has no
    /// observation on a date gets `None` there. Non-finite values are treated
    /// as missing. When a series repeats a date the later observation wins.
    pub fn from_observations<I, S>(series: I) -> Result<Self, TableError>
    where
        I: IntoIterator<Item = (S, Vec<Observation>)>,
        S: Into<String>,
    {
        let series: Vec<(String, Vec<Observation>)> =
            series.into_iter().map(|(name, obs)| (name.into(), obs)).collect();

        let dates: Vec<NaiveDate> = series
            .iter()
            .flat_map(|(_, obs)| obs.iter().map(|o| o.date))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut columns = IndexMap::with_capacity(series.len());
        for (name, observations) in series {
            let mut values = vec![None; dates.len()];
            for obs in observations {
                if let Ok(i) = dates.binary_search(&obs.date) {
                    values[i] = obs.value.is_finite().then_some(obs.value);
                }
            }
            if columns.contains_key(&name) {
                return Err(TableError::DuplicateColumn(name));
            }
            columns.insert(name, values);
        }

        Ok(Self { dates, columns })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    /// Number of rows (dates).
    pub fn height(&self) -> usize {
        self.dates.len()
    }

    /// Number of columns.
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    /// A table is empty when it has no rows or no columns.
    pub fn is_empty(&self) -> bool {
        self.dates.is_empty() || self.columns.is_empty()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.dates.first().copied()
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.dates.last().copied()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn column(&self, name: &str) -> Option<&[Option<f64>]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &[Option<f64>])> {
        self.columns
            .iter()
            .map(|(name, values)| (name.as_str(), values.as_slice()))
    }

    /// Value of a column on a given date.
    pub fn value(&self, name: &str, date: NaiveDate) -> Option<f64> {
        let row = self.dates.binary_search(&date).ok()?;
        self.columns.get(name)?.get(row).copied().flatten()
    }

    /// Most recent non-missing value of a column.
    pub fn latest(&self, name: &str) -> Option<f64> {
        self.columns
            .get(name)?
            .iter()
            .rev()
            .find_map(|v| *v)
    }

    /// Append a column. The column must have one cell per date.
    pub fn with_column(
        mut self,
        name: impl Into<String>,
        values: Vec<Option<f64>>,
    ) -> Result<Self, TableError> {
        let name = name.into();
        if self.columns.contains_key(&name) {
            return Err(TableError::DuplicateColumn(name));
        }
        if values.len() != self.dates.len() {
            return Err(TableError::LengthMismatch {
                name,
                expected: self.dates.len(),
                actual: values.len(),
            });
        }
        self.columns.insert(name, values);
        Ok(self)
    }

    /// Keep only the named columns that exist, in the order requested.
    pub fn select(&self, names: &[&str]) -> SeriesTable {
        let mut columns = IndexMap::new();
        for name in names {
            if let Some(values) = self.columns.get(*name) {
                columns.insert((*name).to_string(), values.clone());
            }
        }
        SeriesTable {
            dates: self.dates.clone(),
            columns,
        }
    }

    /// Apply a same-length transform to every column independently.
    pub fn map_columns<F>(&self, f: F) -> SeriesTable
    where
        F: Fn(&[Option<f64>]) -> Vec<Option<f64>>,
    {
        let columns = self
            .columns
            .iter()
            .map(|(name, values)| {
                let mapped = f(values);
                debug_assert_eq!(mapped.len(), values.len());
                (name.clone(), mapped)
            })
            .collect();
        SeriesTable {
            dates: self.dates.clone(),
            columns,
        }
    }

    /// Carry the last seen value forward over gaps. Leading gaps stay missing.
    pub fn forward_fill(&self) -> SeriesTable {
        self.map_columns(|values| {
            let mut last = None;
            values
                .iter()
                .map(|v| {
                    if v.is_some() {
                        last = *v;
                    }
                    last
                })
                .collect()
        })
    }

    /// Drop columns with no observation at all.
    pub fn drop_empty_columns(&self) -> SeriesTable {
        let columns = self
            .columns
            .iter()
            .filter(|(_, values)| values.iter().any(Option::is_some))
            .map(|(name, values)| (name.clone(), values.clone()))
            .collect();
        SeriesTable {
            dates: self.dates.clone(),
            columns,
        }
    }

    /// Drop rows that are missing in every column.
    pub fn drop_empty_rows(&self) -> SeriesTable {
        let keep: Vec<bool> = (0..self.height())
            .map(|row| self.columns.values().any(|values| values[row].is_some()))
            .collect();
        self.filter_rows(&keep)
    }

    /// Drop rows that are missing in any column (all-or-nothing inclusion).
    pub fn drop_incomplete_rows(&self) -> SeriesTable {
        let keep: Vec<bool> = (0..self.height())
            .map(|row| self.columns.values().all(|values| values[row].is_some()))
            .collect();
        self.filter_rows(&keep)
    }

    /// Keep the trailing `days` calendar days ending at the last date.
    pub fn tail_days(&self, days: i64) -> SeriesTable {
        let Some(last) = self.last_date() else {
            return self.clone();
        };
        let cutoff = last - Duration::days(days);
        let keep: Vec<bool> = self.dates.iter().map(|d| *d > cutoff).collect();
        self.filter_rows(&keep)
    }

    /// Outer join on the union of both indexes. Column names must be disjoint.
    pub fn outer_join(&self, other: &SeriesTable) -> Result<SeriesTable, TableError> {
        if let Some(name) = other.columns.keys().find(|n| self.columns.contains_key(*n)) {
            return Err(TableError::DuplicateColumn(name.clone()));
        }

        let dates: Vec<NaiveDate> = self
            .dates
            .iter()
            .chain(other.dates.iter())
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut columns = IndexMap::with_capacity(self.width() + other.width());
        for table in [self, other] {
            for (name, values) in &table.columns {
                columns.insert(name.clone(), table.spread_onto(values, &dates));
            }
        }

        Ok(SeriesTable { dates, columns })
    }

    /// Reindex to a contiguous daily calendar from the first to the last date.
    /// Inserted dates are missing in every column.
    pub fn reindex_daily(&self) -> SeriesTable {
        let (Some(first), Some(last)) = (self.first_date(), self.last_date()) else {
            return self.clone();
        };
        let dates: Vec<NaiveDate> = first.iter_days().take_while(|d| *d <= last).collect();
        let columns = self
            .columns
            .iter()
            .map(|(name, values)| (name.clone(), self.spread_onto(values, &dates)))
            .collect();
        SeriesTable { dates, columns }
    }

    /// Place this table's cells for one column onto a superset index.
    fn spread_onto(&self, values: &[Option<f64>], dates: &[NaiveDate]) -> Vec<Option<f64>> {
        let mut out = vec![None; dates.len()];
        for (date, value) in self.dates.iter().zip(values) {
            if let Ok(i) = dates.binary_search(date) {
                out[i] = *value;
            }
        }
        out
    }

    fn filter_rows(&self, keep: &[bool]) -> SeriesTable {
        let dates = self
            .dates
            .iter()
            .zip(keep)
            .filter(|(_, k)| **k)
            .map(|(d, _)| *d)
            .collect();
        let columns = self
            .columns
            .iter()
            .map(|(name, values)| {
                let kept = values
                    .iter()
                    .zip(keep)
                    .filter(|(_, k)| **k)
                    .map(|(v, _)| *v)
                    .collect();
                (name.clone(), kept)
            })
            .collect();
        SeriesTable { dates, columns }
    }
}
