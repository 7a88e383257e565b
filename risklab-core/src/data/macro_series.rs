//! Macro source adapter: fetches the configured economic series one by one.
//!
//! Series publish at different frequencies (daily yields, weekly NFCI,
//! monthly credit), so each column is forward-filled over its own gaps.

use super::provider::{AdapterReport, DataError, FetchFailure, SeriesProvider};
use crate::table::SeriesTable;
use chrono::{Duration, NaiveDate};
use std::sync::Arc;

pub struct MacroAdapter {
    provider: Arc<dyn SeriesProvider>,
    series: Vec<String>,
    lookback_days: i64,
}

impl MacroAdapter {
    pub fn new(provider: Arc<dyn SeriesProvider>, series: Vec<String>, lookback_days: i64) -> Self {
        Self {
            provider,
            series,
            lookback_days,
        }
    }

    /// Fetch every configured series over the lookback window ending at `today`.
    pub fn fetch(&self, today: NaiveDate) -> AdapterReport {
        let start = today - Duration::days(self.lookback_days);
        tracing::info!(
            provider = self.provider.name(),
            series = self.series.len(),
            %start,
            "fetching macro series"
        );

        let mut fetched = Vec::new();
        let mut failures = Vec::new();
        for code in &self.series {
            let result = self
                .provider
                .fetch_series(code, start)
                .map(|mut observations| {
                    observations.retain(|o| o.date <= today);
                    observations
                });
            match result {
                Ok(observations) if !observations.is_empty() => {
                    fetched.push((code.clone(), observations));
                }
                Ok(_) => failures.push(FetchFailure {
                    id: code.clone(),
                    error: DataError::NoData {
                        series: code.clone(),
                    },
                }),
                Err(error) => {
                    tracing::warn!(code, %error, "macro fetch failed");
                    failures.push(FetchFailure {
                        id: code.clone(),
                        error,
                    });
                }
            }
        }

        let table = match SeriesTable::from_observations(fetched) {
            Ok(table) => table.forward_fill().drop_empty_columns(),
            Err(e) => {
                tracing::error!(error = %e, "could not assemble macro table");
                SeriesTable::empty()
            }
        };

        AdapterReport {
            table,
            requested: self.series.len(),
            failures,
        }
    }
}
