//! Market source adapter: fetches a symbol universe concurrently and
//! normalizes it into one forward-filled `SeriesTable`.
//!
//! Per-symbol failures are collected into the report rather than failing
//! the batch. Fetches run on a private rayon pool so the worker count is
//! bounded regardless of the global pool.

use super::provider::{AdapterReport, DataError, FetchFailure, PriceProvider};
use crate::table::{Observation, SeriesTable};
use chrono::{Duration, NaiveDate};
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use std::collections::HashSet;
use std::sync::Arc;

pub struct MarketAdapter {
    provider: Arc<dyn PriceProvider>,
    workers: usize,
    lookback_days: i64,
}

impl MarketAdapter {
    pub fn new(provider: Arc<dyn PriceProvider>, workers: usize, lookback_days: i64) -> Self {
        Self {
            provider,
            workers: workers.max(1),
            lookback_days,
        }
    }

    /// Fetch the trailing lookback window ending at `today` for `symbols`.
    ///
    /// The table holds one column per symbol that returned usable data, in
    /// request order. Columns are forward-filled, and rows before the first
    /// observation of any symbol are dropped.
    pub fn fetch(&self, symbols: &[String], today: NaiveDate) -> AdapterReport {
        let mut seen = HashSet::new();
        let requested: Vec<&str> = symbols
            .iter()
            .map(String::as_str)
            .filter(|s| seen.insert(*s))
            .collect();
        let start = today - Duration::days(self.lookback_days);

        tracing::info!(
            provider = self.provider.name(),
            symbols = requested.len(),
            workers = self.workers,
            %start,
            %today,
            "fetching market history"
        );

        let results = self.fetch_all(&requested, start, today);

        let mut series = Vec::new();
        let mut failures = Vec::new();
        for (symbol, result) in results {
            match result {
                Ok(observations) => series.push((symbol, observations)),
                Err(error) => {
                    tracing::warn!(symbol, %error, "market fetch failed");
                    failures.push(FetchFailure { id: symbol, error });
                }
            }
        }

        let table = match SeriesTable::from_observations(series) {
            Ok(table) => table
                .forward_fill()
                .drop_empty_columns()
                .drop_empty_rows(),
            Err(e) => {
                tracing::error!(error = %e, "could not assemble market table");
                SeriesTable::empty()
            }
        };

        tracing::info!(
            succeeded = table.width(),
            failed = failures.len(),
            rows = table.height(),
            "market fetch complete"
        );

        AdapterReport {
            table,
            requested: requested.len(),
            failures,
        }
    }

    /// Results come back in request order.
    fn fetch_all(
        &self,
        symbols: &[&str],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Vec<(String, Result<Vec<Observation>, DataError>)> {
        let fetch = |symbol: &&str| (symbol.to_string(), self.fetch_one(symbol, start, end));

        if self.workers <= 1 || symbols.len() <= 1 {
            return symbols.iter().map(fetch).collect();
        }

        match ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(|i| format!("risklab-fetch-{i}"))
            .build()
        {
            Ok(pool) => pool.install(|| symbols.par_iter().map(fetch).collect()),
            Err(e) => {
                tracing::warn!(error = %e, "fetch pool unavailable, fetching sequentially");
                symbols.iter().map(fetch).collect()
            }
        }
    }

    fn fetch_one(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Observation>, DataError> {
        // Once the breaker is open, don't queue more requests against it.
        if !self.provider.is_available() {
            return Err(DataError::CircuitBreakerTripped);
        }

        let history = self.provider.fetch_history(symbol, start, end)?;

        if history.symbol != symbol {
            tracing::debug!(
                requested = symbol,
                returned = %history.symbol,
                "discarding data for unrequested symbol"
            );
            return Err(DataError::NoData {
                series: symbol.to_string(),
            });
        }

        let observations = history.observations();
        if observations.is_empty() {
            return Err(DataError::NoData {
                series: symbol.to_string(),
            });
        }
        Ok(observations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::memory::StaticPriceProvider;
    use crate::data::provider::PriceBar;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, day).unwrap()
    }

    fn obs(points: &[(u32, f64)]) -> Vec<Observation> {
        points.iter().map(|(day, v)| Observation::new(d(*day), *v)).collect()
    }

    fn symbols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn partial_success_keeps_successful_columns_in_order() {
        let provider = StaticPriceProvider::new()
            .with_adjusted("B", &obs(&[(1, 10.0), (2, 11.0)]))
            .with_adjusted("A", &obs(&[(2, 1.0), (3, 2.0)]));
        let adapter = MarketAdapter::new(Arc::new(provider), 4, 365);

        let report = adapter.fetch(&symbols(&["A", "B", "C"]), d(10));

        assert_eq!(report.requested, 3);
        assert_eq!(report.table.column_names().collect::<Vec<_>>(), vec!["A", "B"]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].id, "C");
        // B's d(3) gap is forward-filled, A's leading gap stays missing
        assert_eq!(report.table.column("B").unwrap(), &[Some(10.0), Some(11.0), Some(11.0)]);
        assert_eq!(report.table.column("A").unwrap()[0], None);
    }

    #[test]
    fn discards_unrequested_symbols() {
        let provider = StaticPriceProvider::new()
            .with_adjusted("HYG", &obs(&[(1, 80.0)]))
            .with_adjusted("JNK", &obs(&[(1, 90.0)]))
            .with_alias("HYG", "JNK");
        let adapter = MarketAdapter::new(Arc::new(provider), 2, 365);

        let report = adapter.fetch(&symbols(&["HYG"]), d(10));
        assert!(report.table.is_empty());
        assert!(!report.table.has_column("JNK"));
        assert!(report.failures[0].error.is_no_data());
    }

    #[test]
    fn unadjusted_fallback() {
        let bars = vec![PriceBar { date: d(1), close: Some(19.5), adj_close: None }];
        let provider = StaticPriceProvider::new().with_bars("^VIX", bars, false);
        let adapter = MarketAdapter::new(Arc::new(provider), 1, 365);

        let report = adapter.fetch(&symbols(&["^VIX"]), d(2));
        assert_eq!(report.table.latest("^VIX"), Some(19.5));
    }

    #[test]
    fn offline_provider_is_total_unavailability() {
        let provider = StaticPriceProvider::new().with_adjusted("A", &obs(&[(1, 1.0)]));
        provider.set_offline(true);
        let adapter = MarketAdapter::new(Arc::new(provider), 8, 365);

        let report = adapter.fetch(&symbols(&["A", "B"]), d(2));
        assert!(report.is_total_failure());
        assert!(report.is_provider_unavailable());
    }

    #[test]
    fn duplicate_requests_fetch_once() {
        let provider = Arc::new(StaticPriceProvider::new().with_adjusted("A", &obs(&[(1, 1.0)])));
        let adapter = MarketAdapter::new(provider.clone(), 2, 365);

        let report = adapter.fetch(&symbols(&["A", "A"]), d(2));
        assert_eq!(report.requested, 1);
        assert_eq!(provider.calls(), 1);
    }

    #[test]
    fn concurrent_matches_sequential() {
        let names: Vec<String> = (0..12).map(|i| format!("S{i}")).collect();
        let provider = names.iter().enumerate().fold(StaticPriceProvider::new(), |p, (i, name)| {
            p.with_adjusted(name, &obs(&[(1 + (i % 3) as u32, i as f64), (5, 2.0 * i as f64)]))
        });
        let provider: Arc<dyn PriceProvider> = Arc::new(provider);

        let sequential = MarketAdapter::new(provider.clone(), 1, 365).fetch(&names, d(10));
        let concurrent = MarketAdapter::new(provider, 8, 365).fetch(&names, d(10));

        assert_eq!(sequential.table, concurrent.table);
        assert_eq!(
            concurrent.table.column_names().collect::<Vec<_>>(),
            names.iter().map(String::as_str).collect::<Vec<_>>()
        );
    }

    #[test]
    fn lookback_window_bounds_history() {
        let provider = StaticPriceProvider::new().with_adjusted("A", &obs(&[(1, 1.0), (9, 2.0)]));
        let adapter = MarketAdapter::new(Arc::new(provider), 1, 3);

        let report = adapter.fetch(&symbols(&["A"]), d(10));
        assert_eq!(report.table.dates(), &[d(9)]);
    }
}
