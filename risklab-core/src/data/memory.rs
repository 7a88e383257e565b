//! In-memory providers for offline runs and tests.
//!
//! Both providers serve pre-loaded data and can be told to fail for
//! particular ids, or to behave as if the upstream were unreachable.

use super::provider::{
    DataError, PriceBar, PriceHistory, PriceProvider, SeriesProvider,
};
use crate::table::Observation;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Price provider backed by a map of symbol to observations.
#[derive(Debug, Default)]
pub struct StaticPriceProvider {
    histories: HashMap<String, (Vec<PriceBar>, bool)>,
    aliases: HashMap<String, String>,
    failures: HashMap<String, DataError>,
    offline: AtomicBool,
    calls: AtomicUsize,
}

impl StaticPriceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `observations` as adjusted closes for `symbol`.
    pub fn with_adjusted(mut self, symbol: &str, observations: &[Observation]) -> Self {
        let bars = observations
            .iter()
            .map(|o| PriceBar {
                date: o.date,
                close: Some(o.value),
                adj_close: Some(o.value),
            })
            .collect();
        self.histories.insert(symbol.to_string(), (bars, true));
        self
    }

    /// Serve raw bars for `symbol`.
    pub fn with_bars(mut self, symbol: &str, bars: Vec<PriceBar>, adjusted_available: bool) -> Self {
        self.histories
            .insert(symbol.to_string(), (bars, adjusted_available));
        self
    }

    /// Answer requests for `requested` with the history stored under `returned`.
    pub fn with_alias(mut self, requested: &str, returned: &str) -> Self {
        self.aliases
            .insert(requested.to_string(), returned.to_string());
        self
    }

    pub fn with_failure(mut self, symbol: &str, error: DataError) -> Self {
        self.failures.insert(symbol.to_string(), error);
        self
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of `fetch_history` calls served so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl PriceProvider for StaticPriceProvider {
    fn name(&self) -> &str {
        "static_prices"
    }

    fn fetch_history(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<PriceHistory, DataError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(DataError::NetworkUnreachable("offline".into()));
        }
        if let Some(err) = self.failures.get(symbol) {
            return Err(err.clone());
        }

        let key = self.aliases.get(symbol).map(String::as_str).unwrap_or(symbol);
        let (bars, adjusted_available) =
            self.histories
                .get(key)
                .ok_or_else(|| DataError::SymbolNotFound {
                    symbol: symbol.to_string(),
                })?;

        Ok(PriceHistory {
            symbol: key.to_string(),
            bars: bars
                .iter()
                .filter(|b| b.date >= start && b.date <= end)
                .copied()
                .collect(),
            adjusted_available: *adjusted_available,
        })
    }

    fn is_available(&self) -> bool {
        !self.offline.load(Ordering::SeqCst)
    }
}

/// Series provider backed by a map of series code to observations.
#[derive(Debug, Default)]
pub struct StaticSeriesProvider {
    series: HashMap<String, Vec<Observation>>,
    failures: HashMap<String, DataError>,
    offline: AtomicBool,
}

impl StaticSeriesProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_series(mut self, code: &str, observations: Vec<Observation>) -> Self {
        self.series.insert(code.to_string(), observations);
        self
    }

    pub fn with_failure(mut self, code: &str, error: DataError) -> Self {
        self.failures.insert(code.to_string(), error);
        self
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }
}

impl SeriesProvider for StaticSeriesProvider {
    fn name(&self) -> &str {
        "static_series"
    }

    fn fetch_series(&self, code: &str, start: NaiveDate) -> Result<Vec<Observation>, DataError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(DataError::NetworkUnreachable("offline".into()));
        }
        if let Some(err) = self.failures.get(code) {
            return Err(err.clone());
        }
        let observations: Vec<Observation> = self
            .series
            .get(code)
            .ok_or_else(|| DataError::SymbolNotFound {
                symbol: code.to_string(),
            })?
            .iter()
            .filter(|o| o.date >= start)
            .copied()
            .collect();
        if observations.is_empty() {
            return Err(DataError::NoData {
                series: code.to_string(),
            });
        }
        Ok(observations)
    }

    fn is_available(&self) -> bool {
        !self.offline.load(Ordering::SeqCst)
    }
}
