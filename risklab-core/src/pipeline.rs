//! Refresh pipeline: adapters → merge → cache → indicators → scores.
//!
//! `RiskPipeline::refresh` never fails. Degraded states are reported in the
//! snapshot instead: `origin` says whether the table is live, from the cache,
//! or unavailable; `failures` lists every symbol and series that could not
//! be fetched; `stress` is `Unavailable` when inputs are missing.

use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigError, RiskConfig, SymbolGroup};
use crate::data::cache::{ParquetTableCache, TableStore};
use crate::data::circuit_breaker::CircuitBreaker;
use crate::data::fred::FredProvider;
use crate::data::macro_series::MacroAdapter;
use crate::data::market::MarketAdapter;
use crate::data::merge::merge_tables;
use crate::data::provider::{DataError, FetchFailure, PriceProvider, SeriesProvider};
use crate::data::retry::RetryPolicy;
use crate::data::yahoo::YahooProvider;
use crate::indicators::{add_credit_ratio, zscore_table};
use crate::scoring::{compute_stress_score, recession_outcome, RecessionOutcome, StressScore};
use crate::table::SeriesTable;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("provider setup failed: {0}")]
    Provider(#[from] DataError),
}

/// The two upstream providers.
#[derive(Clone)]
pub struct Providers {
    pub prices: Arc<dyn PriceProvider>,
    pub series: Arc<dyn SeriesProvider>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DataOrigin {
    Live,
    Cache,
    Unavailable,
}

/// Everything one refresh produced.
#[derive(Debug, Clone)]
pub struct RiskSnapshot {
    /// Merged table with derived columns appended.
    pub merged: SeriesTable,
    /// Z-scores of `merged`, same shape.
    pub zscores: SeriesTable,
    pub stress: StressScore,
    pub origin: DataOrigin,
    pub failures: Vec<FetchFailure>,
    pub as_of: DateTime<Utc>,
}

/// One symbol group's slice of a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum GroupView {
    Data {
        group: String,
        /// Rows where every present column has a value.
        levels: SeriesTable,
        /// Z-scores computed over `levels` alone.
        zscores: SeriesTable,
        /// Configured columns that were not in the snapshot.
        missing: Vec<String>,
    },
    NoData {
        group: String,
    },
}

impl GroupView {
    pub fn group(&self) -> &str {
        match self {
            GroupView::Data { group, .. } | GroupView::NoData { group } => group,
        }
    }
}

/// Slice `merged` down to a group's columns.
///
/// Only dates where every present column has a value are kept, and the
/// z-scores are taken over that common window.
pub fn group_view(merged: &SeriesTable, group: &SymbolGroup) -> GroupView {
    let (present, missing): (Vec<&str>, Vec<&str>) =
        group.columns().partition(|c| merged.has_column(c));

    let levels = merged.select(&present).drop_incomplete_rows();
    if levels.is_empty() {
        return GroupView::NoData {
            group: group.name.clone(),
        };
    }

    GroupView::Data {
        group: group.name.clone(),
        zscores: zscore_table(&levels),
        levels,
        missing: missing.into_iter().map(String::from).collect(),
    }
}

pub struct RiskPipeline {
    config: RiskConfig,
    market: MarketAdapter,
    macro_adapter: MacroAdapter,
    series_provider: Arc<dyn SeriesProvider>,
    cache: Arc<dyn TableStore>,
    clock: Arc<dyn Clock>,
}

impl RiskPipeline {
    /// Validate `config` and wire the pipeline over explicit collaborators.
    pub fn new(
        config: RiskConfig,
        providers: Providers,
        cache: Arc<dyn TableStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let market = MarketAdapter::new(
            providers.prices,
            config.fetch.workers,
            config.fetch.market_lookback_days,
        );
        let macro_adapter = MacroAdapter::new(
            providers.series.clone(),
            config.macro_series.clone(),
            config.fetch.macro_lookback_days,
        );
        Ok(Self {
            config,
            market,
            macro_adapter,
            series_provider: providers.series,
            cache,
            clock,
        })
    }

    /// Yahoo + FRED providers, each with its own circuit breaker, and the
    /// Parquet cache at the configured path.
    pub fn from_config(config: RiskConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        let providers = http_providers(&config)?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let cache = Arc::new(ParquetTableCache::new(
            config.cache.path.clone(),
            Duration::from_secs(config.cache.ttl_secs),
            clock.clone(),
        ));
        Ok(Self::new(config, providers, cache, clock)?)
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    pub fn cache(&self) -> &dyn TableStore {
        self.cache.as_ref()
    }

    /// Fetch, merge, cache and score.
    pub fn refresh(&self) -> RiskSnapshot {
        let now = self.clock.now();

        if self.config.cache.read_through {
            if let Some(cached) = self.load_cached() {
                tracing::info!(rows = cached.height(), "serving fresh cache entry");
                return self.snapshot(cached, DataOrigin::Cache, Vec::new(), now);
            }
        }

        let today = now.date_naive();
        let market = self.market.fetch(&self.config.all_symbols(), today);
        let macros = self.macro_adapter.fetch(today);

        let mut failures = market.failures;
        failures.extend(macros.failures);

        let merged = match merge_tables(&market.table, &macros.table) {
            Ok(table) => table,
            Err(e) => {
                tracing::error!(error = %e, "merge failed");
                SeriesTable::empty()
            }
        };

        if !merged.is_empty() {
            if let Err(e) = self.cache.save(&merged) {
                tracing::warn!(error = %e, "cache write failed");
            }
            tracing::info!(
                columns = merged.width(),
                rows = merged.height(),
                failures = failures.len(),
                "refresh complete"
            );
            return self.snapshot(merged, DataOrigin::Live, failures, now);
        }

        if !failures.is_empty() {
            if let Some(cached) = self.load_cached() {
                tracing::warn!(
                    failures = failures.len(),
                    "live fetch returned nothing, serving cached table"
                );
                return self.snapshot(cached, DataOrigin::Cache, failures, now);
            }
        }

        tracing::warn!(failures = failures.len(), "no data available from any source");
        self.snapshot(SeriesTable::empty(), DataOrigin::Unavailable, failures, now)
    }

    /// `None` when no group has that name.
    pub fn group_view(&self, snapshot: &RiskSnapshot, name: &str) -> Option<GroupView> {
        let group = self.config.group(name)?;
        Some(group_view(&snapshot.merged, group))
    }

    /// Fetch the long histories and score the recession model.
    pub fn recession(&self) -> RecessionOutcome {
        recession_outcome(self.series_provider.as_ref(), &self.config.recession)
    }

    fn load_cached(&self) -> Option<SeriesTable> {
        match self.cache.load() {
            Ok(table) => table.filter(|t| !t.is_empty()),
            Err(e) => {
                tracing::warn!(error = %e, "cache read failed");
                None
            }
        }
    }

    fn snapshot(
        &self,
        merged: SeriesTable,
        origin: DataOrigin,
        failures: Vec<FetchFailure>,
        as_of: DateTime<Utc>,
    ) -> RiskSnapshot {
        let merged = add_credit_ratio(&merged, &self.config.credit_ratio);
        let zscores = zscore_table(&merged);
        let stress = compute_stress_score(&zscores, &self.config.stress);
        RiskSnapshot {
            merged,
            zscores,
            stress,
            origin,
            failures,
            as_of,
        }
    }
}

/// Build the HTTP providers described by `config`.
pub fn http_providers(config: &RiskConfig) -> Result<Providers, DataError> {
    let timeout = Duration::from_secs(config.fetch.timeout_secs);
    let retry = RetryPolicy {
        max_retries: config.fetch.max_retries,
        base_delay: Duration::from_millis(config.fetch.retry_base_delay_ms),
    };
    let cooldown = Duration::from_secs(config.fetch.breaker_cooldown_secs);

    let prices = YahooProvider::new(Arc::new(CircuitBreaker::new(cooldown)), timeout, retry)?;
    let series = FredProvider::new(
        config.fred_api_key(),
        Arc::new(CircuitBreaker::new(cooldown)),
        timeout,
        retry,
    )?;
    Ok(Providers {
        prices: Arc::new(prices),
        series: Arc::new(series),
    })
}
