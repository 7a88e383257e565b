//! Provider traits and structured error types.
//!
//! `PriceProvider` (market prices) and `SeriesProvider` (macro series)
//! abstract over the upstream sources so adapters can be driven by
//! in-memory providers in tests. The cache sits above these traits:
//! providers don't know about it.

use crate::table::{Observation, SeriesTable};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Daily price point from a market provider.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub date: NaiveDate,
    pub close: Option<f64>,
    pub adj_close: Option<f64>,
}

/// Which price field an adapter ends up using for a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriceField {
    Adjusted,
    Close,
}

/// Price history for one symbol as returned by a provider.
#[derive(Debug, Clone)]
pub struct PriceHistory {
    /// Symbol the provider says this history belongs to.
    pub symbol: String,
    pub bars: Vec<PriceBar>,
    /// Whether the provider exposed an adjusted-close field at all.
    pub adjusted_available: bool,
}

impl PriceHistory {
    /// Field used for the series: adjusted close when the provider exposes
    /// it with at least one value, otherwise the unadjusted close.
    pub fn price_field(&self) -> PriceField {
        if self.adjusted_available && self.bars.iter().any(|b| b.adj_close.is_some()) {
            PriceField::Adjusted
        } else {
            PriceField::Close
        }
    }

    /// Dated values for the chosen price field, skipping missing and
    /// non-finite points.
    pub fn observations(&self) -> Vec<Observation> {
        let field = self.price_field();
        self.bars
            .iter()
            .filter_map(|bar| {
                let value = match field {
                    PriceField::Adjusted => bar.adj_close,
                    PriceField::Close => bar.close,
                }?;
                value.is_finite().then(|| Observation::new(bar.date, value))
            })
            .collect()
    }
}

/// Structured error types for data operations.
///
/// These are designed to be displayable in CLI output and logs.
#[derive(Debug, Clone, Error)]
pub enum DataError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("authentication required: {0}")]
    AuthenticationRequired(String),

    #[error("provider server error: HTTP {status} for {id}")]
    ServerError { status: u16, id: String },

    #[error("symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("no data returned for '{series}'")]
    NoData { series: String },

    #[error("hard stop: data provider has blocked requests (circuit breaker tripped)")]
    CircuitBreakerTripped,

    #[error("cache error: {0}")]
    CacheError(String),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("parquet I/O error: {0}")]
    ParquetError(String),

    #[error("data error: {0}")]
    Other(String),
}

impl DataError {
    /// The provider could not be reached or refused to serve, as opposed to
    /// answering with nothing for a particular id.
    pub fn is_provider_unavailable(&self) -> bool {
        matches!(
            self,
            DataError::NetworkUnreachable(_)
                | DataError::Timeout(_)
                | DataError::RateLimited { .. }
                | DataError::CircuitBreakerTripped
                | DataError::AuthenticationRequired(_)
                | DataError::ServerError { .. }
        )
    }

    /// The provider answered but had nothing usable for the id.
    pub fn is_no_data(&self) -> bool {
        matches!(
            self,
            DataError::SymbolNotFound { .. } | DataError::NoData { .. }
        )
    }
}

/// Trait for market price providers.
pub trait PriceProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Fetch daily prices for a symbol over an inclusive date range.
    fn fetch_history(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<PriceHistory, DataError>;

    /// Check if the provider is currently available (not rate-limited, not blocked).
    fn is_available(&self) -> bool;
}

/// Trait for macro-economic series providers.
pub trait SeriesProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Fetch all observations of a series from `start` onward, sorted by date.
    fn fetch_series(&self, code: &str, start: NaiveDate) -> Result<Vec<Observation>, DataError>;

    fn is_available(&self) -> bool;
}

/// A single symbol or series that could not be fetched.
#[derive(Debug, Clone)]
pub struct FetchFailure {
    pub id: String,
    pub error: DataError,
}

/// Outcome of one adapter run: the table of everything that succeeded plus
/// the per-id failures. A partial result is still a result.
#[derive(Debug, Clone)]
pub struct AdapterReport {
    pub table: SeriesTable,
    pub requested: usize,
    pub failures: Vec<FetchFailure>,
}

impl AdapterReport {
    pub fn succeeded(&self) -> usize {
        self.table.width()
    }

    /// Nothing usable came back for a non-empty request.
    pub fn is_total_failure(&self) -> bool {
        self.requested > 0 && self.table.is_empty()
    }

    /// Total failure where every failure was the provider being unreachable.
    pub fn is_provider_unavailable(&self) -> bool {
        self.is_total_failure()
            && !self.failures.is_empty()
            && self.failures.iter().all(|f| f.error.is_provider_unavailable())
    }
}
