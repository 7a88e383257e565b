//! Data acquisition: providers, source adapters, merge and cache.

pub mod cache;
pub mod circuit_breaker;
pub mod fred;
pub mod macro_series;
pub mod market;
pub mod memory;
pub mod merge;
pub mod provider;
pub mod retry;
pub mod yahoo;

pub use cache::{CacheEntryInfo, MemoryTableCache, ParquetTableCache, TableStore};
pub use circuit_breaker::CircuitBreaker;
pub use fred::FredProvider;
pub use macro_series::MacroAdapter;
pub use market::MarketAdapter;
pub use memory::{StaticPriceProvider, StaticSeriesProvider};
pub use merge::merge_tables;
pub use provider::{
    AdapterReport, DataError, FetchFailure, PriceBar, PriceHistory, PriceProvider,
    SeriesProvider,
};
pub use retry::RetryPolicy;
pub use yahoo::YahooProvider;
