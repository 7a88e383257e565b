//! RiskLab Core: market-risk pipeline.
//!
//! This crate contains:
//! - `SeriesTable`, the date-indexed table every stage exchanges
//! - Price and macro-series providers (Yahoo Finance, FRED) with retry and
//!   circuit breaking
//! - Source adapters, the daily merge layer and the TTL cache
//! - Indicators (z-scores, credit ratio)
//! - The composite stress score and the recession probability model
//! - `RiskPipeline`, which wires them together

pub mod clock;
pub mod config;
pub mod data;
pub mod indicators;
pub mod pipeline;
pub mod scoring;
pub mod table;

pub use config::{ConfigError, RiskConfig, SymbolGroup};
pub use pipeline::{DataOrigin, GroupView, PipelineError, Providers, RiskPipeline, RiskSnapshot};
pub use table::{Observation, SeriesTable, TableError};

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: pipeline types can cross threads, so a consumer
    /// can refresh on a worker and render elsewhere.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<SeriesTable>();
        require_sync::<SeriesTable>();
        require_send::<RiskSnapshot>();
        require_sync::<RiskSnapshot>();
        require_send::<GroupView>();
        require_sync::<GroupView>();
        require_send::<scoring::RecessionOutcome>();
        require_sync::<scoring::RecessionOutcome>();
        require_send::<RiskConfig>();
        require_sync::<RiskConfig>();

        require_send::<RiskPipeline>();
        require_sync::<RiskPipeline>();
        require_send::<data::ParquetTableCache>();
        require_sync::<data::ParquetTableCache>();
        require_send::<data::YahooProvider>();
        require_sync::<data::YahooProvider>();
        require_send::<data::FredProvider>();
        require_sync::<data::FredProvider>();
        require_send::<data::CircuitBreaker>();
        require_sync::<data::CircuitBreaker>();
    }

    /// The provider and cache seams are object-safe.
    #[test]
    fn seams_are_object_safe() {
        fn _prices(_: &dyn data::PriceProvider) {}
        fn _series(_: &dyn data::SeriesProvider) {}
        fn _store(_: &dyn data::TableStore) {}
        fn _clock(_: &dyn clock::Clock) {}
    }
}
