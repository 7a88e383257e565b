//! Risk configuration: symbol groups, macro series, model weights, cache and
//! fetch settings.
//!
//! Stored as TOML. Every section has defaults, so a file only needs the
//! settings it changes. `validate` runs before any pipeline is built, and a
//! failure there is the only fatal error in the system.

use crate::indicators::CreditRatioSpec;
use crate::scoring::{RecessionModel, StressModel};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Column name reserved for the date index in the cache file.
pub const RESERVED_COLUMN: &str = "date";

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("read config file {path}: {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("parse config TOML: {0}")]
    Parse(String),

    #[error("serialize config TOML: {0}")]
    Serialize(String),

    #[error("no symbol groups configured")]
    NoGroups,

    #[error("group name must not be empty")]
    EmptyGroupName,

    #[error("duplicate group '{0}'")]
    DuplicateGroup(String),

    #[error("group '{group}' has no symbols")]
    EmptyGroup { group: String },

    #[error("group '{group}': invalid symbol '{symbol}'")]
    InvalidSymbol { group: String, symbol: String },

    #[error("group '{group}': duplicate symbol '{symbol}'")]
    DuplicateSymbol { group: String, symbol: String },

    #[error("group '{group}': unknown derived column '{column}'")]
    UnknownDerivedColumn { group: String, column: String },

    #[error("invalid macro series code '{0}'")]
    InvalidSeriesCode(String),

    #[error("duplicate macro series code '{0}'")]
    DuplicateSeriesCode(String),

    #[error("column '{0}' is configured as both a market symbol and a macro series or derived column")]
    ColumnCollision(String),

    #[error("stress input '{0}' is not a configured symbol, macro series or derived column")]
    UnknownStressInput(String),

    #[error("duplicate stress input '{0}'")]
    DuplicateStressInput(String),

    #[error("invalid setting {name}: {reason}")]
    InvalidSetting { name: String, reason: String },
}

/// A named, ordered set of market symbols shown together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolGroup {
    pub name: String,
    pub symbols: Vec<String>,
    /// Computed columns displayed with the group (e.g. the credit ratio).
    #[serde(default)]
    pub derived: Vec<String>,
}

impl SymbolGroup {
    pub fn new(name: &str, symbols: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
            derived: Vec::new(),
        }
    }

    pub fn with_derived(mut self, column: &str) -> Self {
        self.derived.push(column.to_string());
        self
    }

    /// Symbols followed by derived columns.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.symbols
            .iter()
            .chain(self.derived.iter())
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub path: PathBuf,
    pub ttl_secs: u64,
    /// Serve a fresh cache entry without fetching.
    pub read_through: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/risk_cache.parquet"),
            ttl_secs: 3600,
            read_through: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub workers: usize,
    pub market_lookback_days: i64,
    pub macro_lookback_days: i64,
    pub breaker_cooldown_secs: u64,
    /// Falls back to the `FRED_API_KEY` environment variable.
    pub fred_api_key: Option<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_retries: 3,
            retry_base_delay_ms: 500,
            workers: 8,
            market_lookback_days: 365,
            macro_lookback_days: 365,
            breaker_cooldown_secs: 30 * 60,
            fred_api_key: None,
        }
    }
}

/// The complete configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Seconds between refreshes for long-running consumers.
    pub refresh_interval_secs: u64,
    pub macro_series: Vec<String>,
    pub fetch: FetchConfig,
    pub cache: CacheConfig,
    pub credit_ratio: CreditRatioSpec,
    pub stress: StressModel,
    pub recession: RecessionModel,
    pub groups: Vec<SymbolGroup>,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 15 * 60,
            macro_series: ["BAMLH0A0HYM2", "NFCI", "TOTALSL", "DGS5", "DGS10", "DGS30"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            fetch: FetchConfig::default(),
            cache: CacheConfig::default(),
            credit_ratio: CreditRatioSpec::default(),
            stress: StressModel::default(),
            recession: RecessionModel::default(),
            groups: vec![
                SymbolGroup::new("Volatility", &["^VIX", "^VIX3M", "^VIX6M", "^VXN", "^SKEW"]),
                SymbolGroup::new("Credit Risk", &["HYG", "JNK", "LQD"]).with_derived("HYG/LQD"),
                SymbolGroup::new("Treasury Yields", &["^FVX", "^TNX", "^TYX"]),
                SymbolGroup::new("Liquidity", &["UUP", "SHY", "IEI"]),
                SymbolGroup::new("Global Risk", &["EEM"]),
            ],
        }
    }
}

fn valid_symbol(symbol: &str) -> bool {
    !symbol.is_empty()
        && symbol == symbol.trim()
        && symbol != RESERVED_COLUMN
        && !symbol.chars().any(|c| c.is_whitespace() || c == '/')
}

fn valid_series_code(code: &str) -> bool {
    !code.is_empty() && code.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn positive(name: &str, ok: bool) -> Result<(), ConfigError> {
    if ok {
        Ok(())
    } else {
        Err(ConfigError::InvalidSetting {
            name: name.to_string(),
            reason: "must be positive".into(),
        })
    }
}

impl RiskConfig {
    /// Load, parse and validate a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: RiskConfig =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))
    }

    /// Every market symbol across all groups, first occurrence order.
    pub fn all_symbols(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.groups
            .iter()
            .flat_map(|g| g.symbols.iter())
            .filter(|s| seen.insert(s.as_str()))
            .cloned()
            .collect()
    }

    pub fn group(&self, name: &str) -> Option<&SymbolGroup> {
        self.groups.iter().find(|g| g.name == name)
    }

    pub fn group_names(&self) -> Vec<&str> {
        self.groups.iter().map(|g| g.name.as_str()).collect()
    }

    /// The configured key, else `FRED_API_KEY` from the environment.
    pub fn fred_api_key(&self) -> Option<String> {
        self.fetch
            .fred_api_key
            .clone()
            .or_else(|| std::env::var("FRED_API_KEY").ok())
            .filter(|k| !k.trim().is_empty())
    }

    /// Pause between refreshes in `risklab watch`.
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.groups.is_empty() {
            return Err(ConfigError::NoGroups);
        }

        let mut group_names = HashSet::new();
        let mut market: HashSet<&str> = HashSet::new();
        for group in &self.groups {
            if group.name.trim().is_empty() {
                return Err(ConfigError::EmptyGroupName);
            }
            if !group_names.insert(group.name.as_str()) {
                return Err(ConfigError::DuplicateGroup(group.name.clone()));
            }
            if group.symbols.is_empty() {
                return Err(ConfigError::EmptyGroup {
                    group: group.name.clone(),
                });
            }
            let mut in_group = HashSet::new();
            for symbol in &group.symbols {
                if !valid_symbol(symbol) {
                    return Err(ConfigError::InvalidSymbol {
                        group: group.name.clone(),
                        symbol: symbol.clone(),
                    });
                }
                if !in_group.insert(symbol.as_str()) {
                    return Err(ConfigError::DuplicateSymbol {
                        group: group.name.clone(),
                        symbol: symbol.clone(),
                    });
                }
                market.insert(symbol);
            }
            for column in &group.derived {
                if *column != self.credit_ratio.column {
                    return Err(ConfigError::UnknownDerivedColumn {
                        group: group.name.clone(),
                        column: column.clone(),
                    });
                }
            }
        }

        let mut macros = HashSet::new();
        for code in &self.macro_series {
            if !valid_series_code(code) {
                return Err(ConfigError::InvalidSeriesCode(code.clone()));
            }
            if !macros.insert(code.as_str()) {
                return Err(ConfigError::DuplicateSeriesCode(code.clone()));
            }
            if market.contains(code.as_str()) {
                return Err(ConfigError::ColumnCollision(code.clone()));
            }
        }

        let ratio = self.credit_ratio.column.as_str();
        if ratio.is_empty() || ratio == RESERVED_COLUMN {
            return Err(ConfigError::InvalidSetting {
                name: "credit_ratio.column".into(),
                reason: format!("'{ratio}' is not a usable column name"),
            });
        }
        if market.contains(ratio) || macros.contains(ratio) {
            return Err(ConfigError::ColumnCollision(ratio.to_string()));
        }

        let mut stress_inputs = HashSet::new();
        for input in &self.stress.inputs {
            let column = input.column.as_str();
            if !(market.contains(column) || macros.contains(column) || column == ratio) {
                return Err(ConfigError::UnknownStressInput(input.column.clone()));
            }
            if !stress_inputs.insert(column) {
                return Err(ConfigError::DuplicateStressInput(input.column.clone()));
            }
            if !input.weight.is_finite() {
                return Err(ConfigError::InvalidSetting {
                    name: format!("stress weight for {column}"),
                    reason: "must be finite".into(),
                });
            }
        }
        if self.stress.inputs.is_empty() {
            return Err(ConfigError::InvalidSetting {
                name: "stress.inputs".into(),
                reason: "at least one input is required".into(),
            });
        }
        let bands = self.stress.bands;
        if !(bands.normal <= bands.risk_off && bands.risk_off <= bands.severe) {
            return Err(ConfigError::InvalidSetting {
                name: "stress.bands".into(),
                reason: "band edges must be ascending".into(),
            });
        }

        for code in self.recession.series.codes() {
            if !valid_series_code(code) {
                return Err(ConfigError::InvalidSeriesCode(code.to_string()));
            }
        }
        if self.recession.valuation_fallback.len() < 2 {
            return Err(ConfigError::InvalidSetting {
                name: "recession.valuation_fallback".into(),
                reason: "needs at least two values".into(),
            });
        }

        positive("refresh_interval_secs", self.refresh_interval_secs > 0)?;
        positive("cache.ttl_secs", self.cache.ttl_secs > 0)?;
        positive("fetch.workers", self.fetch.workers > 0)?;
        positive("fetch.timeout_secs", self.fetch.timeout_secs > 0)?;
        positive("fetch.market_lookback_days", self.fetch.market_lookback_days > 0)?;
        positive("fetch.macro_lookback_days", self.fetch.macro_lookback_days > 0)?;
        positive("recession.unemployment_lag", self.recession.unemployment_lag > 0)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = RiskConfig::default();
        config.validate().unwrap();
        assert_eq!(config.groups.len(), 5);
        assert_eq!(config.all_symbols().len(), 15);
        assert_eq!(
            config.group("Credit Risk").unwrap().columns().collect::<Vec<_>>(),
            vec!["HYG", "JNK", "LQD", "HYG/LQD"]
        );
    }

    #[test]
    fn toml_roundtrip_of_defaults() {
        let config = RiskConfig::default();
        let text = config.to_toml().unwrap();
        let parsed = RiskConfig::from_toml(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn partial_file_uses_defaults() {
        let text = r#"
            macro_series = ["NFCI"]

            [cache]
            ttl_secs = 60
        "#;
        let config = RiskConfig::from_toml(text).unwrap();
        assert_eq!(config.cache.ttl_secs, 60);
        assert_eq!(config.cache.path, CacheConfig::default().path);
        assert_eq!(config.macro_series, vec!["NFCI"]);
        assert_eq!(config.groups.len(), 5);
    }

    #[test]
    fn rejects_malformed_toml() {
        assert!(matches!(
            RiskConfig::from_toml("groups = 3"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn validation_failures() {
        let mut c = RiskConfig::default();
        c.groups.push(SymbolGroup::new("Volatility", &["X"]));
        assert_eq!(c.validate(), Err(ConfigError::DuplicateGroup("Volatility".into())));

        let mut c = RiskConfig::default();
        c.groups[0].symbols.push("^VIX".into());
        assert!(matches!(c.validate(), Err(ConfigError::DuplicateSymbol { .. })));

        let mut c = RiskConfig::default();
        c.groups[4].symbols.push(" EEM".into());
        assert!(matches!(c.validate(), Err(ConfigError::InvalidSymbol { .. })));

        let mut c = RiskConfig::default();
        c.macro_series.push("DGS-10".into());
        assert_eq!(c.validate(), Err(ConfigError::InvalidSeriesCode("DGS-10".into())));

        let mut c = RiskConfig::default();
        c.macro_series.push("UUP".into());
        assert_eq!(c.validate(), Err(ConfigError::ColumnCollision("UUP".into())));

        let mut c = RiskConfig::default();
        c.groups.retain(|g| g.name != "Global Risk");
        assert_eq!(c.validate(), Err(ConfigError::UnknownStressInput("EEM".into())));

        let mut c = RiskConfig::default();
        c.cache.ttl_secs = 0;
        assert!(matches!(c.validate(), Err(ConfigError::InvalidSetting { .. })));

        let mut c = RiskConfig::default();
        c.refresh_interval_secs = 0;
        assert_eq!(
            c.validate(),
            Err(ConfigError::InvalidSetting {
                name: "refresh_interval_secs".into(),
                reason: "must be positive".into(),
            })
        );

        let mut c = RiskConfig::default();
        c.fetch.workers = 0;
        assert!(matches!(c.validate(), Err(ConfigError::InvalidSetting { .. })));

        let mut c = RiskConfig::default();
        c.groups[0].derived.push("VIX/VIX3M".into());
        assert!(matches!(c.validate(), Err(ConfigError::UnknownDerivedColumn { .. })));
    }

    #[test]
    fn macro_series_may_feed_stress() {
        let mut c = RiskConfig::default();
        c.stress.inputs.push(crate::scoring::StressInput::new("NFCI", 0.1));
        c.validate().unwrap();
    }
}
