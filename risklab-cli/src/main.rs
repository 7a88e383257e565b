//! RiskLab CLI: refresh, scoring, group and cache commands.
//!
//! Commands:
//! - `refresh`: fetch, merge and cache the market and macro table
//! - `watch`: refresh on the configured interval and print one line per round
//! - `score`: print the composite stress score, optionally export CSV
//! - `group` / `groups`: one symbol group's levels and z-scores
//! - `recession`: recession probability and factor breakdown
//! - `cache status` / `cache clear`: inspect or drop the cached table
//! - `config init` / `config check`: write or validate a TOML config

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use risklab_core::data::{DataError, FetchFailure};
use risklab_core::scoring::{RecessionOutcome, StressScore, ValuationSource};
use risklab_core::{DataOrigin, GroupView, RiskConfig, RiskPipeline, RiskSnapshot};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CONFIG: &str = "risklab.toml";

#[derive(Parser)]
#[command(name = "risklab", about = "RiskLab CLI: market stress and recession monitor")]
struct Cli {
    /// Path to a TOML config file. Defaults to ./risklab.toml when present,
    /// else the built-in configuration.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch market and macro data, merge, cache and summarize.
    Refresh {
        /// Print the snapshot summary as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Refresh repeatedly, pausing `refresh_interval_secs` between rounds.
    Watch {
        /// Override the configured interval, in seconds.
        #[arg(long)]
        interval: Option<u64>,

        /// Stop after this many refreshes.
        #[arg(long)]
        iterations: Option<u64>,
    },
    /// Print the composite stress score.
    Score {
        /// Also write the full score series to this CSV file.
        #[arg(long)]
        csv: Option<PathBuf>,
    },
    /// Show one symbol group's latest levels and z-scores.
    Group {
        /// Group name, e.g. "Credit Risk".
        name: String,
    },
    /// List the configured symbol groups.
    Groups,
    /// Compute the recession probability from long macro histories.
    Recession,
    /// Cache management commands.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Configuration commands.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Report age, freshness and shape of the cached table.
    Status,
    /// Delete the cached table and its metadata.
    Clear,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write the default configuration as TOML.
    Init {
        /// Output path.
        #[arg(long, default_value = DEFAULT_CONFIG)]
        path: PathBuf,

        /// Overwrite an existing file.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Parse and validate the configuration.
    Check,
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Refresh { json } => run_refresh(&pipeline(config_path)?, json),
        Commands::Watch {
            interval,
            iterations,
        } => run_watch(&pipeline(config_path)?, interval, iterations),
        Commands::Score { csv } => run_score(&pipeline(config_path)?, csv.as_deref()),
        Commands::Group { name } => run_group(&pipeline(config_path)?, &name),
        Commands::Groups => run_groups(&load_config(config_path)?),
        Commands::Recession => run_recession(&pipeline(config_path)?),
        Commands::Cache { action } => match action {
            CacheAction::Status => run_cache_status(&pipeline(config_path)?),
            CacheAction::Clear => run_cache_clear(&pipeline(config_path)?),
        },
        Commands::Config { action } => match action {
            ConfigAction::Init { path, force } => run_config_init(&path, force),
            ConfigAction::Check => run_config_check(config_path),
        },
    }
}

/// INFO by default, overridable through `RUST_LOG`. Logs go to stderr so
/// command output stays pipeable.
fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::filter::EnvFilter::builder()
                .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .compact()
        .init()
}

fn load_config(path: Option<&Path>) -> Result<RiskConfig> {
    match path {
        Some(path) => Ok(RiskConfig::from_file(path)?),
        None if Path::new(DEFAULT_CONFIG).exists() => {
            Ok(RiskConfig::from_file(Path::new(DEFAULT_CONFIG))?)
        }
        None => Ok(RiskConfig::default()),
    }
}

fn pipeline(config_path: Option<&Path>) -> Result<RiskPipeline> {
    Ok(RiskPipeline::from_config(load_config(config_path)?)?)
}

// ── Refresh / score ──────────────────────────────────────────────────

fn run_refresh(pipeline: &RiskPipeline, json: bool) -> Result<()> {
    let snapshot = pipeline.refresh();

    if json {
        let summary = serde_json::json!({
            "as_of": snapshot.as_of,
            "origin": snapshot.origin,
            "rows": snapshot.merged.height(),
            "first_date": snapshot.merged.first_date(),
            "last_date": snapshot.merged.last_date(),
            "columns": snapshot.merged.column_names().collect::<Vec<_>>(),
            "failures": snapshot
                .failures
                .iter()
                .map(|f| serde_json::json!({ "id": f.id, "error": f.error.to_string() }))
                .collect::<Vec<_>>(),
            "stress": snapshot
                .stress
                .series()
                .and_then(|s| s.summary(&pipeline.config().stress)),
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    print_origin(&snapshot);
    if snapshot.origin == DataOrigin::Unavailable {
        return Ok(());
    }
    if let (Some(first), Some(last)) = (snapshot.merged.first_date(), snapshot.merged.last_date())
    {
        println!(
            "Table:   {} columns, {} rows ({first} to {last})",
            snapshot.merged.width(),
            snapshot.merged.height()
        );
    }
    println!();
    println!("{:<14} {:>12} {:>9}", "Column", "Latest", "Z-score");
    println!("{}", "-".repeat(37));
    for name in snapshot.merged.column_names() {
        println!(
            "{:<14} {:>12} {:>9}",
            name,
            format_opt(snapshot.merged.latest(name), 4),
            format_opt(snapshot.zscores.latest(name), 2)
        );
    }
    println!();
    print_stress(&snapshot, pipeline);
    Ok(())
}

fn watch_interval(config: &RiskConfig, override_secs: Option<u64>) -> Result<Duration> {
    match override_secs {
        Some(0) => bail!("--interval must be positive"),
        Some(secs) => Ok(Duration::from_secs(secs)),
        None => Ok(config.refresh_interval()),
    }
}

fn run_watch(pipeline: &RiskPipeline, interval: Option<u64>, iterations: Option<u64>) -> Result<()> {
    let interval = watch_interval(pipeline.config(), interval)?;
    tracing::info!(interval_secs = interval.as_secs(), ?iterations, "watching");

    let mut round = 0u64;
    loop {
        round += 1;
        let snapshot = pipeline.refresh();
        println!("{}", watch_line(&snapshot, pipeline));
        if iterations.is_some_and(|n| round >= n) {
            return Ok(());
        }
        std::thread::sleep(interval);
    }
}

fn watch_line(snapshot: &RiskSnapshot, pipeline: &RiskPipeline) -> String {
    let origin = match snapshot.origin {
        DataOrigin::Live => "live",
        DataOrigin::Cache => "cache",
        DataOrigin::Unavailable => "unavailable",
    };
    let stress = snapshot
        .stress
        .series()
        .and_then(|s| s.summary(&pipeline.config().stress))
        .map(|s| format!("{:.1} ({})", s.current, s.regime.label()))
        .unwrap_or_else(|| "-".into());
    format!(
        "{} {origin:<11} rows={:<5} failures={:<3} stress={stress}",
        snapshot.as_of.format("%Y-%m-%d %H:%M:%S"),
        snapshot.merged.height(),
        snapshot.failures.len()
    )
}

fn run_score(pipeline: &RiskPipeline, csv_path: Option<&Path>) -> Result<()> {
    let snapshot = pipeline.refresh();
    print_origin(&snapshot);
    print_stress(&snapshot, pipeline);

    let Some(path) = csv_path else {
        return Ok(());
    };
    let Some(series) = snapshot.stress.series() else {
        bail!("no stress score to export");
    };
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("create {}", path.display()))?;
    writer.write_record(["date", "stress_score"])?;
    for (date, value) in series.iter() {
        writer.write_record([date.to_string(), format!("{value:.4}")])?;
    }
    writer.flush()?;
    println!("Score series written to: {}", path.display());
    Ok(())
}

fn print_origin(snapshot: &RiskSnapshot) {
    match snapshot.origin {
        DataOrigin::Live => println!("Source:  live ({})", snapshot.as_of.format("%Y-%m-%d %H:%M UTC")),
        DataOrigin::Cache => println!("Source:  cache (live providers returned nothing usable)"),
        DataOrigin::Unavailable => {
            println!("No data: providers unreachable and no fresh cache entry.")
        }
    }
    print_failures(&snapshot.failures);
}

fn print_failures(failures: &[FetchFailure]) {
    if failures.is_empty() {
        return;
    }
    if failures.iter().all(|f| f.error.is_provider_unavailable()) {
        println!("WARNING: provider unavailable for {} request(s)", failures.len());
    }
    for failure in failures {
        let kind = match failure.error {
            DataError::SymbolNotFound { .. } | DataError::NoData { .. } => "no data",
            ref e if e.is_provider_unavailable() => "unavailable",
            _ => "error",
        };
        println!("  {:<14} {kind}: {}", failure.id, failure.error);
    }
}

fn print_stress(snapshot: &RiskSnapshot, pipeline: &RiskPipeline) {
    match &snapshot.stress {
        StressScore::Available(series) => {
            let Some(summary) = series.summary(&pipeline.config().stress) else {
                return;
            };
            println!("=== Stress Score ===");
            println!("Date:     {}", summary.date);
            println!("Current:  {:.1} ({})", summary.current, summary.regime.label());
            println!("Mean:     {:.1}", summary.mean);
            println!("Delta:    {:+.1}", summary.delta);
            println!("Days:     {}", series.len());
        }
        StressScore::Unavailable(reason) => {
            println!("Stress score unavailable: {reason}");
        }
    }
}

// ── Groups ───────────────────────────────────────────────────────────

fn run_groups(config: &RiskConfig) -> Result<()> {
    for group in &config.groups {
        println!("{:<18} {}", group.name, group.columns().collect::<Vec<_>>().join(", "));
    }
    Ok(())
}

fn run_group(pipeline: &RiskPipeline, name: &str) -> Result<()> {
    if pipeline.config().group(name).is_none() {
        bail!(
            "unknown group '{name}'. Valid: {}",
            pipeline.config().group_names().join(", ")
        );
    }
    let snapshot = pipeline.refresh();
    print_origin(&snapshot);

    match pipeline.group_view(&snapshot, name) {
        Some(GroupView::Data {
            group,
            levels,
            zscores,
            missing,
        }) => {
            println!();
            println!("=== {group} ===");
            if let (Some(first), Some(last)) = (levels.first_date(), levels.last_date()) {
                println!("Window:   {first} to {last} ({} days)", levels.height());
            }
            println!("{:<14} {:>12} {:>9}", "Column", "Latest", "Z-score");
            println!("{}", "-".repeat(37));
            for column in levels.column_names() {
                println!(
                    "{:<14} {:>12} {:>9}",
                    column,
                    format_opt(levels.latest(column), 4),
                    format_opt(zscores.latest(column), 2)
                );
            }
            if !missing.is_empty() {
                println!("No data for: {}", missing.join(", "));
            }
        }
        Some(GroupView::NoData { group }) => {
            println!("{group}: no data for requested symbols");
        }
        None => bail!("unknown group '{name}'"),
    }
    Ok(())
}

// ── Recession ────────────────────────────────────────────────────────

fn run_recession(pipeline: &RiskPipeline) -> Result<()> {
    match pipeline.recession() {
        RecessionOutcome::Available(result) => {
            println!("=== Recession Probability ===");
            println!("Probability: {:.1}%", result.probability * 100.0);
            if result.valuation_source == ValuationSource::Fallback {
                println!("WARNING: valuation uses fallback values");
            }
            println!();
            println!("{:<20} {:>9} {:>12}", "Factor", "Z-score", "Coefficient");
            println!("{}", "-".repeat(43));
            let model = &pipeline.config().recession;
            for (factor, z) in result.factors() {
                println!(
                    "{:<20} {:>9.2} {:>12.2}",
                    factor.label(),
                    z,
                    model.coefficient(factor)
                );
            }
        }
        RecessionOutcome::Unavailable { reason } => {
            println!("Recession probability unavailable: {reason}");
        }
    }
    Ok(())
}

// ── Cache ────────────────────────────────────────────────────────────

fn run_cache_status(pipeline: &RiskPipeline) -> Result<()> {
    let path = &pipeline.config().cache.path;
    let Some(info) = pipeline.cache().entry_info() else {
        println!("Cache is empty: {}", path.display());
        return Ok(());
    };

    println!("Cache:    {}", path.display());
    println!("Saved:    {}", info.saved_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!(
        "Age:      {} ({})",
        format_age(info.age_secs),
        if info.fresh { "fresh" } else { "expired" }
    );
    if let Some(rows) = info.rows {
        println!("Rows:     {rows}");
    }
    if !info.columns.is_empty() {
        println!("Columns:  {}", info.columns.join(", "));
    }
    Ok(())
}

fn run_cache_clear(pipeline: &RiskPipeline) -> Result<()> {
    pipeline.cache().clear()?;
    println!("Cache cleared: {}", pipeline.config().cache.path.display());
    Ok(())
}

// ── Config ───────────────────────────────────────────────────────────

fn run_config_init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (pass --force to overwrite)", path.display());
    }
    let toml = RiskConfig::default().to_toml()?;
    std::fs::write(path, toml).with_context(|| format!("write {}", path.display()))?;
    println!("Default configuration written to: {}", path.display());
    Ok(())
}

fn run_config_check(path: Option<&Path>) -> Result<()> {
    let config = load_config(path)?;
    println!("Configuration OK");
    println!("Groups:        {}", config.groups.len());
    println!("Symbols:       {}", config.all_symbols().len());
    println!("Macro series:  {}", config.macro_series.len());
    println!("Stress inputs: {}", config.stress.inputs.len());
    println!(
        "FRED API key:  {}",
        if config.fred_api_key().is_some() { "set" } else { "not set (CSV endpoint)" }
    );
    Ok(())
}

// ── Formatting ───────────────────────────────────────────────────────

fn format_opt(value: Option<f64>, decimals: usize) -> String {
    match value {
        Some(v) => format!("{v:.decimals$}"),
        None => "-".into(),
    }
}

fn format_age(secs: i64) -> String {
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_global_config_after_subcommand() {
        let cli = Cli::try_parse_from(["risklab", "group", "Credit Risk", "--config", "x.toml"])
            .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("x.toml")));
        assert!(matches!(cli.command, Commands::Group { ref name } if name == "Credit Risk"));
    }

    #[test]
    fn watch_interval_comes_from_config_unless_overridden() {
        let mut config = RiskConfig::default();
        config.refresh_interval_secs = 120;
        assert_eq!(watch_interval(&config, None).unwrap(), Duration::from_secs(120));
        assert_eq!(watch_interval(&config, Some(5)).unwrap(), Duration::from_secs(5));
        assert!(watch_interval(&config, Some(0)).is_err());
    }

    #[test]
    fn parses_watch_options() {
        let cli = Cli::try_parse_from(["risklab", "watch", "--iterations", "2"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Watch { interval: None, iterations: Some(2) }
        ));
        assert!(Cli::try_parse_from(["risklab", "watch", "--interval", "soon"]).is_err());
    }

    #[test]
    fn formats_ages_and_missing_values() {
        assert_eq!(format_age(42), "42s");
        assert_eq!(format_age(600), "10m");
        assert_eq!(format_age(3 * 3600 + 120), "3h 2m");
        assert_eq!(format_opt(None, 2), "-");
        assert_eq!(format_opt(Some(1.23456), 2), "1.23");
    }
}
