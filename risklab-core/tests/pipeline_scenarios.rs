//! End-to-end refresh scenarios over in-memory providers.

use chrono::{Duration as ChronoDuration, NaiveDate, TimeZone, Utc};
use risklab_core::clock::{Clock, ManualClock};
use risklab_core::data::{
    merge_tables, DataError, MemoryTableCache, ParquetTableCache, StaticPriceProvider,
    StaticSeriesProvider, TableStore,
};
use risklab_core::scoring::{StressInput, StressScore, StressUnavailable};
use risklab_core::{
    DataOrigin, GroupView, Observation, Providers, RiskConfig, RiskPipeline, SeriesTable,
    SymbolGroup,
};
use std::sync::Arc;
use std::time::Duration;

fn day(n: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, n).unwrap()
}

fn wave(offset: f64, amplitude: f64, days: u32) -> Vec<Observation> {
    (1..=days)
        .map(|n| Observation::new(day(n), offset + amplitude * (n as f64 * 0.7).sin()))
        .collect()
}

fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 30, 18, 0, 0).unwrap()))
}

fn abc_config() -> RiskConfig {
    let mut config = RiskConfig::default();
    config.groups = vec![
        SymbolGroup::new("Core", &["A", "B", "C"]),
        SymbolGroup::new("Orphan", &["C"]),
    ];
    config.macro_series = vec!["NFCI".into()];
    config.stress.inputs = vec![StressInput::new("A", 0.5), StressInput::new("B", 0.5)];
    config
}

struct Harness {
    prices: Arc<StaticPriceProvider>,
    series: Arc<StaticSeriesProvider>,
    clock: Arc<ManualClock>,
    pipeline: RiskPipeline,
}

fn harness(config: RiskConfig, cache: Option<Arc<dyn TableStore>>) -> Harness {
    let prices = Arc::new(
        StaticPriceProvider::new()
            .with_adjusted("A", &wave(100.0, 5.0, 29))
            .with_adjusted("B", &wave(50.0, 2.0, 29)),
    );
    let series = Arc::new(StaticSeriesProvider::new().with_series(
        "NFCI",
        vec![
            Observation::new(day(7), -0.45),
            Observation::new(day(14), -0.48),
            Observation::new(day(21), -0.44),
        ],
    ));
    let clock = clock();
    let cache: Arc<dyn TableStore> = match cache {
        Some(cache) => cache,
        None => Arc::new(MemoryTableCache::new(Duration::from_secs(3600), clock.clone())),
    };
    let pipeline = RiskPipeline::new(
        config,
        Providers {
            prices: prices.clone(),
            series: series.clone(),
        },
        cache,
        clock.clone(),
    )
    .unwrap();
    Harness {
        prices,
        series,
        clock,
        pipeline,
    }
}

#[test]
fn partial_symbols_yield_partial_table_and_degraded_group() {
    let h = harness(abc_config(), None);
    let snapshot = h.pipeline.refresh();

    assert_eq!(snapshot.origin, DataOrigin::Live);
    assert_eq!(
        snapshot.merged.column_names().collect::<Vec<_>>(),
        vec!["A", "B", "NFCI"]
    );
    assert_eq!(snapshot.failures.len(), 1);
    assert_eq!(snapshot.failures[0].id, "C");
    assert!(matches!(
        snapshot.failures[0].error,
        DataError::SymbolNotFound { .. }
    ));

    assert_eq!(snapshot.zscores.dates(), snapshot.merged.dates());
    assert!(snapshot.stress.is_available());

    assert_eq!(
        h.pipeline.group_view(&snapshot, "Orphan"),
        Some(GroupView::NoData {
            group: "Orphan".into()
        })
    );
    match h.pipeline.group_view(&snapshot, "Core").unwrap() {
        GroupView::Data { levels, missing, .. } => {
            assert_eq!(levels.column_names().collect::<Vec<_>>(), vec!["A", "B"]);
            assert_eq!(missing, vec!["C"]);
        }
        GroupView::NoData { .. } => panic!("Core should have data"),
    }
    assert!(h.pipeline.group_view(&snapshot, "Unknown").is_none());
}

#[test]
fn merged_calendar_is_daily_and_forward_filled() {
    let h = harness(abc_config(), None);
    let snapshot = h.pipeline.refresh();

    assert_eq!(snapshot.merged.first_date(), Some(day(1)));
    assert_eq!(snapshot.merged.last_date(), Some(day(29)));
    assert_eq!(snapshot.merged.height(), 29);
    // weekly series carried across the week
    assert_eq!(snapshot.merged.value("NFCI", day(10)), Some(-0.45));
    assert_eq!(snapshot.merged.value("NFCI", day(29)), Some(-0.44));
    assert_eq!(snapshot.merged.value("NFCI", day(3)), None);
}

#[test]
fn total_failure_falls_back_to_cache_until_ttl() {
    let h = harness(abc_config(), None);
    let live = h.pipeline.refresh();
    assert_eq!(live.origin, DataOrigin::Live);

    h.prices.set_offline(true);
    h.series.set_offline(true);
    h.clock.advance(ChronoDuration::minutes(20));

    let cached = h.pipeline.refresh();
    assert_eq!(cached.origin, DataOrigin::Cache);
    assert_eq!(cached.merged, live.merged);
    assert!(cached.failures.iter().all(|f| f.error.is_provider_unavailable()));
    assert_eq!(cached.stress, live.stress);

    h.clock.advance(ChronoDuration::hours(1));
    let gone = h.pipeline.refresh();
    assert_eq!(gone.origin, DataOrigin::Unavailable);
    assert!(gone.merged.is_empty());
    assert!(matches!(
        gone.stress,
        StressScore::Unavailable(StressUnavailable::MissingColumns(_))
    ));
}

#[test]
fn read_through_serves_fresh_cache_without_fetching() {
    let mut config = abc_config();
    config.cache.read_through = true;
    let h = harness(config, None);

    let first = h.pipeline.refresh();
    assert_eq!(first.origin, DataOrigin::Live);
    let calls = h.prices.calls();

    let second = h.pipeline.refresh();
    assert_eq!(second.origin, DataOrigin::Cache);
    assert_eq!(h.prices.calls(), calls);
    assert_eq!(second.merged, first.merged);
}

#[test]
fn parquet_cache_backs_the_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("risk.parquet");
    let clock = clock();
    let cache: Arc<dyn TableStore> = Arc::new(ParquetTableCache::new(
        &path,
        Duration::from_secs(3600),
        clock.clone(),
    ));

    let h = harness(abc_config(), Some(cache.clone()));
    let snapshot = h.pipeline.refresh();

    assert!(path.exists());
    let info = cache.entry_info().unwrap();
    assert!(info.fresh);
    assert_eq!(info.columns, vec!["A", "B", "NFCI"]);
    // the cache holds the merged table before derived columns
    let stored = cache.load().unwrap().unwrap();
    assert_eq!(stored.dates(), snapshot.merged.dates());
    assert_eq!(stored.column("A"), snapshot.merged.column("A"));
}

#[test]
fn credit_ratio_flows_into_default_stress_score() {
    let config = RiskConfig::default();
    let symbols = config.all_symbols();
    let prices = symbols
        .iter()
        .enumerate()
        .fold(StaticPriceProvider::new(), |p, (i, s)| {
            p.with_adjusted(s, &wave(20.0 + i as f64, 1.0 + i as f64 * 0.1, 29))
        });
    let clock = clock();
    let pipeline = RiskPipeline::new(
        config,
        Providers {
            prices: Arc::new(prices),
            series: Arc::new(StaticSeriesProvider::new()),
        },
        Arc::new(MemoryTableCache::new(Duration::from_secs(3600), clock.clone())),
        clock.clone(),
    )
    .unwrap();

    let snapshot = pipeline.refresh();
    assert_eq!(snapshot.origin, DataOrigin::Live);
    assert!(snapshot.merged.has_column("HYG/LQD"));
    // every macro series failed, market data still scores
    assert_eq!(snapshot.failures.len(), 6);
    let series = snapshot.stress.series().unwrap();
    assert_eq!(series.len(), 29);
    assert_eq!(clock.today(), day(30));

    match pipeline.group_view(&snapshot, "Credit Risk").unwrap() {
        GroupView::Data { levels, .. } => assert!(levels.has_column("HYG/LQD")),
        GroupView::NoData { .. } => panic!("expected credit data"),
    }
}

#[test]
fn merge_forward_fills_sparse_macro_dates() {
    let market = SeriesTable::from_observations([("M", wave(10.0, 1.0, 5))]).unwrap();
    let macro_table = SeriesTable::from_observations([(
        "X",
        vec![
            Observation::new(day(1), 1.0),
            Observation::new(day(3), 3.0),
            Observation::new(day(5), 5.0),
        ],
    )])
    .unwrap();

    let merged = merge_tables(&market, &macro_table).unwrap();
    assert_eq!(merged.dates(), &[day(1), day(2), day(3), day(4), day(5)]);
    assert_eq!(
        merged.column("X").unwrap(),
        &[Some(1.0), Some(1.0), Some(3.0), Some(3.0), Some(5.0)]
    );
}
