//! Recession probability.
//!
//! Logistic model over six standardized factors:
//!
//! ```text
//! p = 1 / (1 + e^-(b0 + b1·z_curve + b2·z_hy + b3·z_unemp + b4·z_val + b5·z_struct + b6·z_ret)).
//! ```
//!
//! Four factors come from long macro histories (1990 onward): the 10y−3m
//! yield-curve spread, the high-yield OAS, the 12-month change in
//! unemployment and a valuation multiple. Each is the z-score of its latest
//! reading against its full history. The structural-fragility and
//! retiree-wealth factors have no data source yet and are fixed placeholder
//! values carried with a provenance note.

use crate::data::provider::{DataError, SeriesProvider};
use crate::indicators::zscore_of;
use crate::table::Observation;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A factor value with no live source, and where it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceholderFactor {
    pub value: f64,
    pub provenance: String,
}

/// Series codes the model reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecessionSeries {
    pub ten_year: String,
    pub three_month: String,
    pub high_yield: String,
    pub unemployment: String,
    pub valuation: String,
}

impl Default for RecessionSeries {
    fn default() -> Self {
        Self {
            ten_year: "DGS10".into(),
            three_month: "DGS3MO".into(),
            high_yield: "BAMLH0A0HYM2".into(),
            unemployment: "UNRATE".into(),
            valuation: "CAPE".into(),
        }
    }
}

impl RecessionSeries {
    pub fn codes(&self) -> [&str; 5] {
        [
            self.ten_year.as_str(),
            self.three_month.as_str(),
            self.high_yield.as_str(),
            self.unemployment.as_str(),
            self.valuation.as_str(),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecessionModel {
    pub intercept: f64,
    pub yield_curve: f64,
    pub high_yield: f64,
    pub unemployment_change: f64,
    pub valuation: f64,
    pub structural: f64,
    pub retiree: f64,
    /// Months between the two unemployment readings being differenced.
    pub unemployment_lag: usize,
    pub history_start: NaiveDate,
    /// Yearly valuation readings used when the live series is unavailable.
    pub valuation_fallback: Vec<f64>,
    pub valuation_fallback_start: NaiveDate,
    pub series: RecessionSeries,
    pub structural_placeholder: PlaceholderFactor,
    pub retiree_placeholder: PlaceholderFactor,
}

impl Default for RecessionModel {
    fn default() -> Self {
        Self {
            intercept: -1.0,
            yield_curve: -0.45,
            high_yield: 0.35,
            unemployment_change: 0.30,
            valuation: 0.25,
            structural: 0.20,
            retiree: 0.20,
            unemployment_lag: 12,
            history_start: NaiveDate::from_ymd_opt(1990, 1, 1).unwrap_or_default(),
            valuation_fallback: vec![22.0, 25.0, 30.0, 35.0, 38.0, 40.0],
            valuation_fallback_start: NaiveDate::from_ymd_opt(2019, 1, 1).unwrap_or_default(),
            series: RecessionSeries::default(),
            structural_placeholder: PlaceholderFactor {
                value: 1.0,
                provenance: "placeholder: no structural-fragility source".into(),
            },
            retiree_placeholder: PlaceholderFactor {
                value: 1.0,
                provenance: "placeholder: no retiree-wealth source".into(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RecessionFactor {
    YieldCurve,
    HighYieldSpread,
    UnemploymentChange,
    Valuation,
    StructuralFragility,
    RetireeWealth,
}

impl RecessionFactor {
    pub const ALL: [RecessionFactor; 6] = [
        RecessionFactor::YieldCurve,
        RecessionFactor::HighYieldSpread,
        RecessionFactor::UnemploymentChange,
        RecessionFactor::Valuation,
        RecessionFactor::StructuralFragility,
        RecessionFactor::RetireeWealth,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            RecessionFactor::YieldCurve => "Yield Curve",
            RecessionFactor::HighYieldSpread => "HY Spread",
            RecessionFactor::UnemploymentChange => "Unemployment Δ12M",
            RecessionFactor::Valuation => "CAPE",
            RecessionFactor::StructuralFragility => "Structural",
            RecessionFactor::RetireeWealth => "Retiree Wealth",
        }
    }
}

/// Standardized factor values.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct FactorScores {
    pub yield_curve: f64,
    pub high_yield: f64,
    pub unemployment_change: f64,
    pub valuation: f64,
    pub structural: f64,
    pub retiree: f64,
}

impl FactorScores {
    pub fn get(&self, factor: RecessionFactor) -> f64 {
        match factor {
            RecessionFactor::YieldCurve => self.yield_curve,
            RecessionFactor::HighYieldSpread => self.high_yield,
            RecessionFactor::UnemploymentChange => self.unemployment_change,
            RecessionFactor::Valuation => self.valuation,
            RecessionFactor::StructuralFragility => self.structural,
            RecessionFactor::RetireeWealth => self.retiree,
        }
    }
}

pub fn logistic(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

impl RecessionModel {
    pub fn coefficient(&self, factor: RecessionFactor) -> f64 {
        match factor {
            RecessionFactor::YieldCurve => self.yield_curve,
            RecessionFactor::HighYieldSpread => self.high_yield,
            RecessionFactor::UnemploymentChange => self.unemployment_change,
            RecessionFactor::Valuation => self.valuation,
            RecessionFactor::StructuralFragility => self.structural,
            RecessionFactor::RetireeWealth => self.retiree,
        }
    }

    pub fn linear_predictor(&self, z: &FactorScores) -> f64 {
        RecessionFactor::ALL
            .iter()
            .fold(self.intercept, |acc, f| acc + self.coefficient(*f) * z.get(*f))
    }

    pub fn predict(&self, z: &FactorScores) -> f64 {
        logistic(self.linear_predictor(z))
    }

    /// Fallback valuation history: one reading per year from the fallback start.
    pub fn fallback_valuation(&self) -> Vec<Observation> {
        let start = self.valuation_fallback_start;
        self.valuation_fallback
            .iter()
            .enumerate()
            .filter_map(|(i, value)| {
                NaiveDate::from_ymd_opt(start.year() + i as i32, start.month(), start.day())
                    .map(|date| Observation::new(date, *value))
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ValuationSource {
    Live,
    Fallback,
}

/// Raw histories the model scores.
#[derive(Debug, Clone)]
pub struct RecessionInputs {
    pub ten_year: Vec<Observation>,
    pub three_month: Vec<Observation>,
    pub high_yield: Vec<Observation>,
    pub unemployment: Vec<Observation>,
    pub valuation: Vec<Observation>,
    pub valuation_source: ValuationSource,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecessionResult {
    pub probability: f64,
    pub scores: FactorScores,
    pub valuation_source: ValuationSource,
    /// 10y − 3m on dates where both are published.
    pub yield_curve_spread: Vec<Observation>,
    pub high_yield: Vec<Observation>,
    pub unemployment: Vec<Observation>,
    pub valuation: Vec<Observation>,
}

impl RecessionResult {
    pub fn factors(&self) -> impl Iterator<Item = (RecessionFactor, f64)> + '_ {
        RecessionFactor::ALL
            .iter()
            .map(move |f| (*f, self.scores.get(*f)))
    }
}

#[derive(Debug, Clone, Serialize)]
pub enum RecessionOutcome {
    Available(RecessionResult),
    Unavailable { reason: String },
}

/// Inner join of two series on date, returning `a − b`.
pub fn yield_curve_spread(ten_year: &[Observation], three_month: &[Observation]) -> Vec<Observation> {
    let short: BTreeMap<NaiveDate, f64> = three_month.iter().map(|o| (o.date, o.value)).collect();
    ten_year
        .iter()
        .filter_map(|o| short.get(&o.date).map(|s| Observation::new(o.date, o.value - s)))
        .collect()
}

/// Z-score of the latest value against the whole series.
fn latest_zscore(series: &[Observation]) -> Option<f64> {
    let values: Vec<f64> = series.iter().map(|o| o.value).collect();
    zscore_of(&values, *values.last()?)
}

/// Z-score of the latest `lag`-period change against all such changes.
fn change_zscore(levels: &[Observation], lag: usize) -> Option<f64> {
    if lag == 0 || levels.len() <= lag {
        return None;
    }
    let changes: Vec<f64> = levels.windows(lag + 1).map(|w| w[lag].value - w[0].value).collect();
    zscore_of(&changes, *changes.last()?)
}

pub fn compute_recession(inputs: &RecessionInputs, model: &RecessionModel) -> RecessionOutcome {
    let spread = yield_curve_spread(&inputs.ten_year, &inputs.three_month);

    let lag = model.unemployment_lag;
    if inputs.unemployment.len() <= lag {
        return RecessionOutcome::Unavailable {
            reason: format!(
                "need more than {lag} unemployment observations, have {}",
                inputs.unemployment.len()
            ),
        };
    }

    let factors = [
        ("yield curve", latest_zscore(&spread)),
        ("high-yield spread", latest_zscore(&inputs.high_yield)),
        ("unemployment change", change_zscore(&inputs.unemployment, lag)),
        ("valuation", latest_zscore(&inputs.valuation)),
    ];
    if let Some((name, _)) = factors.iter().find(|(_, z)| z.is_none()) {
        return RecessionOutcome::Unavailable {
            reason: format!("{name} factor has too little or flat history"),
        };
    }
    let [yield_curve, high_yield, unemployment_change, valuation] =
        factors.map(|(_, z)| z.unwrap_or_default());

    let scores = FactorScores {
        yield_curve,
        high_yield,
        unemployment_change,
        valuation,
        structural: model.structural_placeholder.value,
        retiree: model.retiree_placeholder.value,
    };
    let probability = model.predict(&scores);
    if !probability.is_finite() {
        return RecessionOutcome::Unavailable {
            reason: "probability is not finite".into(),
        };
    }

    tracing::info!(
        probability,
        valuation_source = ?inputs.valuation_source,
        "recession probability computed"
    );

    RecessionOutcome::Available(RecessionResult {
        probability,
        scores,
        valuation_source: inputs.valuation_source,
        yield_curve_spread: spread,
        high_yield: inputs.high_yield.clone(),
        unemployment: inputs.unemployment.clone(),
        valuation: inputs.valuation.clone(),
    })
}

/// Fetch the model's histories. Only the valuation series may fall back;
/// any other failure is returned with the code that failed.
pub fn fetch_recession_inputs(
    provider: &dyn SeriesProvider,
    model: &RecessionModel,
) -> Result<RecessionInputs, (String, DataError)> {
    let start = model.history_start;
    let fetch = |code: &str| {
        provider
            .fetch_series(code, start)
            .map_err(|e| (code.to_string(), e))
    };

    let ten_year = fetch(&model.series.ten_year)?;
    let three_month = fetch(&model.series.three_month)?;
    let high_yield = fetch(&model.series.high_yield)?;
    let unemployment = fetch(&model.series.unemployment)?;

    let (valuation, valuation_source) = match provider.fetch_series(&model.series.valuation, start) {
        Ok(series) if series.len() >= 2 => (series, ValuationSource::Live),
        Ok(_) => (model.fallback_valuation(), ValuationSource::Fallback),
        Err(error) => {
            tracing::warn!(
                code = %model.series.valuation,
                %error,
                "valuation series unavailable, using fallback history"
            );
            (model.fallback_valuation(), ValuationSource::Fallback)
        }
    };

    Ok(RecessionInputs {
        ten_year,
        three_month,
        high_yield,
        unemployment,
        valuation,
        valuation_source,
    })
}

/// Fetch and score in one step, folding fetch failures into `Unavailable`.
pub fn recession_outcome(provider: &dyn SeriesProvider, model: &RecessionModel) -> RecessionOutcome {
    match fetch_recession_inputs(provider, model) {
        Ok(inputs) => compute_recession(&inputs, model),
        Err((code, error)) => {
            tracing::warn!(code, %error, "recession inputs unavailable");
            RecessionOutcome::Unavailable {
                reason: format!("{code}: {error}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::memory::StaticSeriesProvider;

    fn monthly(values: &[f64]) -> Vec<Observation> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let date = NaiveDate::from_ymd_opt(2000 + (i / 12) as i32, (i % 12) as u32 + 1, 1)
                    .unwrap();
                Observation::new(date, *v)
            })
            .collect()
    }

    fn inputs() -> RecessionInputs {
        RecessionInputs {
            ten_year: monthly(&[4.0, 4.1, 4.2, 4.0, 3.9]),
            three_month: monthly(&[3.0, 3.5, 4.0, 4.5, 5.0]),
            high_yield: monthly(&[3.0, 3.2, 3.1, 3.8, 4.2]),
            unemployment: monthly(&(0..20).map(|i| 4.0 + 0.01 * (i * i) as f64).collect::<Vec<_>>()),
            valuation: monthly(&[22.0, 25.0, 30.0]),
            valuation_source: ValuationSource::Live,
        }
    }

    #[test]
    fn zero_factors_give_logistic_of_intercept() {
        let model = RecessionModel::default();
        let p = model.predict(&FactorScores::default());
        assert!((p - 1.0 / (1.0 + 1f64.exp())).abs() < 1e-12);
    }

    #[test]
    fn spread_is_inner_join() {
        let ten = monthly(&[4.0, 4.1, 4.2]);
        let three = monthly(&[3.0, 3.5]);
        let spread = yield_curve_spread(&ten, &three);
        assert_eq!(spread.len(), 2);
        assert!((spread[1].value - 0.6).abs() < 1e-12);
    }

    #[test]
    fn computes_with_placeholders() {
        let model = RecessionModel::default();
        match compute_recession(&inputs(), &model) {
            RecessionOutcome::Available(result) => {
                assert!(result.probability > 0.0 && result.probability < 1.0);
                assert_eq!(result.scores.structural, 1.0);
                assert_eq!(result.scores.retiree, 1.0);
                assert_eq!(result.factors().count(), 6);
                assert_eq!(result.yield_curve_spread.len(), 5);
            }
            RecessionOutcome::Unavailable { reason } => panic!("unavailable: {reason}"),
        }
    }

    #[test]
    fn short_unemployment_history_is_unavailable() {
        let mut short = inputs();
        short.unemployment = monthly(&[4.0; 12]);
        assert!(matches!(
            compute_recession(&short, &RecessionModel::default()),
            RecessionOutcome::Unavailable { .. }
        ));
    }

    #[test]
    fn flat_factor_is_unavailable() {
        let mut flat = inputs();
        flat.high_yield = monthly(&[3.0, 3.0, 3.0]);
        match compute_recession(&flat, &RecessionModel::default()) {
            RecessionOutcome::Unavailable { reason } => assert!(reason.contains("high-yield")),
            RecessionOutcome::Available(_) => panic!("expected unavailable"),
        }
    }

    #[test]
    fn valuation_falls_back_but_other_failures_do_not() {
        let i = inputs();
        let provider = StaticSeriesProvider::new()
            .with_series("DGS10", i.ten_year.clone())
            .with_series("DGS3MO", i.three_month.clone())
            .with_series("BAMLH0A0HYM2", i.high_yield.clone())
            .with_series("UNRATE", i.unemployment.clone());
        let model = RecessionModel::default();

        let fetched = fetch_recession_inputs(&provider, &model).unwrap();
        assert_eq!(fetched.valuation_source, ValuationSource::Fallback);
        assert_eq!(fetched.valuation.len(), 6);
        assert_eq!(
            fetched.valuation[5].date,
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
        );

        let provider = provider.with_failure("UNRATE", DataError::Timeout("slow".into()));
        match recession_outcome(&provider, &model) {
            RecessionOutcome::Unavailable { reason } => assert!(reason.starts_with("UNRATE")),
            RecessionOutcome::Available(_) => panic!("expected unavailable"),
        }
    }
}
