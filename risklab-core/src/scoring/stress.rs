//! Composite stress score.
//!
//! A fixed linear combination of z-scored inputs, rescaled around a neutral
//! level: `score = base + scale * Σ weight_i * z_i`. With the defaults a
//! reading of 50 is average stress and each unit of weighted z moves the
//! score by 10 points. Only rows where every input is present are scored.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::table::SeriesTable;

pub const VIX_WEIGHT: f64 = 0.30;
pub const VIX3M_WEIGHT: f64 = 0.15;
pub const VIX6M_WEIGHT: f64 = 0.10;
pub const CREDIT_RATIO_WEIGHT: f64 = 0.25;
pub const TEN_YEAR_WEIGHT: f64 = 0.15;
pub const DOLLAR_WEIGHT: f64 = 0.05;
/// Negative: emerging-market strength offsets stress.
pub const EMERGING_WEIGHT: f64 = -0.10;

pub const NEUTRAL_SCORE: f64 = 50.0;
pub const SCORE_SCALE: f64 = 10.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StressInput {
    pub column: String,
    pub weight: f64,
}

impl StressInput {
    pub fn new(column: impl Into<String>, weight: f64) -> Self {
        Self {
            column: column.into(),
            weight,
        }
    }
}

/// Lower bounds of the regime bands.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegimeBands {
    pub normal: f64,
    pub risk_off: f64,
    pub severe: f64,
}

impl Default for RegimeBands {
    fn default() -> Self {
        Self {
            normal: 40.0,
            risk_off: 55.0,
            severe: 70.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StressRegime {
    Calm,
    Normal,
    RiskOff,
    Severe,
}

impl StressRegime {
    pub fn label(&self) -> &'static str {
        match self {
            StressRegime::Calm => "Calm",
            StressRegime::Normal => "Normal",
            StressRegime::RiskOff => "Risk-off",
            StressRegime::Severe => "Severe",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StressModel {
    pub base: f64,
    pub scale: f64,
    pub bands: RegimeBands,
    pub inputs: Vec<StressInput>,
}

impl Default for StressModel {
    fn default() -> Self {
        Self {
            base: NEUTRAL_SCORE,
            scale: SCORE_SCALE,
            bands: RegimeBands::default(),
            inputs: vec![
                StressInput::new("^VIX", VIX_WEIGHT),
                StressInput::new("^VIX3M", VIX3M_WEIGHT),
                StressInput::new("^VIX6M", VIX6M_WEIGHT),
                StressInput::new("HYG/LQD", CREDIT_RATIO_WEIGHT),
                StressInput::new("^TNX", TEN_YEAR_WEIGHT),
                StressInput::new("UUP", DOLLAR_WEIGHT),
                StressInput::new("EEM", EMERGING_WEIGHT),
            ],
        }
    }
}

impl StressModel {
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.inputs.iter().map(|i| i.column.as_str())
    }

    pub fn regime(&self, score: f64) -> StressRegime {
        if score >= self.bands.severe {
            StressRegime::Severe
        } else if score >= self.bands.risk_off {
            StressRegime::RiskOff
        } else if score >= self.bands.normal {
            StressRegime::Normal
        } else {
            StressRegime::Calm
        }
    }
}

/// Dated score values, ascending by date.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreSeries {
    pub dates: Vec<NaiveDate>,
    pub values: Vec<f64>,
}

/// Headline numbers for display: the latest reading against the
/// series mean.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StressSummary {
    pub date: NaiveDate,
    pub current: f64,
    pub mean: f64,
    pub delta: f64,
    pub regime: StressRegime,
}

impl ScoreSeries {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn latest(&self) -> Option<(NaiveDate, f64)> {
        Some((*self.dates.last()?, *self.values.last()?))
    }

    pub fn mean(&self) -> Option<f64> {
        if self.values.is_empty() {
            return None;
        }
        Some(self.values.iter().sum::<f64>() / self.values.len() as f64)
    }

    pub fn summary(&self, model: &StressModel) -> Option<StressSummary> {
        let (date, current) = self.latest()?;
        let mean = self.mean()?;
        Some(StressSummary {
            date,
            current,
            mean,
            delta: current - mean,
            regime: model.regime(current),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (NaiveDate, f64)> + '_ {
        self.dates.iter().copied().zip(self.values.iter().copied())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum StressUnavailable {
    /// Required input columns are absent from the z-score table.
    MissingColumns(Vec<String>),
    /// All inputs exist but no single date has all of them.
    NoCompleteRows,
}

impl std::fmt::Display for StressUnavailable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StressUnavailable::MissingColumns(cols) => {
                write!(f, "missing inputs: {}", cols.join(", "))
            }
            StressUnavailable::NoCompleteRows => write!(f, "no date has every input"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum StressScore {
    Available(ScoreSeries),
    Unavailable(StressUnavailable),
}

impl StressScore {
    pub fn series(&self) -> Option<&ScoreSeries> {
        match self {
            StressScore::Available(series) => Some(series),
            StressScore::Unavailable(_) => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, StressScore::Available(_))
    }
}

/// Score every row of `zscores` that has all model inputs.
pub fn compute_stress_score(zscores: &SeriesTable, model: &StressModel) -> StressScore {
    let missing: Vec<String> = model
        .columns()
        .filter(|c| !zscores.has_column(c))
        .map(String::from)
        .collect();
    if !missing.is_empty() {
        tracing::info!(missing = ?missing, "stress score unavailable");
        return StressScore::Unavailable(StressUnavailable::MissingColumns(missing));
    }

    let weighted: Vec<(f64, &[Option<f64>])> = model
        .inputs
        .iter()
        .filter_map(|input| Some((input.weight, zscores.column(&input.column)?)))
        .collect();

    let mut dates = Vec::new();
    let mut values = Vec::new();
    for (row, date) in zscores.dates().iter().enumerate() {
        let combination: Option<f64> = weighted
            .iter()
            .map(|(weight, column)| column[row].map(|z| weight * z))
            .sum();
        if let Some(combination) = combination {
            dates.push(*date);
            values.push(model.base + model.scale * combination);
        }
    }

    if dates.is_empty() {
        return StressScore::Unavailable(StressUnavailable::NoCompleteRows);
    }
    StressScore::Available(ScoreSeries { dates, values })
}
