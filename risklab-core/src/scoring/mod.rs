//! Scores built on top of the indicator layer.

pub mod recession;
pub mod stress;

pub use recession::{
    compute_recession, fetch_recession_inputs, recession_outcome, FactorScores,
    PlaceholderFactor, RecessionFactor, RecessionInputs, RecessionModel, RecessionOutcome,
    RecessionResult, RecessionSeries, ValuationSource,
};
pub use stress::{
    compute_stress_score, RegimeBands, ScoreSeries, StressInput, StressModel, StressRegime,
    StressScore, StressSummary, StressUnavailable,
};
