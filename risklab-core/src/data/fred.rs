//! FRED (Federal Reserve Economic Data) series provider.
//!
//! With an API key the JSON observations endpoint is used. Without one the
//! public `fredgraph.csv` download serves the same observations. In both
//! formats a missing value is published as `.` (or an empty cell) and is
//! skipped.

use super::circuit_breaker::CircuitBreaker;
use super::provider::{DataError, SeriesProvider};
use super::retry::{build_client, get_with_retry, RetryPolicy};
use crate::table::Observation;
use chrono::NaiveDate;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

const API_BASE: &str = "https://api.stlouisfed.org/fred/series/observations";
const GRAPH_CSV_BASE: &str = "https://fred.stlouisfed.org/graph/fredgraph.csv";

#[derive(Debug, Deserialize)]
struct ObservationsResponse {
    observations: Vec<RawObservation>,
}

#[derive(Debug, Deserialize)]
struct RawObservation {
    date: String,
    value: String,
}

/// FRED series provider.
pub struct FredProvider {
    client: reqwest::blocking::Client,
    api_key: Option<String>,
    circuit_breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
}

impl FredProvider {
    pub fn new(
        api_key: Option<String>,
        circuit_breaker: Arc<CircuitBreaker>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, DataError> {
        Ok(Self {
            client: build_client(timeout)?,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            circuit_breaker,
            retry,
        })
    }

    fn url(&self, code: &str, start: NaiveDate) -> String {
        match &self.api_key {
            Some(key) => format!(
                "{API_BASE}?series_id={code}&api_key={key}&file_type=json\
                 &observation_start={start}"
            ),
            None => format!("{GRAPH_CSV_BASE}?id={code}&cosd={start}"),
        }
    }
}

impl SeriesProvider for FredProvider {
    fn name(&self) -> &str {
        "fred"
    }

    fn fetch_series(&self, code: &str, start: NaiveDate) -> Result<Vec<Observation>, DataError> {
        let url = self.url(code, start);
        let resp = get_with_retry(&self.client, &url, code, &self.circuit_breaker, &self.retry)?;
        let body = resp
            .text()
            .map_err(|e| DataError::NetworkUnreachable(format!("{code}: reading body: {e}")))?;

        let mut observations = if self.api_key.is_some() {
            parse_json(code, &body)?
        } else {
            parse_csv(code, &body)?
        };
        observations.retain(|o| o.date >= start);

        if observations.is_empty() {
            return Err(DataError::NoData {
                series: code.to_string(),
            });
        }
        tracing::debug!(code, observations = observations.len(), "fred series fetched");
        Ok(observations)
    }

    fn is_available(&self) -> bool {
        self.circuit_breaker.is_allowed()
    }
}

/// Parse the JSON observations endpoint.
pub fn parse_json(code: &str, body: &str) -> Result<Vec<Observation>, DataError> {
    let resp: ObservationsResponse = serde_json::from_str(body).map_err(|e| {
        DataError::ResponseFormatChanged(format!("{code}: unexpected FRED JSON: {e}"))
    })?;

    let mut out = Vec::with_capacity(resp.observations.len());
    for raw in resp.observations {
        if let Some(obs) = parse_row(code, &raw.date, &raw.value)? {
            out.push(obs);
        }
    }
    Ok(sorted(out))
}

/// Parse the `fredgraph.csv` download: a header row then `date,value` rows.
pub fn parse_csv(code: &str, body: &str) -> Result<Vec<Observation>, DataError> {
    if body.trim_start().starts_with('<') {
        return Err(DataError::ResponseFormatChanged(format!(
            "{code}: expected CSV, got HTML"
        )));
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(body.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| DataError::ResponseFormatChanged(format!("{code}: CSV header: {e}")))?;
    if headers.len() < 2 {
        return Err(DataError::ResponseFormatChanged(format!(
            "{code}: expected two CSV columns, got {}",
            headers.len()
        )));
    }

    let mut out = Vec::new();
    for record in reader.records() {
        let record = record
            .map_err(|e| DataError::ResponseFormatChanged(format!("{code}: CSV row: {e}")))?;
        let date = record.get(0).unwrap_or_default();
        let value = record.get(1).unwrap_or_default();
        if let Some(obs) = parse_row(code, date, value)? {
            out.push(obs);
        }
    }
    Ok(sorted(out))
}

fn parse_row(code: &str, date: &str, value: &str) -> Result<Option<Observation>, DataError> {
    if value.is_empty() || value == "." {
        return Ok(None);
    }
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|e| {
        DataError::ResponseFormatChanged(format!("{code}: bad date '{date}': {e}"))
    })?;
    Ok(value
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .map(|v| Observation::new(date, v)))
}

fn sorted(mut observations: Vec<Observation>) -> Vec<Observation> {
    observations.sort_by_key(|o| o.date);
    observations.dedup_by_key(|o| o.date);
    observations
}
