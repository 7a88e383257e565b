//! Yahoo Finance price provider.
//!
//! Fetches daily closes (and adjusted closes when published) from Yahoo's
//! v8 chart API. Index symbols such as `^VIX` carry no adjusted series, so
//! `adjusted_available` is reported per response.
//!
//! Yahoo Finance has no official API and is subject to unannounced format changes.

use super::circuit_breaker::CircuitBreaker;
use super::provider::{DataError, PriceBar, PriceHistory, PriceProvider};
use super::retry::{build_client, get_with_retry, RetryPolicy};
use chrono::NaiveDate;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    meta: Option<ChartMeta>,
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct ChartMeta {
    symbol: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteData>,
    adjclose: Option<Vec<AdjCloseData>>,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    #[serde(default)]
    close: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct AdjCloseData {
    adjclose: Vec<Option<f64>>,
}

/// Yahoo Finance price provider.
pub struct YahooProvider {
    client: reqwest::blocking::Client,
    circuit_breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
}

impl YahooProvider {
    pub fn new(
        circuit_breaker: Arc<CircuitBreaker>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, DataError> {
        Ok(Self {
            client: build_client(timeout)?,
            circuit_breaker,
            retry,
        })
    }

    fn chart_url(symbol: &str, start: NaiveDate, end: NaiveDate) -> String {
        let start_ts = start.and_time(chrono::NaiveTime::MIN).and_utc().timestamp();
        let end_ts = end
            .succ_opt()
            .unwrap_or(end)
            .and_time(chrono::NaiveTime::MIN)
            .and_utc()
            .timestamp();
        format!(
            "https://query2.finance.yahoo.com/v8/finance/chart/{}\
             ?period1={start_ts}&period2={end_ts}&interval=1d\
             &includeAdjustedClose=true",
            encode_symbol(symbol)
        )
    }

    fn parse_response(symbol: &str, resp: ChartResponse) -> Result<PriceHistory, DataError> {
        let result = resp.chart.result.ok_or_else(|| match resp.chart.error {
            Some(err) if err.code == "Not Found" => DataError::SymbolNotFound {
                symbol: symbol.to_string(),
            },
            Some(err) => {
                DataError::ResponseFormatChanged(format!("{}: {}", err.code, err.description))
            }
            None => DataError::ResponseFormatChanged("empty result with no error".into()),
        })?;

        let data = result
            .into_iter()
            .next()
            .ok_or_else(|| DataError::ResponseFormatChanged("result array is empty".into()))?;

        let returned_symbol = data
            .meta
            .and_then(|m| m.symbol)
            .unwrap_or_else(|| symbol.to_string());

        // A symbol with no trading history comes back without timestamps.
        let timestamps = data.timestamp.ok_or_else(|| DataError::NoData {
            series: symbol.to_string(),
        })?;

        let quote = data
            .indicators
            .quote
            .into_iter()
            .next()
            .ok_or_else(|| DataError::ResponseFormatChanged("no quote data".into()))?;

        let adj_closes = data
            .indicators
            .adjclose
            .and_then(|v| v.into_iter().next())
            .map(|a| a.adjclose);
        let adjusted_available = adj_closes.is_some();

        let mut bars = Vec::with_capacity(timestamps.len());
        for (i, &ts) in timestamps.iter().enumerate() {
            let date = chrono::DateTime::from_timestamp(ts, 0)
                .map(|dt| dt.date_naive())
                .ok_or_else(|| {
                    DataError::ResponseFormatChanged(format!("invalid timestamp: {ts}"))
                })?;

            let close = quote.close.get(i).copied().flatten();
            let adj_close = adj_closes
                .as_ref()
                .and_then(|v| v.get(i).copied().flatten());

            // Non-trading days come back with every field null.
            if close.is_none() && adj_close.is_none() {
                continue;
            }

            bars.push(PriceBar {
                date,
                close,
                adj_close,
            });
        }

        if bars.is_empty() {
            return Err(DataError::NoData {
                series: symbol.to_string(),
            });
        }

        Ok(PriceHistory {
            symbol: returned_symbol,
            bars,
            adjusted_available,
        })
    }
}

/// Percent-encode the characters Yahoo symbols use that are not URL-safe.
fn encode_symbol(symbol: &str) -> String {
    symbol.replace('^', "%5E").replace('=', "%3D")
}

impl PriceProvider for YahooProvider {
    fn name(&self) -> &str {
        "yahoo_finance"
    }

    fn fetch_history(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<PriceHistory, DataError> {
        let url = Self::chart_url(symbol, start, end);
        let resp = get_with_retry(&self.client, &url, symbol, &self.circuit_breaker, &self.retry)?;

        let chart: ChartResponse = resp.json().map_err(|e| {
            DataError::ResponseFormatChanged(format!("failed to parse response for {symbol}: {e}"))
        })?;

        let history = Self::parse_response(symbol, chart)?;
        tracing::debug!(
            symbol,
            bars = history.bars.len(),
            adjusted = history.adjusted_available,
            "yahoo history fetched"
        );
        Ok(history)
    }

    fn is_available(&self) -> bool {
        self.circuit_breaker.is_allowed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(symbol: &str, body: &str) -> Result<PriceHistory, DataError> {
        let resp: ChartResponse = serde_json::from_str(body).unwrap();
        YahooProvider::parse_response(symbol, resp)
    }

    #[test]
    fn parses_adjusted_and_skips_null_rows() {
        let body = r#"{"chart":{"result":[{
            "meta":{"symbol":"HYG"},
            "timestamp":[1704205800,1704292200,1704378600],
            "indicators":{
                "quote":[{"close":[77.1,null,77.5]}],
                "adjclose":[{"adjclose":[75.0,null,75.4]}]
            }}],"error":null}}"#;

        let history = parse("HYG", body).unwrap();
        assert_eq!(history.symbol, "HYG");
        assert!(history.adjusted_available);
        assert_eq!(history.bars.len(), 2);
        assert_eq!(history.bars[0].adj_close, Some(75.0));
        assert_eq!(
            history.bars[1].date,
            NaiveDate::from_ymd_opt(2024, 1, 4).unwrap()
        );
    }

    #[test]
    fn index_without_adjclose() {
        let body = r#"{"chart":{"result":[{
            "meta":{"symbol":"^VIX"},
            "timestamp":[1704205800],
            "indicators":{"quote":[{"close":[13.2]}]}}],"error":null}}"#;

        let history = parse("^VIX", body).unwrap();
        assert!(!history.adjusted_available);
        assert_eq!(history.observations()[0].value, 13.2);
    }

    #[test]
    fn not_found_maps_to_symbol_not_found() {
        let body = r#"{"chart":{"result":null,
            "error":{"code":"Not Found","description":"No data found, symbol may be delisted"}}}"#;
        assert!(matches!(
            parse("NOPE", body),
            Err(DataError::SymbolNotFound { .. })
        ));
    }

    #[test]
    fn missing_timestamps_is_no_data() {
        let body = r#"{"chart":{"result":[{"meta":{"symbol":"X"},
            "indicators":{"quote":[{}]}}],"error":null}}"#;
        assert!(matches!(parse("X", body), Err(DataError::NoData { .. })));
    }

    #[test]
    fn url_encodes_index_symbols() {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        let url = YahooProvider::chart_url("^VIX3M", start, end);
        assert!(url.contains("/chart/%5EVIX3M?"));
        assert!(url.contains("period1=1704067200"));
    }
}
