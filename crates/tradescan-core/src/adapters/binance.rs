use std::future::Future;
use std::pin::Pin;

use serde_json::Value;

use crate::data_source::{CandleSource, CandlesRequest, SourceError};
use crate::http_client::HttpRequest;
use crate::upstream::Upstream;
use crate::{Candle, ValidationError};

pub const DEFAULT_BASE_URL: &str = "https://fapi.binance.com/fapi/v1";

/// USDⓈ-M perpetual klines.
#[derive(Debug, Clone)]
pub struct BinanceFuturesAdapter {
    base_url: String,
    upstream: Upstream,
}

impl BinanceFuturesAdapter {
    pub fn new(base_url: impl Into<String>, upstream: Upstream) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            upstream,
        }
    }

    fn klines_url(&self, pair: &str, request: &CandlesRequest) -> String {
        format!(
            "{}/klines?symbol={}&interval={}&limit={}",
            self.base_url,
            urlencoding::encode(pair),
            request.interval,
            request.limit,
        )
    }

    async fn fetch_candles(&self, request: CandlesRequest) -> Result<Vec<Candle>, SourceError> {
        let pair = request.symbol.perpetual_pair();
        let cache_key = format!(
            "binance:klines:{pair}:{}:{}",
            request.interval, request.limit
        );
        let http_request =
            HttpRequest::get(self.klines_url(&pair, &request)).with_timeout(request.timeout);

        let body = self
            .upstream
            .get_cached(&cache_key, http_request, None)
            .await?;
        parse_klines(&pair, &body)
    }
}

impl CandleSource for BinanceFuturesAdapter {
    fn name(&self) -> &'static str {
        "binance-futures"
    }

    fn candles<'a>(
        &'a self,
        request: CandlesRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Candle>, SourceError>> + Send + 'a>> {
        Box::pin(self.fetch_candles(request))
    }
}

/// Decode the klines array-of-arrays
/// (`[open_time, open, high, low, close, volume, close_time, ...]`, prices as strings).
/// Malformed rows are skipped; output is ascending by open time without duplicates.
fn parse_klines(pair: &str, body: &str) -> Result<Vec<Candle>, SourceError> {
    let rows: Vec<Vec<Value>> = serde_json::from_str(body).map_err(|error| {
        SourceError::internal(format!("binance klines payload for {pair} is malformed: {error}"))
    })?;

    let mut candles: Vec<Candle> = rows
        .iter()
        .filter_map(|row| match parse_row(row) {
            Ok(candle) => Some(candle),
            Err(error) => {
                tracing::warn!(pair, %error, "skipping malformed kline row");
                None
            }
        })
        .collect();

    candles.sort_by_key(|candle| candle.open_time);
    candles.dedup_by_key(|candle| candle.open_time);
    Ok(candles)
}

fn parse_row(row: &[Value]) -> Result<Candle, ValidationError> {
    let open_time = row
        .first()
        .and_then(Value::as_i64)
        .ok_or(ValidationError::MissingField { field: "open_time" })?;

    Candle::new(
        open_time,
        decimal(row, 1, "open")?,
        decimal(row, 2, "high")?,
        decimal(row, 3, "low")?,
        decimal(row, 4, "close")?,
        decimal(row, 5, "volume")?,
    )
}

// Binance encodes decimals as strings; plain numbers are accepted too.
fn decimal(row: &[Value], index: usize, field: &'static str) -> Result<f64, ValidationError> {
    match row.get(index) {
        Some(Value::String(raw)) => raw
            .parse::<f64>()
            .map_err(|_| ValidationError::NonFiniteValue { field }),
        Some(Value::Number(number)) => number
            .as_f64()
            .ok_or(ValidationError::NonFiniteValue { field }),
        _ => Err(ValidationError::MissingField { field }),
    }
}
