use std::future::Future;
use std::pin::Pin;

use serde::Deserialize;

use crate::data_source::{MarketSnapshotSource, MarketsRequest, SourceError};
use crate::http_client::HttpRequest;
use crate::upstream::Upstream;
use crate::{AssetSnapshot, Symbol, UtcDateTime, ValidationError};

pub const DEFAULT_BASE_URL: &str = "https://api.coingecko.com/api/v3";
/// Header carrying the demo-tier API key.
pub const API_KEY_HEADER: &str = "x-cg-demo-api-key";

/// Spot market-cap ranking from `coins/markets`.
#[derive(Debug, Clone)]
pub struct CoinGeckoAdapter {
    base_url: String,
    upstream: Upstream,
}

impl CoinGeckoAdapter {
    pub fn new(base_url: impl Into<String>, upstream: Upstream) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            upstream,
        }
    }

    fn markets_url(&self, request: &MarketsRequest) -> String {
        format!(
            "{}/coins/markets?vs_currency={}&order=market_cap_desc&per_page={}&page={}\
             &sparkline=false&price_change_percentage=24h",
            self.base_url,
            urlencoding::encode(&request.vs_currency),
            request.per_page,
            request.page,
        )
    }

    async fn fetch_markets(
        &self,
        request: MarketsRequest,
    ) -> Result<Vec<AssetSnapshot>, SourceError> {
        let cache_key = format!(
            "coingecko:markets:{}:{}:{}",
            request.vs_currency, request.per_page, request.page
        );
        let http_request = HttpRequest::get(self.markets_url(&request))
            .with_header("accept", "application/json")
            .with_timeout(request.timeout);

        let body = self
            .upstream
            .get_cached(&cache_key, http_request, None)
            .await?;
        parse_markets(&body)
    }
}

impl MarketSnapshotSource for CoinGeckoAdapter {
    fn name(&self) -> &'static str {
        "coingecko"
    }

    fn markets<'a>(
        &'a self,
        request: MarketsRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<AssetSnapshot>, SourceError>> + Send + 'a>> {
        Box::pin(self.fetch_markets(request))
    }
}

#[derive(Debug, Deserialize)]
struct MarketPayload {
    id: String,
    symbol: String,
    name: String,
    current_price: Option<f64>,
    price_change_percentage_24h: Option<f64>,
    total_volume: Option<f64>,
    market_cap: Option<f64>,
    market_cap_rank: Option<u32>,
    ath: Option<f64>,
    ath_date: Option<String>,
    atl: Option<f64>,
    atl_date: Option<String>,
}

/// Decode a `coins/markets` array. Items that fail to decode or validate are logged
/// and skipped; an undecodable top level is an error.
fn parse_markets(body: &str) -> Result<Vec<AssetSnapshot>, SourceError> {
    let items: Vec<serde_json::Value> = serde_json::from_str(body).map_err(|error| {
        SourceError::internal(format!("coingecko markets payload is not a JSON array: {error}"))
    })?;

    let total = items.len();
    let snapshots: Vec<AssetSnapshot> = items
        .into_iter()
        .filter_map(|item| {
            let payload = match serde_json::from_value::<MarketPayload>(item) {
                Ok(payload) => payload,
                Err(error) => {
                    tracing::warn!(%error, "skipping undecodable coingecko market item");
                    return None;
                }
            };
            let coin_id = payload.id.clone();
            match normalize_market(payload) {
                Ok(snapshot) => Some(snapshot),
                Err(error) => {
                    tracing::warn!(coin_id, %error, "skipping invalid coingecko market item");
                    None
                }
            }
        })
        .collect();

    if snapshots.len() < total {
        tracing::warn!(
            kept = snapshots.len(),
            skipped = total - snapshots.len(),
            "coingecko markets response contained unusable items"
        );
    }
    Ok(snapshots)
}

fn normalize_market(payload: MarketPayload) -> Result<AssetSnapshot, ValidationError> {
    let current_price = payload.current_price.ok_or(ValidationError::MissingField {
        field: "current_price",
    })?;

    AssetSnapshot {
        coin_id: payload.id,
        symbol: Symbol::parse(&payload.symbol)?,
        name: payload.name,
        current_price,
        price_change_24h: payload.price_change_percentage_24h.unwrap_or(0.0),
        volume_24h: payload.total_volume.unwrap_or(0.0),
        market_cap: payload.market_cap,
        market_cap_rank: payload.market_cap_rank,
        ath: payload.ath,
        ath_date: parse_optional_date(payload.ath_date.as_deref()),
        atl: payload.atl,
        atl_date: parse_optional_date(payload.atl_date.as_deref()),
    }
    .validate()
}

fn parse_optional_date(value: Option<&str>) -> Option<UtcDateTime> {
    value.and_then(|raw| UtcDateTime::parse(raw).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BTC_ITEM: &str = r#"{
        "id": "bitcoin",
        "symbol": "btc",
        "name": "Bitcoin",
        "current_price": 43500.0,
        "market_cap": 850000000000,
        "market_cap_rank": 1,
        "total_volume": 25000000000,
        "price_change_percentage_24h": 2.5,
        "ath": 69000.0,
        "ath_date": "2021-11-10T14:24:11.849Z",
        "atl": 67.81,
        "atl_date": "2013-07-06T00:00:00.000Z"
    }"#;

    #[test]
    fn parses_market_item_into_snapshot() {
        let snapshots = parse_markets(&format!("[{BTC_ITEM}]")).expect("valid payload");

        assert_eq!(snapshots.len(), 1);
        let btc = &snapshots[0];
        assert_eq!(btc.symbol.as_str(), "BTC");
        assert_eq!(btc.coin_id, "bitcoin");
        assert_eq!(btc.market_cap_rank, Some(1));
        assert_eq!(btc.ath_atl(), Some((69_000.0, 67.81)));
        assert!(btc.ath_date.is_some());
    }

    #[test]
    fn missing_optional_fields_default() {
        let body = r#"[{"id":"x","symbol":"xyz","name":"X","current_price":1.5,
            "market_cap":null,"market_cap_rank":null,"total_volume":null,
            "price_change_percentage_24h":null,"ath":null,"atl":null}]"#;
        let snapshots = parse_markets(body).expect("valid payload");

        assert_eq!(snapshots[0].volume_24h, 0.0);
        assert_eq!(snapshots[0].price_change_24h, 0.0);
        assert!(snapshots[0].market_cap.is_none());
        assert!(snapshots[0].ath_atl().is_none());
    }

    #[test]
    fn skips_items_without_price_or_with_bad_symbol() {
        let body = format!(
            r#"[{BTC_ITEM},
            {{"id":"dead","symbol":"dead","name":"Dead","current_price":null}},
            {{"id":"weird","symbol":"$$$","name":"Weird","current_price":1.0}},
            {{"id":"neg","symbol":"neg","name":"Neg","current_price":1.0,"total_volume":-5}}]"#
        );
        let snapshots = parse_markets(&body).expect("top level is valid");

        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].coin_id, "bitcoin");
    }

    #[test]
    fn keeps_inverted_ath_atl_for_the_engine_to_reject() {
        let body = r#"[{"id":"inv","symbol":"inv","name":"Inverted","current_price":5.0,
            "ath":1.0,"atl":10.0}]"#;
        let snapshots = parse_markets(body).expect("valid payload");
        assert_eq!(snapshots[0].ath_atl(), Some((1.0, 10.0)));
    }

    #[test]
    fn rejects_non_array_payload() {
        let error = parse_markets(r#"{"status":{"error_code":429}}"#).expect_err("object");
        assert_eq!(error.code(), "source.internal");
    }
}
