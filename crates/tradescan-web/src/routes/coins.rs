use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use tradescan_core::scanner::DEFAULT_SCAN_LIMIT;
use tradescan_core::{
    AthAtl, EnrichedAsset, FibonacciAnalysis, ScanFilters, ScanRequest, ScanResult, SortKey,
};

use crate::error::ApiError;
use crate::state::AppState;

/// Query string of `GET /coins`; filters are flattened into top-level parameters.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CoinsQuery {
    limit: usize,
    include_fibonacci: bool,
    min_volume: Option<f64>,
    min_market_cap: Option<f64>,
    min_change_24h: Option<f64>,
    max_change_24h: Option<f64>,
    min_fib_position: Option<f64>,
    max_fib_position: Option<f64>,
    sort: Option<String>,
}

impl Default for CoinsQuery {
    fn default() -> Self {
        Self {
            limit: DEFAULT_SCAN_LIMIT,
            include_fibonacci: false,
            min_volume: None,
            min_market_cap: None,
            min_change_24h: None,
            max_change_24h: None,
            min_fib_position: None,
            max_fib_position: None,
            sort: None,
        }
    }
}

impl TryFrom<CoinsQuery> for ScanRequest {
    type Error = ApiError;

    fn try_from(query: CoinsQuery) -> Result<Self, Self::Error> {
        let sort = match query.sort.as_deref() {
            None | Some("") => SortKey::default(),
            Some(value) => value
                .parse::<SortKey>()
                .map_err(|error| ApiError::bad_request(error.to_string()))?,
        };

        Ok(Self {
            limit: query.limit,
            include_fibonacci: query.include_fibonacci,
            filters: ScanFilters {
                min_volume: query.min_volume,
                min_market_cap: query.min_market_cap,
                min_change_24h: query.min_change_24h,
                max_change_24h: query.max_change_24h,
                min_fib_position: query.min_fib_position,
                max_fib_position: query.max_fib_position,
            },
            sort,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct CoinQuery {
    #[serde(default = "default_include_fibonacci")]
    include_fibonacci: bool,
}

fn default_include_fibonacci() -> bool {
    true
}

pub async fn list_coins(
    State(state): State<AppState>,
    query: Result<Query<CoinsQuery>, QueryRejection>,
) -> Result<Json<ScanResult>, ApiError> {
    let Query(query) = query?;
    let request = ScanRequest::try_from(query)?;
    Ok(Json(state.scanner.scan(request).await?))
}

pub async fn get_coin(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    query: Result<Query<CoinQuery>, QueryRejection>,
) -> Result<Json<EnrichedAsset>, ApiError> {
    let Query(query) = query?;
    Ok(Json(state.scanner.find(&symbol, query.include_fibonacci).await?))
}

pub async fn get_fibonacci(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<Json<FibonacciAnalysis>, ApiError> {
    Ok(Json(state.scanner.fibonacci(&symbol).await?))
}

pub async fn get_ath_atl(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<Json<AthAtl>, ApiError> {
    Ok(Json(state.scanner.ath_atl(&symbol).await?))
}

pub async fn scan(
    State(state): State<AppState>,
    body: Result<Json<ScanRequest>, JsonRejection>,
) -> Result<Json<ScanResult>, ApiError> {
    let Json(request) = body?;
    Ok(Json(state.scanner.scan(request).await?))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Arc;

    use tradescan_core::{
        CoinGeckoAdapter, HttpClient, HttpError, HttpRequest, HttpResponse, Scanner,
        ScannerConfig, SourceError, Throttle, ThrottleConfig, TtlCache, Upstream,
    };

    use super::super::testing::{app, app_with, get, send};
    use super::super::router;
    use crate::state::AppState;

    // A provider that refuses every request with 404.
    struct RejectingProvider;

    impl HttpClient for RejectingProvider {
        fn execute<'a>(
            &'a self,
            _request: HttpRequest,
        ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
            Box::pin(async { Ok(HttpResponse::with_status(404, "{}")) })
        }
    }

    fn post_scan(body: &str) -> Request<Body> {
        Request::post("/api/v1/scan")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_owned()))
            .expect("valid request")
    }

    #[tokio::test]
    async fn list_coins_defaults_to_rank_order_without_fibonacci() {
        let (status, body) = get(app(), "/api/v1/coins").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_coins"], 3);
        assert_eq!(body["sort"], "rank");
        assert_eq!(body["coins"][0]["symbol"], "BTC");
        assert!(body["coins"][0]["fibonacci_analysis"].is_null());
        assert_eq!(body["failures"], 0);
    }

    #[tokio::test]
    async fn list_coins_applies_query_filters_and_sort() {
        let (status, body) = get(app(), "/api/v1/coins?min_volume=2000&sort=volume").await;

        assert_eq!(status, StatusCode::OK);
        let symbols: Vec<&str> = body["coins"]
            .as_array()
            .expect("coins array")
            .iter()
            .filter_map(|coin| coin["symbol"].as_str())
            .collect();
        assert_eq!(symbols, vec!["SOL", "ETH"]);
        assert_eq!(body["filters_applied"]["min_volume"], 2000.0);
    }

    #[tokio::test]
    async fn fibonacci_sort_counts_inverted_range_as_failure() {
        let (status, body) = get(app(), "/api/v1/coins?sort=fib_position").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_coins"], 3);
        assert_eq!(body["failures"], 1);
        assert_eq!(body["coins"][0]["symbol"], "BTC");
        assert!(body["coins"][0]["fibonacci_analysis"]["position_percentage"].is_number());
    }

    #[tokio::test]
    async fn invalid_query_values_are_bad_requests() {
        for uri in [
            "/api/v1/coins?sort=price",
            "/api/v1/coins?limit=0",
            "/api/v1/coins?limit=251",
            "/api/v1/coins?limit=abc",
            "/api/v1/coins?min_change_24h=5&max_change_24h=-5",
        ] {
            let (status, body) = get(app(), uri).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
            assert_eq!(body["status_code"], 400, "{uri}");
            assert!(body["error"].is_string(), "{uri}");
        }
    }

    #[tokio::test]
    async fn coin_lookup_includes_fibonacci_by_default() {
        let (status, body) = get(app(), "/api/v1/coins/btc").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["symbol"], "BTC");
        assert!(body["fibonacci_analysis"].is_object());

        let (_, body) = get(app(), "/api/v1/coins/btc?include_fibonacci=false").await;
        assert!(body["fibonacci_analysis"].is_null());
    }

    #[tokio::test]
    async fn unknown_coin_is_not_found() {
        let (status, body) = get(app(), "/api/v1/coins/DOGE").await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["status_code"], 404);
    }

    #[tokio::test]
    async fn fibonacci_endpoint_distinguishes_missing_and_invalid_ranges() {
        let (status, body) = get(app(), "/api/v1/coins/BTC/fibonacci").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["retracement_levels"].as_array().map(Vec::len), Some(7));
        assert_eq!(body["extension_levels"].as_array().map(Vec::len), Some(4));

        let (status, _) = get(app(), "/api/v1/coins/SOL/fibonacci").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = get(app(), "/api/v1/coins/ETH/fibonacci").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn ath_atl_endpoint_returns_raw_extremes() {
        let (status, body) = get(app(), "/api/v1/coins/BTC/ath-atl").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ath"], 69_000.0);
        assert_eq!(body["atl"], 67.81);
        assert_eq!(body["current_price"], 43_500.0);

        let (status, _) = get(app(), "/api/v1/coins/SOL/ath-atl").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn scan_accepts_json_body() {
        let (status, body) = send(
            app(),
            post_scan(r#"{"limit":2,"filters":{"min_change_24h":2},"sort":"change_24h"}"#),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_coins"], 1);
        assert_eq!(body["coins"][0]["symbol"], "ETH");
        assert!(body["coins"][0]["fibonacci_analysis"].is_null());
    }

    #[tokio::test]
    async fn scan_rejects_malformed_body() {
        let (status, body) = send(app(), post_scan("{not json")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status_code"], 400);
    }

    #[tokio::test]
    async fn provider_failures_surface_as_gateway_errors() {
        let (status, _) = get(
            app_with(Err(SourceError::unavailable("upstream timed out"))),
            "/api/v1/coins",
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);

        let request = Request::get("/api/v1/coins").body(Body::empty()).expect("valid");
        let response = tower::ServiceExt::oneshot(
            app_with(Err(SourceError::rate_limited(
                "local rate limit reached",
                Some(std::time::Duration::from_millis(2_500)),
            ))),
            request,
        )
        .await
        .expect("infallible");
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|value| value.to_str().ok()),
            Some("3")
        );
    }

    #[tokio::test]
    async fn provider_rejection_is_a_gateway_error_not_a_bad_request() {
        let upstream = Upstream::new(
            "coingecko",
            Arc::new(RejectingProvider),
            TtlCache::disabled(),
            Throttle::new("coingecko", ThrottleConfig::default()),
        );
        let markets = CoinGeckoAdapter::new("https://api.coingecko.test/api/v3", upstream);
        let scanner = Scanner::new(Arc::new(markets), ScannerConfig::default());
        let app = router(AppState::new(scanner, TtlCache::default()));

        let (status, body) = get(app, "/api/v1/coins").await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["status_code"], 502);
    }
}
