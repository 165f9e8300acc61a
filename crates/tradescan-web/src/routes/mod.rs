//! HTTP surface: `/` plus everything under `/api/v1`.

mod coins;
mod health;

use axum::http::{HeaderValue, Method};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::error::ServerError;
use crate::state::AppState;

pub const API_PREFIX: &str = "/api/v1";

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/ping", get(health::ping))
        .route("/health", get(health::health))
        .route("/coins", get(coins::list_coins))
        .route("/coins/:symbol", get(coins::get_coin))
        .route("/coins/:symbol/fibonacci", get(coins::get_fibonacci))
        .route("/coins/:symbol/ath-atl", get(coins::get_ath_atl))
        .route("/scan", post(coins::scan));

    Router::new()
        .route("/", get(index))
        .nest(API_PREFIX, api)
        .with_state(state)
}

/// `None` allows any origin.
pub fn cors_layer(origins: Option<Vec<String>>) -> Result<CorsLayer, ServerError> {
    let allow_origin = match origins {
        None => AllowOrigin::from(Any),
        Some(origins) => {
            let values = origins
                .into_iter()
                .map(|origin| {
                    HeaderValue::from_str(&origin)
                        .map_err(|_| ServerError::InvalidCorsOrigin { origin })
                })
                .collect::<Result<Vec<_>, _>>()?;
            AllowOrigin::list(values)
        }
    };

    Ok(CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any))
}

async fn index() -> Json<Value> {
    Json(json!({
        "name": "tradescan",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Crypto market scanner with Fibonacci levels and Asian-range references",
        "endpoints": {
            "ping": format!("{API_PREFIX}/ping"),
            "health": format!("{API_PREFIX}/health"),
            "coins": format!("{API_PREFIX}/coins"),
            "coin": format!("{API_PREFIX}/coins/{{symbol}}"),
            "fibonacci": format!("{API_PREFIX}/coins/{{symbol}}/fibonacci"),
            "ath_atl": format!("{API_PREFIX}/coins/{{symbol}}/ath-atl"),
            "scan": format!("{API_PREFIX}/scan"),
        },
    }))
}

#[cfg(test)]
pub(crate) mod testing {
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use serde_json::Value;
    use tower::ServiceExt;
    use tradescan_core::{
        AssetSnapshot, MarketSnapshotSource, MarketsRequest, Scanner, ScannerConfig, SourceError,
        Symbol, TtlCache,
    };

    use crate::state::AppState;

    pub(crate) struct FixedMarkets {
        pub result: Result<Vec<AssetSnapshot>, SourceError>,
    }

    impl MarketSnapshotSource for FixedMarkets {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn markets<'a>(
            &'a self,
            _request: MarketsRequest,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<AssetSnapshot>, SourceError>> + Send + 'a>> {
            let result = self.result.clone();
            Box::pin(async move { result })
        }
    }

    pub(crate) fn snapshot(
        symbol: &str,
        rank: u32,
        price: f64,
        ath: Option<f64>,
        atl: Option<f64>,
    ) -> AssetSnapshot {
        AssetSnapshot {
            coin_id: symbol.to_ascii_lowercase(),
            symbol: Symbol::parse(symbol).expect("valid symbol"),
            name: symbol.to_owned(),
            current_price: price,
            price_change_24h: f64::from(rank),
            volume_24h: 1_000.0 * f64::from(rank),
            market_cap: Some(1_000_000.0 / f64::from(rank)),
            market_cap_rank: Some(rank),
            ath,
            ath_date: None,
            atl,
            atl_date: None,
        }
    }

    /// BTC with a normal range, ETH with an inverted one, SOL without ATH/ATL.
    pub(crate) fn default_markets() -> Vec<AssetSnapshot> {
        vec![
            snapshot("BTC", 1, 43_500.0, Some(69_000.0), Some(67.81)),
            snapshot("ETH", 2, 2_000.0, Some(100.0), Some(4_000.0)),
            snapshot("SOL", 3, 90.0, None, None),
        ]
    }

    pub(crate) fn app_with(result: Result<Vec<AssetSnapshot>, SourceError>) -> Router {
        let scanner = Scanner::new(Arc::new(FixedMarkets { result }), ScannerConfig::default());
        super::router(AppState::new(scanner, TtlCache::default()))
    }

    pub(crate) fn app() -> Router {
        app_with(Ok(default_markets()))
    }

    pub(crate) async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.expect("router is infallible");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body readable");
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    pub(crate) async fn get(app: Router, uri: &str) -> (StatusCode, Value) {
        let request = Request::get(uri).body(Body::empty()).expect("valid request");
        send(app, request).await
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use tower::ServiceExt;

    use super::testing::{app, get};
    use super::*;

    #[tokio::test]
    async fn index_lists_endpoints() {
        let (status, body) = get(app(), "/").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "tradescan");
        assert_eq!(body["endpoints"]["scan"], "/api/v1/scan");
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let (status, _) = get(app(), "/api/v2/coins").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn cors_layer_allows_configured_origin() {
        let cors =
            cors_layer(Some(vec![String::from("http://localhost:3000")])).expect("valid origin");
        let app = app().layer(cors);

        let request = Request::get("/api/v1/ping")
            .header(header::ORIGIN, "http://localhost:3000")
            .body(Body::empty())
            .expect("valid request");
        let response = app.oneshot(request).await.expect("infallible");

        assert_eq!(
            response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN),
            Some(&HeaderValue::from_static("http://localhost:3000"))
        );
    }

    #[test]
    fn cors_layer_rejects_malformed_origin() {
        let result = cors_layer(Some(vec![String::from("bad\norigin")]));
        assert!(matches!(result, Err(ServerError::InvalidCorsOrigin { .. })));
    }
}
