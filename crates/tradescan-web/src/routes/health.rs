use axum::extract::State;
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};
use tradescan_core::{CacheStats, UtcDateTime};

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    timestamp: UtcDateTime,
    version: &'static str,
    cache: CacheStats,
    /// Null when the Asian-range refresher is disabled.
    asian_range: Option<AsianRangeHealth>,
}

#[derive(Debug, Serialize)]
pub struct AsianRangeHealth {
    tracked: usize,
    resolved: usize,
    refresh_in_flight: bool,
}

pub async fn ping() -> Json<Value> {
    Json(json!({ "message": "pong" }))
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let asian_range = state.scanner.asian_range().map(|service| AsianRangeHealth {
        tracked: service.store().tracked(),
        resolved: service.store().resolved(),
        refresh_in_flight: service.is_refreshing(),
    });

    Json(HealthResponse {
        status: "healthy",
        timestamp: UtcDateTime::now(),
        version: env!("CARGO_PKG_VERSION"),
        cache: state.cache.stats().await,
        asian_range,
    })
}
