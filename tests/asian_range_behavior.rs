//! Behavior-driven tests for Asian-range references
//!
//! These tests verify HOW the weekly session reference is derived from candles and
//! how the background refresher behaves under concurrent triggers.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use time::macros::{date, datetime};
use time::OffsetDateTime;
use tokio::sync::Notify;
use tradescan_core::{
    AsianRangeConfig, AsianRangeExtractor, AsianRangeService, AsianRangeStore, AssetSnapshot,
    Candle, CandleSource, CandlesRequest, MarketSnapshotSource, MarketsRequest, Scanner,
    ScannerConfig, SessionSpec, SourceError, Symbol, UtcDateTime,
};

const HOUR_MS: i64 = 3_600_000;

fn millis(value: OffsetDateTime) -> i64 {
    UtcDateTime::from_offset_datetime(value).unix_millis()
}

fn candle(open_time: i64, open: f64, close: f64) -> Candle {
    let high = open.max(close) + 1.0;
    let low = open.min(close) - 1.0;
    Candle::new(open_time, open, high, low, close, 10.0).expect("valid candle")
}

// Monday 2024-01-01 through Sunday 2024-01-07, hourly, UTC. The New York Thursday
// evening session (Fri 00:00-04:00 UTC) carries bodies spanning 98..104.
fn week_of_candles() -> Vec<Candle> {
    let start = millis(datetime!(2024-01-01 00:00 UTC));
    let session_start = millis(datetime!(2024-01-05 00:00 UTC));
    let session_bodies = [
        (102.0, 104.0),
        (103.0, 101.0),
        (98.0, 100.0),
        (100.0, 102.0),
        (101.0, 99.0),
    ];

    (0..7 * 24)
        .map(|hour| {
            let open_time = start + hour * HOUR_MS;
            let offset = (open_time - session_start) / HOUR_MS;
            match usize::try_from(offset).ok().and_then(|index| session_bodies.get(index)) {
                Some(&(open, close)) => candle(open_time, open, close),
                _ => candle(open_time, 150.0, 150.5),
            }
        })
        .collect()
}

fn btc() -> Symbol {
    Symbol::parse("BTC").expect("valid")
}

fn computed_at() -> UtcDateTime {
    UtcDateTime::from_offset_datetime(datetime!(2024-01-08 00:00 UTC))
}

// =============================================================================
// Extraction
// =============================================================================

#[test]
fn when_session_candles_exist_reference_is_midpoint_of_their_bodies() {
    // Given: A week of hourly candles with a known Thursday evening session
    let candles = week_of_candles();
    let extractor = AsianRangeExtractor::default();

    // When: The reference is extracted
    let reference = extractor
        .extract(&btc(), &candles, computed_at())
        .expect("session present");

    // Then: It is the midpoint of the session body range, using wicks nowhere
    assert_eq!(reference.body_high, 104.0);
    assert_eq!(reference.body_low, 98.0);
    assert_eq!(reference.reference_price, 101.0);
    assert_eq!(reference.candle_count, 5);
    assert!(!reference.used_fallback);
    assert_eq!(reference.session_date, Some(date!(2024-01-04)));
}

#[test]
fn when_extraction_is_repeated_result_is_identical() {
    let candles = week_of_candles();
    let extractor = AsianRangeExtractor::default();

    let first = extractor.extract(&btc(), &candles, computed_at());
    let second = extractor.extract(&btc(), &candles, computed_at());

    assert!(first.is_some());
    assert_eq!(first, second);
}

#[test]
fn when_no_candles_are_given_reference_is_absent() {
    let extractor = AsianRangeExtractor::default();
    assert!(extractor.extract(&btc(), &[], computed_at()).is_none());
}

#[test]
fn when_session_is_missing_newest_candles_are_used_instead() {
    // Given: Only four Saturday candles, nowhere near a Thursday session
    let start = millis(datetime!(2024-01-06 10:00 UTC));
    let candles: Vec<Candle> = (0..4)
        .map(|hour| candle(start + hour * HOUR_MS, 200.0 + hour as f64, 201.0 + hour as f64))
        .collect();

    // When: The reference is extracted
    let reference = AsianRangeExtractor::default()
        .extract(&btc(), &candles, computed_at())
        .expect("fallback applies");

    // Then: All four candles are used and the fallback is flagged
    assert!(reference.used_fallback);
    assert_eq!(reference.candle_count, 4);
    assert_eq!(reference.session_date, None);
    assert_eq!(reference.reference_price, (204.0 + 200.0) / 2.0);
}

#[test]
fn when_friday_asia_preset_is_used_friday_morning_utc_is_the_session() {
    // Given: The Friday 00:00-07:59 UTC preset over the same week
    let extractor = AsianRangeConfig {
        session: SessionSpec::friday_asia_utc(),
        ..AsianRangeConfig::default()
    }
    .extractor();

    // When: The reference is extracted
    let reference = extractor
        .extract(&btc(), &week_of_candles(), computed_at())
        .expect("session present");

    // Then: Eight Friday-morning candles feed it, including three after the New York session
    assert_eq!(reference.candle_count, 8);
    assert_eq!(reference.session_date, Some(date!(2024-01-05)));
    assert_eq!(reference.body_high, 150.5);
    assert_eq!(reference.body_low, 98.0);
}

// =============================================================================
// Background refresh
// =============================================================================

// Blocks every candle fetch until the test opens the gate.
struct GatedCandles {
    entered: Notify,
    gate: Notify,
    calls: AtomicUsize,
    candles: Vec<Candle>,
}

impl GatedCandles {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            entered: Notify::new(),
            gate: Notify::new(),
            calls: AtomicUsize::new(0),
            candles: week_of_candles(),
        })
    }
}

impl CandleSource for GatedCandles {
    fn name(&self) -> &'static str {
        "gated"
    }

    fn candles<'a>(
        &'a self,
        _request: CandlesRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Candle>, SourceError>> + Send + 'a>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.entered.notify_one();
            self.gate.notified().await;
            Ok(self.candles.clone())
        })
    }
}

#[tokio::test]
async fn when_refresh_is_running_second_trigger_is_skipped() {
    // Given: A refresh blocked inside its candle fetch
    let source = GatedCandles::new();
    let service = Arc::new(AsianRangeService::new(
        source.clone(),
        AsianRangeStore::new(),
        AsianRangeConfig::default(),
    ));
    let running = service.spawn_refresh(vec![btc()]).expect("BTC is stale");
    source.entered.notified().await;
    assert!(service.is_refreshing());

    // When: Two more triggers arrive while it is in flight
    let direct = service.refresh(&[btc()], UtcDateTime::now()).await;
    let spawned = service.spawn_refresh(vec![btc()]);

    // Then: Both are turned away without touching the provider
    assert!(direct.skipped);
    assert_eq!(direct.attempted, 0);
    assert!(spawned.is_none());
    assert_eq!(source.calls.load(Ordering::SeqCst), 1);

    // And: Once released, the first refresh completes and frees the guard
    source.gate.notify_one();
    let report = running.await.expect("refresh task completes");
    assert_eq!(report.updated, 1);
    assert!(!service.is_refreshing());
    assert_eq!(
        service.reference(&btc()).map(|reference| reference.reference_price),
        Some(101.0)
    );
}

#[tokio::test]
async fn when_refresher_is_disabled_nothing_is_spawned() {
    let source = GatedCandles::new();
    let service = Arc::new(AsianRangeService::new(
        source.clone(),
        AsianRangeStore::new(),
        AsianRangeConfig {
            enabled: false,
            ..AsianRangeConfig::default()
        },
    ));

    assert!(service.spawn_refresh(vec![btc()]).is_none());
    assert_eq!(source.calls.load(Ordering::SeqCst), 0);
}

// =============================================================================
// Scanner attachment
// =============================================================================

struct OneMarket;

impl MarketSnapshotSource for OneMarket {
    fn name(&self) -> &'static str {
        "one"
    }

    fn markets<'a>(
        &'a self,
        _request: MarketsRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<AssetSnapshot>, SourceError>> + Send + 'a>> {
        Box::pin(async move {
            Ok(vec![AssetSnapshot {
                coin_id: String::from("bitcoin"),
                symbol: btc(),
                name: String::from("Bitcoin"),
                current_price: 43_500.0,
                price_change_24h: 1.5,
                volume_24h: 2.0e10,
                market_cap: Some(8.5e11),
                market_cap_rank: Some(1),
                ath: Some(69_000.0),
                ath_date: None,
                atl: Some(67.81),
                atl_date: None,
            }])
        })
    }
}

#[tokio::test]
async fn when_reference_is_stored_scanner_attaches_it_to_the_asset() {
    // Given: A service whose store already holds a fresh BTC reference
    let service = Arc::new(AsianRangeService::new(
        GatedCandles::new(),
        AsianRangeStore::new(),
        AsianRangeConfig::default(),
    ));
    let reference = AsianRangeExtractor::default()
        .extract(&btc(), &week_of_candles(), UtcDateTime::now())
        .expect("session present");
    service.store().record_success(reference, UtcDateTime::now());

    let scanner =
        Scanner::new(Arc::new(OneMarket), ScannerConfig::default()).with_asian_range(service);

    // When: BTC is looked up
    let asset = scanner.find("BTC", false).await.expect("listed");

    // Then: The stored reference rides along without a new fetch
    let attached = asset.asian_range.expect("reference attached");
    assert_eq!(attached.reference_price, 101.0);
    assert!(scanner.asian_range().is_some_and(|service| !service.is_refreshing()));
}
