use std::sync::Arc;

use tradescan_core::adapters::coingecko::API_KEY_HEADER;
use tradescan_core::{
    AsianRangeService, AsianRangeStore, BinanceFuturesAdapter, CoinGeckoAdapter, HttpAuth,
    HttpClient, ReqwestHttpClient, Scanner, Throttle, TtlCache, Upstream,
};

use crate::cli::Cli;

/// Shared handler state. Cloning is cheap; everything behind it is reference counted.
#[derive(Debug, Clone)]
pub struct AppState {
    pub scanner: Arc<Scanner>,
    pub cache: TtlCache<String>,
}

impl AppState {
    pub fn new(scanner: Scanner, cache: TtlCache<String>) -> Self {
        Self {
            scanner: Arc::new(scanner),
            cache,
        }
    }

    /// Wire both providers over one HTTP pool and one response cache.
    pub fn from_cli(cli: &Cli) -> Self {
        let http: Arc<dyn HttpClient> = Arc::new(ReqwestHttpClient::new());
        let cache = TtlCache::new(cli.cache_config());

        let mut coingecko_upstream = Upstream::new(
            "coingecko",
            Arc::clone(&http),
            cache.clone(),
            Throttle::new("coingecko", cli.coingecko_throttle()),
        );
        if let Some(key) = cli.coingecko_api_key.as_deref().filter(|key| !key.is_empty()) {
            coingecko_upstream =
                coingecko_upstream.with_auth(HttpAuth::header(API_KEY_HEADER, key));
        }
        let markets = CoinGeckoAdapter::new(cli.coingecko_api_url.clone(), coingecko_upstream);

        let mut scanner = Scanner::new(Arc::new(markets), cli.scanner_config());

        let asian_range = cli.asian_range_config();
        if asian_range.enabled {
            let binance_upstream = Upstream::new(
                "binance",
                http,
                cache.clone(),
                Throttle::new("binance", cli.binance_throttle()),
            );
            let candles =
                BinanceFuturesAdapter::new(cli.binance_futures_api_url.clone(), binance_upstream);
            let service =
                AsianRangeService::new(Arc::new(candles), AsianRangeStore::new(), asian_range);
            scanner = scanner.with_asian_range(Arc::new(service));
        }

        tracing::info!(
            coingecko = %cli.coingecko_api_url,
            binance = %cli.binance_futures_api_url,
            api_key = cli.coingecko_api_key.is_some(),
            asian_range = asian_range.enabled,
            session = %asian_range.session,
            "providers configured"
        );

        Self::new(scanner, cache)
    }
}
