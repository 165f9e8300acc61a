//! Provider adapters.
//!
//! Each adapter turns one upstream API into a [`crate::data_source`] trait, routing
//! its GETs through an [`Upstream`](crate::upstream::Upstream) so caching, rate
//! limiting and retries apply uniformly.

pub mod binance;
pub mod coingecko;

pub use binance::BinanceFuturesAdapter;
pub use coingecko::CoinGeckoAdapter;
