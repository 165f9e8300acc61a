//! # Tradescan Core
//!
//! Market-scanning engine behind the `tradescan` REST service.
//!
//! ## Overview
//!
//! - **Fibonacci engine** computing retracement/extension levels from ATH/ATL
//! - **Asian-range extractor** deriving a weekly session reference price from candles
//! - **TTL cache** and **rate limiter** governing every upstream call
//! - **Scanner** composing the above over a ranked market snapshot
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`adapters`] | CoinGecko markets and Binance futures klines |
//! | [`asian_range`] | Session extractor, reference store, background refresher |
//! | [`cache`] | In-memory TTL cache with stats |
//! | [`data_source`] | Provider traits, request types, `SourceError` |
//! | [`domain`] | Symbol, timestamps, snapshots, candles |
//! | [`error`] | Core error types |
//! | [`fibonacci`] | Fibonacci levels and support/resistance |
//! | [`http_client`] | HTTP transport abstraction |
//! | [`retry`] | Bounded exponential backoff |
//! | [`scanner`] | Scan, filter and sort enriched assets |
//! | [`throttling`] | Trailing-window rate limiter |
//! | [`upstream`] | Cached, throttled, retried GET |
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐      ┌─────────────────────┐
//! │    Scanner      │─────▶│ AsianRangeService   │
//! └────────┬────────┘      └──────────┬──────────┘
//!          │                          │
//!          ▼                          ▼
//! ┌─────────────────┐      ┌─────────────────────┐
//! │ CoinGeckoAdapter│      │ BinanceFutures      │
//! └────────┬────────┘      └──────────┬──────────┘
//!          └────────────┬─────────────┘
//!                       ▼
//!             ┌───────────────────┐
//!             │ Upstream          │ cache → throttle → retry
//!             └─────────┬─────────┘
//!                       ▼
//!             ┌───────────────────┐
//!             │ HttpClient        │
//!             └───────────────────┘
//! ```
//!
//! ## Error Handling
//!
//! ```rust
//! use tradescan_core::{SourceError, SourceErrorKind};
//!
//! fn describe(error: &SourceError) -> &'static str {
//!     match error.kind() {
//!         SourceErrorKind::RateLimited => "slow down",
//!         SourceErrorKind::Unavailable => "upstream down",
//!         SourceErrorKind::InvalidRequest => "bad request",
//!         SourceErrorKind::Internal => "bug or bad payload",
//!     }
//! }
//! ```
//!
//! ## Security
//!
//! - API keys come from configuration only and are redacted from `Debug` output

pub mod adapters;
pub mod asian_range;
pub mod cache;
pub mod data_source;
pub mod domain;
pub mod error;
pub mod fibonacci;
pub mod http_client;
pub mod retry;
pub mod scanner;
pub mod throttling;
pub mod upstream;

// Adapter implementations
pub use adapters::{BinanceFuturesAdapter, CoinGeckoAdapter};

// Asian range
pub use asian_range::{
    AsianRangeConfig, AsianRangeExtractor, AsianRangeReference, AsianRangeService,
    AsianRangeStore, RefreshReport, SessionSpec, SessionWindow,
};

// Caching
pub use cache::{CacheConfig, CacheStats, TtlCache};

// Provider contracts
pub use data_source::{
    CandleSource, CandlesRequest, MarketSnapshotSource, MarketsRequest, SourceError,
    SourceErrorKind,
};

// Domain models
pub use domain::{AssetSnapshot, Candle, Interval, Symbol, UtcDateTime};

// Error types
pub use error::{CoreError, ValidationError};

// Fibonacci engine
pub use fibonacci::{FibonacciAnalysis, FibonacciError, FibonacciLevel, LevelKind};

// HTTP client types
pub use http_client::{
    HttpAuth, HttpClient, HttpError, HttpErrorKind, HttpRequest, HttpResponse,
    ReqwestHttpClient,
};

// Retry logic
pub use retry::{Backoff, RetryConfig};

// Scanner
pub use scanner::{
    AthAtl, EnrichedAsset, ScanFilters, ScanRequest, ScanResult, Scanner, ScannerConfig, SortKey,
};

// Throttling
pub use throttling::{
    retry_after_secs, RateLimitExceeded, Throttle, ThrottleConfig, ThrottleMode,
};

// Upstream access
pub use upstream::Upstream;
