//! Collaborator contracts for the two upstream providers.
//!
//! | Trait | Request | Response | Provider |
//! |-------|---------|----------|----------|
//! | [`MarketSnapshotSource`] | [`MarketsRequest`] | `Vec<AssetSnapshot>` | spot market-cap ranking |
//! | [`CandleSource`] | [`CandlesRequest`] | `Vec<Candle>` | perpetual-futures klines |
//!
//! Both traits return boxed futures so they stay object safe and can be shared as
//! `Arc<dyn ...>` between the scanner and the Asian-range refresher.

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::throttling::RateLimitExceeded;
use crate::{AssetSnapshot, Candle, Interval, Symbol, ValidationError};

/// Largest page the market snapshot provider serves.
pub const MAX_MARKETS_PAGE: usize = 250;
/// Largest candle batch the futures venue serves per call.
pub const MAX_CANDLES: usize = 1_500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceErrorKind {
    Unavailable,
    RateLimited,
    InvalidRequest,
    Internal,
}

/// Classified upstream failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceError {
    kind: SourceErrorKind,
    message: String,
    retryable: bool,
    retry_after: Option<Duration>,
}

impl SourceError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::Unavailable,
            message: message.into(),
            retryable: true,
            retry_after: None,
        }
    }

    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self {
            kind: SourceErrorKind::RateLimited,
            message: message.into(),
            retryable: true,
            retry_after,
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::InvalidRequest,
            message: message.into(),
            retryable: false,
            retry_after: None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::Internal,
            message: message.into(),
            retryable: false,
            retry_after: None,
        }
    }

    pub const fn kind(&self) -> SourceErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn retryable(&self) -> bool {
        self.retryable
    }

    pub const fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            SourceErrorKind::Unavailable => "source.unavailable",
            SourceErrorKind::RateLimited => "source.rate_limited",
            SourceErrorKind::InvalidRequest => "source.invalid_request",
            SourceErrorKind::Internal => "source.internal",
        }
    }
}

impl Display for SourceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for SourceError {}

impl From<RateLimitExceeded> for SourceError {
    fn from(exceeded: RateLimitExceeded) -> Self {
        Self::rate_limited(
            format!(
                "local rate limit reached; retry in {:.2}s",
                exceeded.retry_after.as_secs_f64()
            ),
            Some(exceeded.retry_after),
        )
    }
}

impl From<ValidationError> for SourceError {
    fn from(error: ValidationError) -> Self {
        Self::invalid_request(error.to_string())
    }
}

/// One page of the market-cap ranking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketsRequest {
    pub vs_currency: String,
    pub per_page: usize,
    pub page: u32,
    pub timeout: Duration,
}

impl MarketsRequest {
    pub fn new(per_page: usize) -> Result<Self, SourceError> {
        if per_page == 0 || per_page > MAX_MARKETS_PAGE {
            return Err(SourceError::invalid_request(format!(
                "markets page size must be between 1 and {MAX_MARKETS_PAGE}, got {per_page}"
            )));
        }
        Ok(Self {
            vs_currency: String::from("usd"),
            per_page,
            page: 1,
            timeout: Duration::from_secs(15),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Most recent `limit` candles of one symbol's perpetual contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandlesRequest {
    pub symbol: Symbol,
    pub interval: Interval,
    pub limit: usize,
    pub timeout: Duration,
}

impl CandlesRequest {
    pub fn new(symbol: Symbol, interval: Interval, limit: usize) -> Result<Self, SourceError> {
        if limit == 0 || limit > MAX_CANDLES {
            return Err(SourceError::invalid_request(format!(
                "candle limit must be between 1 and {MAX_CANDLES}, got {limit}"
            )));
        }
        Ok(Self {
            symbol,
            interval,
            limit,
            timeout: Duration::from_secs(5),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

pub trait MarketSnapshotSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Validated snapshots in provider order. Unusable items are dropped, not fatal.
    fn markets<'a>(
        &'a self,
        request: MarketsRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<AssetSnapshot>, SourceError>> + Send + 'a>>;
}

pub trait CandleSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Candles ordered ascending by open time.
    fn candles<'a>(
        &'a self,
        request: CandlesRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Candle>, SourceError>> + Send + 'a>>;
}
