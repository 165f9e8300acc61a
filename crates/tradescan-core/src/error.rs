use thiserror::Error;

use crate::data_source::SourceError;
use crate::fibonacci::FibonacciError;

/// Validation errors raised while coercing upstream payloads and request parameters
/// into domain types.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("symbol cannot be empty")]
    EmptySymbol,
    #[error("symbol length {len} exceeds max {max}")]
    SymbolTooLong { len: usize, max: usize },
    #[error("symbol contains invalid character '{ch}' at index {index}")]
    SymbolInvalidChar { ch: char, index: usize },

    #[error("timestamp must be RFC3339: '{value}'")]
    InvalidTimestamp { value: String },
    #[error("epoch millisecond timestamp {value} is out of range")]
    TimestampOutOfRange { value: i64 },

    #[error("invalid interval '{value}', expected one of 15m, 1h, 4h, 1d")]
    InvalidInterval { value: String },
    #[error(
        "invalid sort key '{value}', expected one of rank, volume, market_cap, change_24h, \
         fib_position"
    )]
    InvalidSortKey { value: String },
    #[error("invalid session preset '{value}', expected thursday-ny or friday-asia")]
    InvalidSessionPreset { value: String },
    #[error("invalid rate limit mode '{value}', expected reject or wait")]
    InvalidThrottleMode { value: String },

    #[error("field '{field}' is missing")]
    MissingField { field: &'static str },
    #[error("field '{field}' must be finite")]
    NonFiniteValue { field: &'static str },
    #[error("field '{field}' must be non-negative")]
    NegativeValue { field: &'static str },
    #[error("field '{field}' must be greater than zero")]
    NonPositiveValue { field: &'static str },

    #[error("candle high must be >= low")]
    InvalidCandleRange,

    #[error("limit must be between 1 and {max}, got {value}")]
    InvalidLimit { value: usize, max: usize },
    #[error("filter '{field}' lower bound {min} exceeds upper bound {max}")]
    InvertedFilterBounds {
        field: &'static str,
        min: f64,
        max: f64,
    },
}

/// Top-level error type for scanner operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Fibonacci(#[from] FibonacciError),

    #[error("coin with symbol '{symbol}' not found")]
    NotFound { symbol: String },

    #[error("{what} not available for '{symbol}'")]
    AnalysisUnavailable { symbol: String, what: &'static str },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
