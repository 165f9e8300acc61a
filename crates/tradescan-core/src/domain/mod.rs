//! # Domain Models
//!
//! Strongly-typed records that upstream payloads are coerced into on receipt.
//! Nothing downstream (Fibonacci engine, Asian-range extractor, scanner) ever sees
//! raw provider JSON.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`AssetSnapshot`] | Ranked spot snapshot with ATH/ATL |
//! | [`Candle`] | Futures OHLCV candle |
//! | [`Interval`] | Candle interval |
//! | [`Symbol`] | Normalized uppercase ticker |
//! | [`UtcDateTime`] | UTC timestamp |

mod candle;
mod snapshot;
mod symbol;
mod timestamp;

pub use candle::{Candle, Interval};
pub use snapshot::AssetSnapshot;
pub use symbol::Symbol;
pub use timestamp::UtcDateTime;
