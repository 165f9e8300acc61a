//! # Asian Range
//!
//! A weekly reference price: the midpoint of the candle-body range traded during one
//! recurring session window.
//!
//! - [`AsianRangeExtractor`] is the pure computation over an ascending candle series.
//! - [`AsianRangeStore`] keeps the latest reference per symbol.
//! - [`AsianRangeService`] refreshes stale symbols in the background.
//!
//! Only the most recent occurrence of the session weekday is ever used. If it holds
//! too few candles the newest raw candles are used instead and the reference is
//! flagged `used_fallback`.

mod refresh;
mod store;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::macros::offset;
use time::{Date, UtcOffset, Weekday};

use crate::fibonacci::asian_range_midpoint;
use crate::{Candle, Interval, Symbol, UtcDateTime, ValidationError};

pub use refresh::{AsianRangeService, RefreshReport};
pub use store::AsianRangeStore;

time::serde::format_description!(iso_date, Date, "[year]-[month]-[day]");

/// Recurring weekly session, expressed in a fixed UTC offset (no DST).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSpec {
    pub weekday: Weekday,
    pub start_hour: u8,
    /// Inclusive: `23` covers 23:00 through 23:59.
    pub end_hour: u8,
    pub utc_offset: UtcOffset,
}

impl SessionSpec {
    /// Thursday 19:00-23:59 at UTC-5.
    pub fn thursday_new_york() -> Self {
        Self {
            weekday: Weekday::Thursday,
            start_hour: 19,
            end_hour: 23,
            utc_offset: offset!(-5),
        }
    }

    /// Friday 00:00-07:59 UTC.
    pub fn friday_asia_utc() -> Self {
        Self {
            weekday: Weekday::Friday,
            start_hour: 0,
            end_hour: 7,
            utc_offset: UtcOffset::UTC,
        }
    }

    pub fn contains_hour(&self, hour: u8) -> bool {
        (self.start_hour..=self.end_hour).contains(&hour)
    }
}

impl Default for SessionSpec {
    fn default() -> Self {
        Self::thursday_new_york()
    }
}

impl FromStr for SessionSpec {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "thursday-ny" => Ok(Self::thursday_new_york()),
            "friday-asia" => Ok(Self::friday_asia_utc()),
            _ => Err(ValidationError::InvalidSessionPreset {
                value: value.to_owned(),
            }),
        }
    }
}

impl fmt::Display for SessionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:02}:00-{:02}:59 UTC{}",
            self.weekday, self.start_hour, self.end_hour, self.utc_offset
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionWindow {
    pub start: UtcDateTime,
    pub end: UtcDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsianRangeReference {
    pub symbol: Symbol,
    pub reference_price: f64,
    pub body_high: f64,
    pub body_low: f64,
    pub candle_count: usize,
    pub used_fallback: bool,
    /// Local calendar date of the matched session; `None` when the fallback was used.
    #[serde(with = "iso_date::option")]
    pub session_date: Option<Date>,
    pub computed_at: UtcDateTime,
    /// Open times of the oldest and newest candle that were scanned.
    pub session_window: SessionWindow,
}

/// Everything that controls the extractor, the store and the refresher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AsianRangeConfig {
    pub enabled: bool,
    pub session: SessionSpec,
    pub interval: Interval,
    /// Calendar days of candles fetched per symbol.
    pub lookback_days: usize,
    pub min_session_candles: usize,
    pub fallback_candles: usize,
    /// A stored reference older than this is recomputed.
    pub max_age: time::Duration,
    /// A symbol whose last attempt failed is not retried before this elapses.
    pub retry_failed_after: time::Duration,
    pub max_concurrency: usize,
    pub fetch_timeout: std::time::Duration,
}

impl Default for AsianRangeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            session: SessionSpec::default(),
            interval: Interval::OneHour,
            lookback_days: 5,
            min_session_candles: 3,
            fallback_candles: 5,
            max_age: time::Duration::days(7),
            retry_failed_after: time::Duration::hours(1),
            max_concurrency: 10,
            fetch_timeout: std::time::Duration::from_secs(5),
        }
    }
}

impl AsianRangeConfig {
    /// Candles requested per symbol.
    pub fn candle_limit(&self) -> usize {
        (self.interval.per_day() * self.lookback_days).max(1)
    }

    pub fn extractor(&self) -> AsianRangeExtractor {
        AsianRangeExtractor {
            session: self.session,
            min_session_candles: self.min_session_candles,
            fallback_candles: self.fallback_candles,
        }
    }
}

/// Pure session extractor. Never reads the clock: `computed_at` is supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AsianRangeExtractor {
    pub session: SessionSpec,
    pub min_session_candles: usize,
    pub fallback_candles: usize,
}

impl Default for AsianRangeExtractor {
    fn default() -> Self {
        AsianRangeConfig::default().extractor()
    }
}

impl AsianRangeExtractor {
    /// Reference for `candles` (ascending by open time), or `None` when nothing usable
    /// remains after the fallback.
    pub fn extract(
        &self,
        symbol: &Symbol,
        candles: &[Candle],
        computed_at: UtcDateTime,
    ) -> Option<AsianRangeReference> {
        let session_window = SessionWindow {
            start: candles.first()?.opened_at().ok()?,
            end: candles.last()?.opened_at().ok()?,
        };

        let (session, session_date) = self.session_candles(candles);
        let session_count = session.len();
        let (selected, used_fallback, session_date) = if session_count >= self.min_session_candles {
            (session, false, session_date)
        } else {
            let start = candles.len().saturating_sub(self.fallback_candles);
            (candles[start..].to_vec(), true, None)
        };

        if selected.is_empty() {
            return None;
        }

        let body_high = selected
            .iter()
            .map(Candle::body_high)
            .fold(f64::NEG_INFINITY, f64::max);
        let body_low = selected
            .iter()
            .map(Candle::body_low)
            .fold(f64::INFINITY, f64::min);
        let reference_price = asian_range_midpoint(body_high, body_low).ok()?;

        if used_fallback {
            tracing::debug!(
                %symbol,
                session_candles = session_count,
                fallback_candles = selected.len(),
                "asian range session too sparse, using newest candles"
            );
        }

        Some(AsianRangeReference {
            symbol: symbol.clone(),
            reference_price,
            body_high,
            body_low,
            candle_count: selected.len(),
            used_fallback,
            session_date,
            computed_at,
            session_window,
        })
    }

    // Newest to oldest: enter at the first candle on the session weekday and leave at
    // the first candle on any other weekday after that.
    fn session_candles(&self, candles: &[Candle]) -> (Vec<Candle>, Option<Date>) {
        let mut session = Vec::new();
        let mut entered_on: Option<Date> = None;

        for candle in candles.iter().rev() {
            let Ok(opened_at) = candle.opened_at() else {
                continue;
            };
            let local = opened_at.into_inner().to_offset(self.session.utc_offset);

            if local.weekday() != self.session.weekday {
                if entered_on.is_some() {
                    break;
                }
                continue;
            }

            entered_on.get_or_insert(local.date());
            if self.session.contains_hour(local.hour()) {
                session.push(*candle);
            }
        }

        (session, entered_on)
    }
}
