//! Fibonacci retracement/extension levels from an ATH/ATL range.
//!
//! Everything here is pure arithmetic on `f64`. Values are never rounded before they
//! feed another computation; [`round_price`] and [`round_percentage`] exist for
//! display only.
//!
//! Both level families are framed from the high toward the low:
//!
//! ```text
//! price(r) = ath - r * (ath - atl)
//! ```
//!
//! so `r = 0` is the ATH, `r = 1` is the ATL, and extension ratios (`r > 1`) continue
//! below the historical low. Extension prices are not clamped and can be negative for
//! large ratios against a narrow range.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Symbol;

/// Retracement ratios with display labels, ascending.
pub const RETRACEMENT_RATIOS: [(f64, &str); 7] = [
    (0.0, "0%"),
    (0.236, "23.6%"),
    (0.382, "38.2%"),
    (0.5, "50%"),
    (0.618, "61.8%"),
    (0.786, "78.6%"),
    (1.0, "100%"),
];

/// Extension ratios with display labels, ascending.
pub const EXTENSION_RATIOS: [(f64, &str); 4] = [
    (1.272, "127.2%"),
    (1.618, "161.8%"),
    (2.618, "261.8%"),
    (4.236, "423.6%"),
];

#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum FibonacciError {
    #[error("invalid range: ath ({ath}) must be greater than atl ({atl})")]
    InvalidRange { ath: f64, atl: f64 },
    #[error("{field} must be a finite positive price, got {value}")]
    InvalidPrice { field: &'static str, value: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelKind {
    Retracement,
    Extension,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FibonacciLevel {
    pub level: f64,
    pub price: f64,
    pub label: String,
    #[serde(rename = "type")]
    pub kind: LevelKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FibonacciAnalysis {
    pub symbol: Symbol,
    pub ath: f64,
    pub atl: f64,
    pub current_price: f64,
    pub price_range: f64,
    /// Where the current price sits in the ATL (0) .. ATH (100) range. Values outside
    /// 0..=100 mean the price is beyond a historical extreme.
    pub position_percentage: f64,
    pub retracement_levels: Vec<FibonacciLevel>,
    pub extension_levels: Vec<FibonacciLevel>,
    pub nearest_support: Option<FibonacciLevel>,
    pub nearest_resistance: Option<FibonacciLevel>,
}

impl FibonacciAnalysis {
    pub fn is_above_ath(&self) -> bool {
        self.position_percentage > 100.0
    }

    pub fn is_below_atl(&self) -> bool {
        self.position_percentage < 0.0
    }
}

/// Run the full analysis for one asset.
pub fn analyze(
    symbol: Symbol,
    ath: f64,
    atl: f64,
    current_price: f64,
) -> Result<FibonacciAnalysis, FibonacciError> {
    validate_price("current_price", current_price)?;
    let price_range = validated_range(ath, atl)?;

    let retracement_levels =
        build_levels(ath, price_range, &RETRACEMENT_RATIOS, LevelKind::Retracement);
    let extension_levels =
        build_levels(ath, price_range, &EXTENSION_RATIOS, LevelKind::Extension);
    let (nearest_support, nearest_resistance) = nearest_levels(current_price, &retracement_levels);
    let position_percentage = position_percentage(current_price, atl, price_range);

    tracing::debug!(
        %symbol,
        position = round_percentage(position_percentage),
        support = ?nearest_support.as_ref().map(|level| round_price(level.price)),
        resistance = ?nearest_resistance.as_ref().map(|level| round_price(level.price)),
        "fibonacci analysis computed"
    );

    Ok(FibonacciAnalysis {
        symbol,
        ath,
        atl,
        current_price,
        price_range,
        position_percentage,
        retracement_levels,
        extension_levels,
        nearest_support,
        nearest_resistance,
    })
}

pub fn retracement_levels(ath: f64, atl: f64) -> Result<Vec<FibonacciLevel>, FibonacciError> {
    let price_range = validated_range(ath, atl)?;
    Ok(build_levels(ath, price_range, &RETRACEMENT_RATIOS, LevelKind::Retracement))
}

pub fn extension_levels(ath: f64, atl: f64) -> Result<Vec<FibonacciLevel>, FibonacciError> {
    let price_range = validated_range(ath, atl)?;
    Ok(build_levels(ath, price_range, &EXTENSION_RATIOS, LevelKind::Extension))
}

/// 50% level of a candle-body range.
pub fn asian_range_midpoint(body_high: f64, body_low: f64) -> Result<f64, FibonacciError> {
    validate_price("body_high", body_high)?;
    validate_price("body_low", body_low)?;
    if body_high < body_low {
        return Err(FibonacciError::InvalidRange {
            ath: body_high,
            atl: body_low,
        });
    }
    Ok((body_high + body_low) / 2.0)
}

/// Nearest retracement levels strictly below (support) and strictly above
/// (resistance) the current price.
pub fn nearest_levels(
    current_price: f64,
    levels: &[FibonacciLevel],
) -> (Option<FibonacciLevel>, Option<FibonacciLevel>) {
    let support = levels
        .iter()
        .filter(|level| level.price < current_price)
        .max_by(|a, b| a.price.total_cmp(&b.price))
        .cloned();
    let resistance = levels
        .iter()
        .filter(|level| level.price > current_price)
        .min_by(|a, b| a.price.total_cmp(&b.price))
        .cloned();
    (support, resistance)
}

pub fn round_price(value: f64) -> f64 {
    (value * 1e8).round() / 1e8
}

pub fn round_percentage(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn position_percentage(current_price: f64, atl: f64, price_range: f64) -> f64 {
    (current_price - atl) / price_range * 100.0
}

fn build_levels(
    ath: f64,
    price_range: f64,
    ratios: &[(f64, &str)],
    kind: LevelKind,
) -> Vec<FibonacciLevel> {
    ratios
        .iter()
        .map(|&(ratio, label)| FibonacciLevel {
            level: ratio,
            price: ath - ratio * price_range,
            label: label.to_owned(),
            kind,
        })
        .collect()
}

fn validated_range(ath: f64, atl: f64) -> Result<f64, FibonacciError> {
    validate_price("ath", ath)?;
    validate_price("atl", atl)?;
    if ath <= atl {
        return Err(FibonacciError::InvalidRange { ath, atl });
    }
    Ok(ath - atl)
}

fn validate_price(field: &'static str, value: f64) -> Result<(), FibonacciError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(FibonacciError::InvalidPrice { field, value })
    }
}
