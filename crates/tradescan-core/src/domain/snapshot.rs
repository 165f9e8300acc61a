use serde::{Deserialize, Serialize};

use crate::{Symbol, UtcDateTime, ValidationError};

/// Market snapshot of one asset, as ranked by the spot market-cap provider.
///
/// `ath` and `atl` are checked individually (finite, positive) but never against each
/// other: an inverted pair is left for the Fibonacci engine to reject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetSnapshot {
    pub coin_id: String,
    pub symbol: Symbol,
    pub name: String,
    pub current_price: f64,
    pub price_change_24h: f64,
    pub volume_24h: f64,
    pub market_cap: Option<f64>,
    pub market_cap_rank: Option<u32>,
    pub ath: Option<f64>,
    pub ath_date: Option<UtcDateTime>,
    pub atl: Option<f64>,
    pub atl_date: Option<UtcDateTime>,
}

impl AssetSnapshot {
    /// Check numeric invariants and return the snapshot unchanged when they hold.
    pub fn validate(self) -> Result<Self, ValidationError> {
        validate_positive("current_price", self.current_price)?;
        validate_finite("price_change_24h", self.price_change_24h)?;
        validate_non_negative("volume_24h", self.volume_24h)?;
        validate_optional_non_negative("market_cap", self.market_cap)?;
        validate_optional_positive("ath", self.ath)?;
        validate_optional_positive("atl", self.atl)?;

        if self.market_cap_rank == Some(0) {
            return Err(ValidationError::NonPositiveValue {
                field: "market_cap_rank",
            });
        }

        Ok(self)
    }

    /// ATH/ATL pair when the provider reported both.
    pub fn ath_atl(&self) -> Option<(f64, f64)> {
        self.ath.zip(self.atl)
    }
}

pub(crate) fn validate_finite(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ValidationError::NonFiniteValue { field })
    }
}

pub(crate) fn validate_non_negative(
    field: &'static str,
    value: f64,
) -> Result<(), ValidationError> {
    validate_finite(field, value)?;
    if value < 0.0 {
        return Err(ValidationError::NegativeValue { field });
    }
    Ok(())
}

pub(crate) fn validate_positive(field: &'static str, value: f64) -> Result<(), ValidationError> {
    validate_finite(field, value)?;
    if value <= 0.0 {
        return Err(ValidationError::NonPositiveValue { field });
    }
    Ok(())
}

fn validate_optional_non_negative(
    field: &'static str,
    value: Option<f64>,
) -> Result<(), ValidationError> {
    value.map_or(Ok(()), |value| validate_non_negative(field, value))
}

fn validate_optional_positive(
    field: &'static str,
    value: Option<f64>,
) -> Result<(), ValidationError> {
    value.map_or(Ok(()), |value| validate_positive(field, value))
}
