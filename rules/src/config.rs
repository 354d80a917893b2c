use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::evaluator::{RuleId, RuleSet};

/// Inclusive price band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceRange {
    pub low: f64,
    pub high: f64,
}

impl PriceRange {
    pub fn contains(&self, price: f64) -> bool {
        self.low <= price && price <= self.high
    }
}

/// Threshold configuration for one scan session.
///
/// Each field is one trigger; `None` leaves that trigger unconfigured. A
/// symbol matches only when every configured trigger holds, so a config with
/// nothing set never matches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Fractional change vs. the reference price (`0.10` = +10%).
    #[serde(default)]
    pub min_price_change_pct: Option<f64>,

    /// Current volume as a multiple of the rolling average.
    #[serde(default)]
    pub min_volume_multiple: Option<f64>,

    /// Maximum float, in shares.
    #[serde(default)]
    pub max_float: Option<f64>,

    #[serde(default)]
    pub price_range: Option<PriceRange>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuleConfigError {
    #[error("{field} must be a finite number")]
    NotFinite { field: &'static str },

    #[error("{field} must not be negative (got {value})")]
    Negative { field: &'static str, value: f64 },

    #[error("price_range.low ({low}) is greater than price_range.high ({high})")]
    InvertedRange { low: f64, high: f64 },
}

impl RuleConfig {
    /// The screen the dashboard shipped with: $2–$20, float under 10M shares,
    /// volume at least 5x its average.
    pub fn dashboard_defaults() -> Self {
        Self {
            min_price_change_pct: None,
            min_volume_multiple: Some(5.0),
            max_float: Some(10_000_000.0),
            price_range: Some(PriceRange {
                low: 2.0,
                high: 20.0,
            }),
        }
    }

    /// Triggers this config turns on.
    pub fn configured(&self) -> RuleSet {
        let mut set = RuleSet::EMPTY;
        if self.min_price_change_pct.is_some() {
            set.insert(RuleId::Price);
        }
        if self.min_volume_multiple.is_some() {
            set.insert(RuleId::Volume);
        }
        if self.max_float.is_some() {
            set.insert(RuleId::Float);
        }
        if self.price_range.is_some() {
            set.insert(RuleId::Range);
        }
        set
    }

    pub fn validate(&self) -> Result<(), RuleConfigError> {
        if let Some(v) = self.min_price_change_pct {
            finite("min_price_change_pct", v)?;
        }
        if let Some(v) = self.min_volume_multiple {
            non_negative("min_volume_multiple", v)?;
        }
        if let Some(v) = self.max_float {
            non_negative("max_float", v)?;
        }
        if let Some(r) = self.price_range {
            non_negative("price_range.low", r.low)?;
            non_negative("price_range.high", r.high)?;
            if r.low > r.high {
                return Err(RuleConfigError::InvertedRange {
                    low: r.low,
                    high: r.high,
                });
            }
        }
        Ok(())
    }
}

fn finite(field: &'static str, v: f64) -> Result<(), RuleConfigError> {
    if v.is_finite() {
        Ok(())
    } else {
        Err(RuleConfigError::NotFinite { field })
    }
}

fn non_negative(field: &'static str, v: f64) -> Result<(), RuleConfigError> {
    finite(field, v)?;
    if v < 0.0 {
        return Err(RuleConfigError::Negative { field, value: v });
    }
    Ok(())
}
