use serde::{Deserialize, Serialize};

/// Vendor timestamp: epoch milliseconds or an RFC 3339 string.
///
/// `Float` catches numeric epochs that are not exact `i64`s (`1.7e12`, or
/// integers past `i64::MAX`) so the normalizer can judge them instead of the
/// whole payload failing to decode.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    Millis(i64),
    Float(f64),
    Text(String),
}

/// Trade print as sent by streaming vendors (`"ev": "trade"`).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawTrade {
    #[serde(default)]
    pub sym: String,
    #[serde(default)]
    pub p: f64,
    #[serde(default)]
    pub s: f64,
    pub t: Option<RawTimestamp>,
    #[serde(default, rename = "float")]
    pub float_shares: Option<f64>,
    #[serde(default)]
    pub open: Option<f64>,
}

/// Polled snapshot row (`"ev": "quote"`), the shape the dashboard fetched
/// per symbol: last price, day volume, float and the session open.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawSnapshot {
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub last_price: f64,
    #[serde(default)]
    pub day_volume: f64,
    #[serde(default)]
    pub float_shares: Option<f64>,
    #[serde(default)]
    pub open: Option<f64>,
    pub timestamp: Option<RawTimestamp>,
}

/// Every payload shape the normalizer understands, tagged by `ev`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "ev", rename_all = "snake_case")]
pub enum RawTick {
    Trade(RawTrade),
    Quote(RawSnapshot),
}

/// Canonical quote record. Immutable once built by the normalizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub ts_ms: u64,
    pub price: f64,
    pub volume: u64,
    /// Publicly tradable shares, when the vendor reports it.
    pub float_shares: Option<u64>,
    /// Session opening price, when the vendor reports it.
    pub session_open: Option<f64>,
}

/// Point-in-time view of a symbol's rolling statistics, handed to the
/// evaluator. `rolling_average_volume` is the baseline of the samples seen
/// *before* this tick; zero means no baseline yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolSnapshot {
    pub symbol: String,
    pub ts_ms: u64,
    pub price: f64,
    pub volume: u64,
    pub float_shares: Option<u64>,
    pub reference_price: f64,
    pub rolling_average_volume: f64,
    pub samples: usize,
    pub last_alert_ms: Option<u64>,
    pub cooling_down: bool,
}

impl SymbolSnapshot {
    /// `(price - reference) / reference`, or `None` without a positive reference.
    pub fn price_change_pct(&self) -> Option<f64> {
        if self.reference_price > 0.0 {
            Some((self.price - self.reference_price) / self.reference_price)
        } else {
            None
        }
    }

    /// `volume / rolling_average_volume`, or `None` without a baseline.
    pub fn volume_multiple(&self) -> Option<f64> {
        if self.rolling_average_volume > 0.0 {
            Some(self.volume as f64 / self.rolling_average_volume)
        } else {
            None
        }
    }
}
