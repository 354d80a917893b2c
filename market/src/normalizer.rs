//! Tick Normalizer
//!
//! Converts vendor payloads into the canonical [`Quote`]. Anything that does
//! not decode into one of the known [`RawTick`] shapes, or that carries
//! impossible values, is rejected with [`MalformedTick`]. Callers count and
//! drop those; a bad tick never stops the pipeline.

use chrono::DateTime;
use serde_json::Value;
use thiserror::Error;

use crate::types::{Quote, RawSnapshot, RawTick, RawTimestamp, RawTrade};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MalformedTick {
    #[error("payload is not valid json: {0}")]
    Decode(String),

    #[error("unrecognized tick shape: {0}")]
    UnrecognizedShape(String),

    #[error("tick has no symbol")]
    MissingSymbol,

    #[error("non-positive price: {0}")]
    NonPositivePrice(f64),

    #[error("volume below one share: {0}")]
    VolumeBelowOneShare(f64),

    #[error("float below one share: {0}")]
    FloatBelowOneShare(f64),

    #[error("non-positive session open: {0}")]
    NonPositiveOpen(f64),

    #[error("bad timestamp: {0}")]
    BadTimestamp(String),
}

impl MalformedTick {
    /// Stable label for logs and counters.
    pub fn reason(&self) -> &'static str {
        match self {
            MalformedTick::Decode(_) => "decode",
            MalformedTick::UnrecognizedShape(_) => "unrecognized_shape",
            MalformedTick::MissingSymbol => "missing_symbol",
            MalformedTick::NonPositivePrice(_) => "non_positive_price",
            MalformedTick::VolumeBelowOneShare(_) => "volume_below_one_share",
            MalformedTick::FloatBelowOneShare(_) => "float_below_one_share",
            MalformedTick::NonPositiveOpen(_) => "non_positive_open",
            MalformedTick::BadTimestamp(_) => "bad_timestamp",
        }
    }
}

/// Decode a JSON payload into one of the known raw shapes.
pub fn decode(payload: &str) -> Result<RawTick, MalformedTick> {
    let value: Value =
        serde_json::from_str(payload).map_err(|e| MalformedTick::Decode(e.to_string()))?;

    serde_json::from_value(value).map_err(|e| MalformedTick::UnrecognizedShape(e.to_string()))
}

/// Validate a raw tick and build the canonical quote.
pub fn normalize(raw: RawTick) -> Result<Quote, MalformedTick> {
    match raw {
        RawTick::Trade(RawTrade {
            sym,
            p,
            s,
            t,
            float_shares,
            open,
        }) => build(sym, p, s, t, float_shares, open),
        RawTick::Quote(RawSnapshot {
            symbol,
            last_price,
            day_volume,
            float_shares,
            open,
            timestamp,
        }) => build(symbol, last_price, day_volume, timestamp, float_shares, open),
    }
}

/// [`decode`] followed by [`normalize`].
pub fn normalize_payload(payload: &str) -> Result<Quote, MalformedTick> {
    normalize(decode(payload)?)
}

fn build(
    symbol: String,
    price: f64,
    volume: f64,
    ts: Option<RawTimestamp>,
    float_shares: Option<f64>,
    open: Option<f64>,
) -> Result<Quote, MalformedTick> {
    let symbol = symbol.trim().to_ascii_uppercase();
    if symbol.is_empty() {
        return Err(MalformedTick::MissingSymbol);
    }

    if !(price.is_finite() && price > 0.0) {
        return Err(MalformedTick::NonPositivePrice(price));
    }

    let volume = positive_count(volume).ok_or(MalformedTick::VolumeBelowOneShare(volume))?;

    let float_shares = match float_shares {
        Some(f) => Some(positive_count(f).ok_or(MalformedTick::FloatBelowOneShare(f))?),
        None => None,
    };

    if let Some(o) = open {
        if !(o.is_finite() && o > 0.0) {
            return Err(MalformedTick::NonPositiveOpen(o));
        }
    }

    let ts_ms = parse_ts(ts)?;

    Ok(Quote {
        symbol,
        ts_ms,
        price,
        volume,
        float_shares,
        session_open: open,
    })
}

/// Share counts arrive as JSON numbers; anything below one whole share is rejected.
fn positive_count(v: f64) -> Option<u64> {
    if v.is_finite() && v >= 1.0 {
        Some(v as u64)
    } else {
        None
    }
}

fn parse_ts(ts: Option<RawTimestamp>) -> Result<u64, MalformedTick> {
    match ts {
        None => Err(MalformedTick::BadTimestamp("missing".into())),
        Some(RawTimestamp::Millis(ms)) if ms > 0 => Ok(ms as u64),
        Some(RawTimestamp::Millis(ms)) => Err(MalformedTick::BadTimestamp(ms.to_string())),
        // Fractional milliseconds are truncated.
        Some(RawTimestamp::Float(ms)) if ms.is_finite() && ms >= 1.0 && ms < i64::MAX as f64 => {
            Ok(ms as u64)
        }
        Some(RawTimestamp::Float(ms)) => Err(MalformedTick::BadTimestamp(ms.to_string())),
        Some(RawTimestamp::Text(s)) => {
            let dt = DateTime::parse_from_rfc3339(&s)
                .map_err(|e| MalformedTick::BadTimestamp(format!("{s}: {e}")))?;
            let ms = dt.timestamp_millis();
            if ms > 0 {
                Ok(ms as u64)
            } else {
                Err(MalformedTick::BadTimestamp(s))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // -------------------------------------------------------------
    // 1. ACCEPTED SHAPES
    // -------------------------------------------------------------
    #[test]
    fn trade_payload_normalizes() {
        let q = normalize_payload(
            r#"{"ev":"trade","sym":" aapl ","p":110.0,"s":500000,"t":1700000000000,"float":1000000000}"#,
        )
        .unwrap();

        assert_eq!(q.symbol, "AAPL");
        assert_eq!(q.ts_ms, 1_700_000_000_000);
        assert_eq!(q.price, 110.0);
        assert_eq!(q.volume, 500_000);
        assert_eq!(q.float_shares, Some(1_000_000_000));
        assert_eq!(q.session_open, None);
    }

    #[test]
    fn snapshot_payload_with_rfc3339_timestamp() {
        let q = normalize_payload(
            r#"{"ev":"quote","symbol":"TSLA","last_price":12.5,"day_volume":42000,"open":11.0,"timestamp":"2024-01-02T14:30:00Z"}"#,
        )
        .unwrap();

        assert_eq!(q.symbol, "TSLA");
        assert_eq!(q.ts_ms, 1_704_205_800_000);
        assert_eq!(q.session_open, Some(11.0));
        assert_eq!(q.float_shares, None);
    }

    // -------------------------------------------------------------
    // 2. REJECTIONS
    // -------------------------------------------------------------
    #[test]
    fn invalid_json_is_decode_error() {
        let err = normalize_payload("{not json").unwrap_err();
        assert_eq!(err.reason(), "decode");
    }

    #[test]
    fn unknown_shape_is_rejected() {
        let err = normalize_payload(r#"{"ev":"news","headline":"x"}"#).unwrap_err();
        assert!(matches!(err, MalformedTick::UnrecognizedShape(_)));

        let err = normalize_payload(r#"{"sym":"AAPL","p":1.0}"#).unwrap_err();
        assert!(matches!(err, MalformedTick::UnrecognizedShape(_)));
    }

    #[test]
    fn missing_symbol_is_rejected() {
        let err = normalize_payload(r#"{"ev":"trade","p":1.0,"s":10,"t":1}"#).unwrap_err();
        assert_eq!(err, MalformedTick::MissingSymbol);

        let err = normalize_payload(r#"{"ev":"trade","sym":"   ","p":1.0,"s":10,"t":1}"#).unwrap_err();
        assert_eq!(err, MalformedTick::MissingSymbol);
    }

    #[test]
    fn non_positive_price_and_volume_are_rejected() {
        let err = normalize_payload(r#"{"ev":"trade","sym":"A","p":0.0,"s":10,"t":1}"#).unwrap_err();
        assert_eq!(err, MalformedTick::NonPositivePrice(0.0));

        let err = normalize_payload(r#"{"ev":"trade","sym":"A","p":-3.0,"s":10,"t":1}"#).unwrap_err();
        assert_eq!(err, MalformedTick::NonPositivePrice(-3.0));

        let err = normalize_payload(r#"{"ev":"trade","sym":"A","p":1.0,"s":0,"t":1}"#).unwrap_err();
        assert_eq!(err, MalformedTick::VolumeBelowOneShare(0.0));

        let err = normalize_payload(r#"{"ev":"trade","sym":"A","p":1.0,"t":1}"#).unwrap_err();
        assert_eq!(err.reason(), "volume_below_one_share");
    }

    #[test]
    fn fractional_share_counts_name_the_real_rule() {
        let err = normalize_payload(r#"{"ev":"trade","sym":"A","p":1.0,"s":0.5,"t":1}"#).unwrap_err();
        assert_eq!(err, MalformedTick::VolumeBelowOneShare(0.5));
        assert_eq!(err.to_string(), "volume below one share: 0.5");

        let err = normalize_payload(r#"{"ev":"trade","sym":"A","p":1.0,"s":3,"t":1,"float":0.25}"#)
            .unwrap_err();
        assert_eq!(err, MalformedTick::FloatBelowOneShare(0.25));
    }

    #[test]
    fn numeric_epochs_outside_i64_are_bad_timestamps() {
        let q = normalize_payload(r#"{"ev":"trade","sym":"A","p":1.0,"s":1,"t":1.7e12}"#).unwrap();
        assert_eq!(q.ts_ms, 1_700_000_000_000);

        for t in ["1e300", "18446744073709551615", "-2.5", "0.5"] {
            let payload = format!(r#"{{"ev":"trade","sym":"A","p":1.0,"s":1,"t":{t}}}"#);
            let err = normalize_payload(&payload).unwrap_err();
            assert_eq!(err.reason(), "bad_timestamp", "t = {t}");
        }
    }

    #[test]
    fn bad_float_open_and_timestamp_are_rejected() {
        let err = normalize_payload(r#"{"ev":"trade","sym":"A","p":1.0,"s":1,"t":1,"float":0}"#)
            .unwrap_err();
        assert_eq!(err.reason(), "float_below_one_share");

        let err = normalize_payload(r#"{"ev":"trade","sym":"A","p":1.0,"s":1,"t":1,"open":-1}"#)
            .unwrap_err();
        assert_eq!(err.reason(), "non_positive_open");

        let err = normalize_payload(r#"{"ev":"trade","sym":"A","p":1.0,"s":1}"#).unwrap_err();
        assert_eq!(err.reason(), "bad_timestamp");

        let err = normalize_payload(r#"{"ev":"trade","sym":"A","p":1.0,"s":1,"t":"yesterday"}"#)
            .unwrap_err();
        assert_eq!(err.reason(), "bad_timestamp");
    }
}
