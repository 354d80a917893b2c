use std::path::Path;
use std::str::FromStr;

use common::time::secs_to_ms;
use market::queue::OverflowPolicy;
use market::tracker::TrackerConfig;
use rules::{PriceRange, RuleConfig};
use serde::{Deserialize, Serialize};

use crate::backoff::ReconnectPolicy;
use crate::error::ScanError;

/// Everything a scan run needs. Missing fields take the dashboard defaults;
/// an explicit `null` turns an optional trigger off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    // =========================
    // Triggers
    // =========================
    pub min_price_change_pct: Option<f64>,
    pub min_volume_multiple: Option<f64>,
    pub max_float: Option<f64>,
    pub price_range: Option<PriceRange>,

    // =========================
    // Timing
    // =========================
    /// Minimum event-time gap between repeat alerts per symbol and rule set.
    pub cooldown_seconds: u64,

    /// Wall-clock idle time after which a symbol's state is dropped.
    pub eviction_seconds: u64,

    pub sweep_interval_seconds: u64,

    // =========================
    // Pipeline
    // =========================
    /// Bound on payloads buffered between the feed and the dispatcher.
    pub queue_capacity: usize,
    pub overflow_policy: OverflowPolicy,

    /// Volume samples per symbol in the rolling baseline.
    pub volume_window: usize,

    /// Partition workers; also the tracker shard count.
    pub workers: usize,

    /// Rows returned by the on-demand screen.
    pub results_limit: usize,

    pub reconnect: ReconnectPolicy,
}

impl Default for ScanConfig {
    fn default() -> Self {
        let rules = RuleConfig::dashboard_defaults();
        Self {
            min_price_change_pct: rules.min_price_change_pct,
            min_volume_multiple: rules.min_volume_multiple,
            max_float: rules.max_float,
            price_range: rules.price_range,

            cooldown_seconds: 300,
            eviction_seconds: 15 * 60,
            sweep_interval_seconds: 30,

            queue_capacity: 4_096,
            overflow_policy: OverflowPolicy::Block,
            volume_window: 30,
            workers: 4,
            results_limit: 10,

            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl ScanConfig {
    /// Read `SCAN_*` environment variables over the defaults.
    pub fn from_env() -> Result<Self, ScanError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    ///
    /// For the optional triggers an empty value or `off` disables the trigger.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ScanError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let d = Self::default();

        let price_range = match (
            optional::<f64>(&lookup, "SCAN_PRICE_LOW", d.price_range.map(|r| r.low))?,
            optional::<f64>(&lookup, "SCAN_PRICE_HIGH", d.price_range.map(|r| r.high))?,
        ) {
            (Some(low), Some(high)) => Some(PriceRange { low, high }),
            (None, None) => None,
            _ => {
                return Err(ScanError::ConfigInvalid(
                    "SCAN_PRICE_LOW and SCAN_PRICE_HIGH must be set or disabled together".into(),
                ));
            }
        };

        let overflow_policy = match lookup("SCAN_OVERFLOW_POLICY").as_deref().map(str::trim) {
            None | Some("") => d.overflow_policy,
            Some("block") => OverflowPolicy::Block,
            Some("drop_oldest") => OverflowPolicy::DropOldest,
            Some(other) => {
                return Err(ScanError::ConfigInvalid(format!(
                    "SCAN_OVERFLOW_POLICY must be block or drop_oldest, got {other:?}"
                )));
            }
        };

        let cfg = Self {
            min_price_change_pct: optional(
                &lookup,
                "SCAN_MIN_PRICE_CHANGE_PCT",
                d.min_price_change_pct,
            )?,
            min_volume_multiple: optional(&lookup, "SCAN_MIN_VOLUME_MULTIPLE", d.min_volume_multiple)?,
            max_float: optional(&lookup, "SCAN_MAX_FLOAT", d.max_float)?,
            price_range,

            cooldown_seconds: required(&lookup, "SCAN_COOLDOWN_SECONDS", d.cooldown_seconds)?,
            eviction_seconds: required(&lookup, "SCAN_EVICTION_SECONDS", d.eviction_seconds)?,
            sweep_interval_seconds: required(
                &lookup,
                "SCAN_SWEEP_INTERVAL_SECONDS",
                d.sweep_interval_seconds,
            )?,

            queue_capacity: required(&lookup, "SCAN_QUEUE_CAPACITY", d.queue_capacity)?,
            overflow_policy,
            volume_window: required(&lookup, "SCAN_VOLUME_WINDOW", d.volume_window)?,
            workers: required(&lookup, "SCAN_WORKERS", d.workers)?,
            results_limit: required(&lookup, "SCAN_RESULTS_LIMIT", d.results_limit)?,

            reconnect: ReconnectPolicy {
                initial_backoff_ms: required(
                    &lookup,
                    "SCAN_RECONNECT_INITIAL_MS",
                    d.reconnect.initial_backoff_ms,
                )?,
                max_backoff_ms: required(&lookup, "SCAN_RECONNECT_MAX_MS", d.reconnect.max_backoff_ms)?,
                max_attempts: required(
                    &lookup,
                    "SCAN_RECONNECT_MAX_ATTEMPTS",
                    d.reconnect.max_attempts,
                )?,
            },
        };

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ScanError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ScanError::ConfigInvalid(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self, ScanError> {
        let cfg: Self = serde_json::from_str(text)
            .map_err(|e| ScanError::ConfigInvalid(format!("bad config json: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ScanError> {
        self.rules()
            .validate()
            .map_err(|e| ScanError::ConfigInvalid(e.to_string()))?;

        let positive = [
            ("eviction_seconds", self.eviction_seconds),
            ("sweep_interval_seconds", self.sweep_interval_seconds),
            ("queue_capacity", self.queue_capacity as u64),
            ("volume_window", self.volume_window as u64),
            ("workers", self.workers as u64),
            ("results_limit", self.results_limit as u64),
            ("reconnect.initial_backoff_ms", self.reconnect.initial_backoff_ms),
            ("reconnect.max_attempts", u64::from(self.reconnect.max_attempts)),
        ];
        if let Some((field, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(ScanError::ConfigInvalid(format!("{field} must be greater than zero")));
        }

        // An evicted symbol must not come back with its cooldown still running.
        if self.eviction_seconds < self.cooldown_seconds {
            return Err(ScanError::ConfigInvalid(format!(
                "eviction_seconds ({}) is below cooldown_seconds ({})",
                self.eviction_seconds, self.cooldown_seconds
            )));
        }

        if self.reconnect.max_backoff_ms < self.reconnect.initial_backoff_ms {
            return Err(ScanError::ConfigInvalid(format!(
                "reconnect.max_backoff_ms ({}) is below reconnect.initial_backoff_ms ({})",
                self.reconnect.max_backoff_ms, self.reconnect.initial_backoff_ms
            )));
        }

        Ok(())
    }

    pub fn rules(&self) -> RuleConfig {
        RuleConfig {
            min_price_change_pct: self.min_price_change_pct,
            min_volume_multiple: self.min_volume_multiple,
            max_float: self.max_float,
            price_range: self.price_range,
        }
    }

    pub fn tracker(&self) -> TrackerConfig {
        TrackerConfig {
            volume_window: self.volume_window,
            eviction_ms: secs_to_ms(self.eviction_seconds),
            window_max_age_ms: None,
        }
    }

    pub fn cooldown_ms(&self) -> u64 {
        secs_to_ms(self.cooldown_seconds)
    }
}

fn parse<T: FromStr>(key: &str, raw: &str) -> Result<T, ScanError> {
    raw.trim()
        .parse()
        .map_err(|_| ScanError::ConfigInvalid(format!("{key}: cannot parse {raw:?}")))
}

fn required<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ScanError> {
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => parse(key, &raw),
        _ => Ok(default),
    }
}

fn optional<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Option<T>,
) -> Result<Option<T>, ScanError> {
    match lookup(key) {
        None => Ok(default),
        Some(raw) if raw.trim().is_empty() || raw.trim().eq_ignore_ascii_case("off") => Ok(None),
        Some(raw) => parse(key, &raw).map(Some),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_the_dashboard_screen() {
        let cfg = ScanConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.price_range, Some(PriceRange { low: 2.0, high: 20.0 }));
        assert_eq!(cfg.max_float, Some(10_000_000.0));
        assert_eq!(cfg.min_volume_multiple, Some(5.0));
        assert_eq!(cfg.min_price_change_pct, None);
        assert_eq!(cfg.cooldown_ms(), 300_000);
        assert_eq!(cfg.results_limit, 10);
    }

    #[test]
    fn env_overrides_and_disables_triggers() {
        let cfg = ScanConfig::from_lookup(lookup(&[
            ("SCAN_MIN_PRICE_CHANGE_PCT", "0.1"),
            ("SCAN_MAX_FLOAT", "off"),
            ("SCAN_PRICE_LOW", "1"),
            ("SCAN_PRICE_HIGH", "1000"),
            ("SCAN_OVERFLOW_POLICY", "drop_oldest"),
            ("SCAN_WORKERS", "8"),
        ]))
        .unwrap();

        assert_eq!(cfg.min_price_change_pct, Some(0.1));
        assert_eq!(cfg.max_float, None);
        assert_eq!(cfg.price_range.unwrap().high, 1000.0);
        assert_eq!(cfg.overflow_policy, OverflowPolicy::DropOldest);
        assert_eq!(cfg.workers, 8);
        assert_eq!(cfg.tracker().volume_window, 30);
    }

    #[test]
    fn env_rejects_garbage_and_inverted_range() {
        let err = ScanConfig::from_lookup(lookup(&[("SCAN_WORKERS", "many")])).unwrap_err();
        assert!(matches!(err, ScanError::ConfigInvalid(ref m) if m.contains("SCAN_WORKERS")));

        let err = ScanConfig::from_lookup(lookup(&[
            ("SCAN_PRICE_LOW", "20"),
            ("SCAN_PRICE_HIGH", "2"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ScanError::ConfigInvalid(_)));

        let err = ScanConfig::from_lookup(lookup(&[("SCAN_PRICE_LOW", "off")])).unwrap_err();
        assert!(matches!(err, ScanError::ConfigInvalid(ref m) if m.contains("together")));
    }

    #[test]
    fn json_fills_missing_fields_and_honours_null() {
        let cfg = ScanConfig::from_json_str(
            r#"{
                "min_price_change_pct": 0.1,
                "max_float": null,
                "price_range": {"low": 1, "high": 1000},
                "cooldown_seconds": 60,
                "overflow_policy": "drop_oldest",
                "reconnect": {"max_attempts": 3}
            }"#,
        )
        .unwrap();

        assert_eq!(cfg.max_float, None);
        assert_eq!(cfg.min_volume_multiple, Some(5.0));
        assert_eq!(cfg.cooldown_ms(), 60_000);
        assert_eq!(cfg.reconnect.max_attempts, 3);
        assert_eq!(cfg.reconnect.initial_backoff_ms, 500);
    }

    #[test]
    fn zero_sizes_are_invalid() {
        let cfg = ScanConfig {
            workers: 0,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(ScanError::ConfigInvalid(ref m)) if m.contains("workers")));

        let cfg = ScanConfig {
            reconnect: ReconnectPolicy {
                initial_backoff_ms: 1_000,
                max_backoff_ms: 10,
                max_attempts: 1,
            },
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn eviction_may_not_undercut_the_cooldown() {
        let cfg = ScanConfig {
            cooldown_seconds: 300,
            eviction_seconds: 60,
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ScanError::ConfigInvalid(ref m)) if m.contains("eviction_seconds (60)")
        ));

        let cfg = ScanConfig {
            cooldown_seconds: 60,
            eviction_seconds: 60,
            ..Default::default()
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn missing_file_is_config_invalid() {
        let err = ScanConfig::from_json_file("/no/such/scan.json").unwrap_err();
        assert!(matches!(err, ScanError::ConfigInvalid(_)));
    }
}
