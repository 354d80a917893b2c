//! Rule Evaluator
//!
//! Pure function of a [`SymbolSnapshot`] and a [`RuleConfig`]:
//!
//! ```text
//! price  : (price - reference) / reference >= min_price_change_pct
//! volume : volume / rolling_average_volume >= min_volume_multiple   (skipped when avg == 0)
//! float  : float_shares <= max_float                                (false when float unknown)
//! range  : low <= price <= high
//! ```
//!
//! A snapshot matches when every configured trigger holds. Undefined inputs
//! (no reference, no baseline, unknown float) fail their trigger rather than
//! erroring, so the evaluator never panics on a fresh symbol.

use std::fmt;

use market::types::SymbolSnapshot;
use serde::{Deserialize, Serialize};

use crate::config::RuleConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleId {
    Price,
    Volume,
    Float,
    Range,
}

impl RuleId {
    pub const ALL: [RuleId; 4] = [RuleId::Price, RuleId::Volume, RuleId::Float, RuleId::Range];

    pub fn as_str(&self) -> &'static str {
        match self {
            RuleId::Price => "price",
            RuleId::Volume => "volume",
            RuleId::Float => "float",
            RuleId::Range => "range",
        }
    }

    fn bit(self) -> u8 {
        match self {
            RuleId::Price => 1,
            RuleId::Volume => 1 << 1,
            RuleId::Float => 1 << 2,
            RuleId::Range => 1 << 3,
        }
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Small ordered set of rule ids. Serializes as a list.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "Vec<RuleId>", from = "Vec<RuleId>")]
pub struct RuleSet(u8);

impl RuleSet {
    pub const EMPTY: RuleSet = RuleSet(0);

    pub fn insert(&mut self, id: RuleId) {
        self.0 |= id.bit();
    }

    pub fn contains(&self, id: RuleId) -> bool {
        self.0 & id.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(&self) -> impl Iterator<Item = RuleId> + '_ {
        RuleId::ALL.into_iter().filter(|id| self.contains(*id))
    }

    /// Stable key for deduplication, e.g. `price+volume+range`.
    pub fn signature(&self) -> String {
        if self.is_empty() {
            return "none".to_string();
        }
        self.iter().map(|id| id.as_str()).collect::<Vec<_>>().join("+")
    }
}

impl FromIterator<RuleId> for RuleSet {
    fn from_iter<I: IntoIterator<Item = RuleId>>(iter: I) -> Self {
        let mut set = RuleSet::EMPTY;
        for id in iter {
            set.insert(id);
        }
        set
    }
}

impl From<Vec<RuleId>> for RuleSet {
    fn from(ids: Vec<RuleId>) -> Self {
        ids.into_iter().collect()
    }
}

impl From<RuleSet> for Vec<RuleId> {
    fn from(set: RuleSet) -> Self {
        set.iter().collect()
    }
}

impl fmt::Debug for RuleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl fmt::Display for RuleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.signature())
    }
}

/// Outcome of evaluating one snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub configured: RuleSet,
    pub triggered: RuleSet,
    pub price_change_pct: Option<f64>,
    pub volume_multiple: Option<f64>,
}

impl Evaluation {
    /// All configured triggers hold, and at least one is configured.
    pub fn is_match(&self) -> bool {
        !self.configured.is_empty() && self.triggered == self.configured
    }
}

pub fn evaluate(snapshot: &SymbolSnapshot, cfg: &RuleConfig) -> Evaluation {
    let price_change_pct = snapshot.price_change_pct();
    let volume_multiple = snapshot.volume_multiple();
    let mut triggered = RuleSet::EMPTY;

    if let (Some(min), Some(change)) = (cfg.min_price_change_pct, price_change_pct) {
        if change >= min {
            triggered.insert(RuleId::Price);
        }
    }

    if let (Some(min), Some(multiple)) = (cfg.min_volume_multiple, volume_multiple) {
        if multiple >= min {
            triggered.insert(RuleId::Volume);
        }
    }

    if let (Some(max), Some(float)) = (cfg.max_float, snapshot.float_shares) {
        if float as f64 <= max {
            triggered.insert(RuleId::Float);
        }
    }

    if let Some(range) = cfg.price_range {
        if range.contains(snapshot.price) {
            triggered.insert(RuleId::Range);
        }
    }

    Evaluation {
        configured: cfg.configured(),
        triggered,
        price_change_pct,
        volume_multiple,
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(1000))]
        #[test]
        fn price_trigger_agrees_with_formula(
            price in 0.01f64..10_000.0,
            reference in 0.0f64..10_000.0,
            min_change in -1.0f64..5.0,
        ) {
            let s = SymbolSnapshot {
                symbol: "X".into(),
                ts_ms: 1,
                price,
                volume: 1,
                float_shares: None,
                reference_price: reference,
                rolling_average_volume: 0.0,
                samples: 0,
                last_alert_ms: None,
                cooling_down: false,
            };
            let cfg = RuleConfig { min_price_change_pct: Some(min_change), ..Default::default() };

            let e = evaluate(&s, &cfg);
            let expected = reference > 0.0 && (price - reference) / reference >= min_change;

            prop_assert_eq!(e.triggered.contains(RuleId::Price), expected);
            prop_assert_eq!(e.is_match(), expected);
        }
    }
}
