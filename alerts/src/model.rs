use std::fmt;

use chrono::{DateTime, Utc};
use market::types::Quote;
use rules::{Evaluation, RuleSet};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A distinct screening hit, handed to the sink exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub alert_id: Uuid,
    pub symbol: String,
    pub triggered_rule_ids: RuleSet,
    /// The quote that produced the match.
    pub quote: Quote,
    pub price_change_pct: Option<f64>,
    pub volume_multiple: Option<f64>,
    pub ts_ms: u64,
}

impl Alert {
    pub fn new(quote: Quote, evaluation: &Evaluation) -> Self {
        Self {
            alert_id: Uuid::new_v4(),
            symbol: quote.symbol.clone(),
            triggered_rule_ids: evaluation.triggered,
            ts_ms: quote.ts_ms,
            quote,
            price_change_pct: evaluation.price_change_pct,
            volume_multiple: evaluation.volume_multiple,
        }
    }

    pub fn key(&self) -> AlertKey {
        AlertKey {
            symbol: self.symbol.clone(),
            rules: self.triggered_rule_ids,
        }
    }

    pub fn triggered_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.ts_ms as i64)
    }
}

/// Deduplication key: one symbol under one rule-set signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AlertKey {
    pub symbol: String,
    pub rules: RuleSet,
}

impl fmt::Display for AlertKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.symbol, self.rules.signature())
    }
}
