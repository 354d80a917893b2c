//! On-demand screen over current snapshots: filter with the same rules as the
//! streaming path, rank by price change, keep the top `limit`.

use std::cmp::Ordering;

use market::types::SymbolSnapshot;
use serde::Serialize;

use crate::config::RuleConfig;
use crate::evaluator::{Evaluation, evaluate};

#[derive(Debug, Clone, Serialize)]
pub struct ScreenHit {
    pub snapshot: SymbolSnapshot,
    pub evaluation: Evaluation,
}

pub fn screen<I>(snapshots: I, cfg: &RuleConfig, limit: usize) -> Vec<ScreenHit>
where
    I: IntoIterator<Item = SymbolSnapshot>,
{
    let mut hits: Vec<ScreenHit> = snapshots
        .into_iter()
        .filter_map(|snapshot| {
            let evaluation = evaluate(&snapshot, cfg);
            evaluation.is_match().then_some(ScreenHit {
                snapshot,
                evaluation,
            })
        })
        .collect();

    hits.sort_by(|a, b| by_change_desc(a, b).then_with(|| a.snapshot.symbol.cmp(&b.snapshot.symbol)));
    hits.truncate(limit);
    hits
}

// Unknown change sorts last.
fn by_change_desc(a: &ScreenHit, b: &ScreenHit) -> Ordering {
    match (a.evaluation.price_change_pct, b.evaluation.price_change_pct) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PriceRange;

    fn snap(symbol: &str, price: f64, reference: f64) -> SymbolSnapshot {
        SymbolSnapshot {
            symbol: symbol.into(),
            ts_ms: 1,
            price,
            volume: 1,
            float_shares: None,
            reference_price: reference,
            rolling_average_volume: 0.0,
            samples: 1,
            last_alert_ms: None,
            cooling_down: false,
        }
    }

    fn band(low: f64, high: f64) -> RuleConfig {
        RuleConfig {
            price_range: Some(PriceRange { low, high }),
            ..Default::default()
        }
    }

    #[test]
    fn ranks_by_change_and_truncates() {
        let rows = vec![
            snap("AAA", 10.0, 10.0), // 0%
            snap("BBB", 12.0, 10.0), // +20%
            snap("CCC", 11.0, 10.0), // +10%
            snap("DDD", 50.0, 10.0), // outside band
        ];

        let hits = screen(rows, &band(2.0, 20.0), 2);
        let symbols: Vec<_> = hits.iter().map(|h| h.snapshot.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["BBB", "CCC"]);
    }

    #[test]
    fn unknown_change_sorts_last_and_ties_break_by_symbol() {
        let rows = vec![
            snap("ZZZ", 5.0, 0.0),
            snap("BBB", 5.0, 5.0),
            snap("AAA", 5.0, 5.0),
        ];

        let hits = screen(rows, &band(1.0, 10.0), 10);
        let symbols: Vec<_> = hits.iter().map(|h| h.snapshot.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["AAA", "BBB", "ZZZ"]);
    }

    #[test]
    fn empty_config_screens_nothing() {
        let hits = screen(vec![snap("AAA", 5.0, 5.0)], &RuleConfig::default(), 10);
        assert!(hits.is_empty());
    }
}
