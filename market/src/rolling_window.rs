use std::collections::VecDeque;

/// A timestamped value used inside the rolling window
#[derive(Clone, Debug, PartialEq)]
pub struct TimedValue<T> {
    pub ts_ms: u64,
    pub value: T,
}

/// Fixed-size trailing window of volume samples with an O(1) mean.
///
/// Memory is bounded by `capacity`: pushing into a full window drops the
/// oldest sample first. An optional `max_age_ms` additionally expires samples
/// that fall out of a trailing time span.
#[derive(Clone, Debug)]
pub struct RollingWindow {
    /// Samples ordered by arrival.
    values: VecDeque<TimedValue<u64>>,

    /// Running sum of `values`, kept wide so it cannot overflow.
    sum: u128,

    capacity: usize,

    max_age_ms: Option<u64>,
}

impl RollingWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            values: VecDeque::with_capacity(capacity),
            sum: 0,
            capacity,
            max_age_ms: None,
        }
    }

    pub fn with_max_age(mut self, max_age_ms: u64) -> Self {
        self.max_age_ms = Some(max_age_ms);
        self
    }

    pub fn push(&mut self, ts_ms: u64, value: u64) {
        self.expire(ts_ms);

        while self.values.len() >= self.capacity {
            self.pop_front();
        }

        self.values.push_back(TimedValue { ts_ms, value });
        self.sum += value as u128;
    }

    /// Drop samples older than the configured age relative to `now_ms`.
    pub fn expire(&mut self, now_ms: u64) {
        let Some(max_age) = self.max_age_ms else {
            return;
        };

        while let Some(front) = self.values.front() {
            if now_ms.saturating_sub(front.ts_ms) > max_age {
                self.pop_front();
            } else {
                break;
            }
        }
    }

    fn pop_front(&mut self) {
        if let Some(removed) = self.values.pop_front() {
            self.sum -= removed.value as u128;
        }
    }

    pub fn mean(&self) -> Option<f64> {
        if self.values.is_empty() {
            None
        } else {
            Some(self.sum as f64 / self.values.len() as f64)
        }
    }

    pub fn latest(&self) -> Option<u64> {
        self.values.back().map(|v| v.value)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.values.clear();
        self.sum = 0;
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(500))]
        #[test]
        fn window_is_bounded_and_mean_matches_tail(
            capacity in 1usize..64,
            samples in prop::collection::vec(0u64..10_000_000, 0..256),
        ) {
            let mut w = RollingWindow::new(capacity);
            for (i, v) in samples.iter().enumerate() {
                w.push(i as u64, *v);
                prop_assert!(w.len() <= capacity);
            }

            let tail: Vec<u64> = samples.iter().rev().take(capacity).copied().collect();
            if tail.is_empty() {
                prop_assert_eq!(w.mean(), None);
            } else {
                let expected = tail.iter().map(|v| *v as f64).sum::<f64>() / tail.len() as f64;
                let got = w.mean().unwrap();
                prop_assert!((got - expected).abs() < 1e-6 * expected.max(1.0));
            }
        }
    }
}
