use ahash::AHashMap;
use tracing::debug;

/// Running session high per symbol. Never lowered; rollover is someone else's job.
#[derive(Debug, Default)]
pub struct HighOfDayTracker {
    highs: AHashMap<String, f64>,
}

impl HighOfDayTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true only when `price` strictly breaks an already-seeded high.
    pub fn update(&mut self, symbol: &str, price: f64) -> bool {
        match self.highs.get_mut(symbol) {
            None => {
                // First sight seeds the high, it is not a break
                self.highs.insert(symbol.to_string(), price);
                false
            }
            Some(high) if price > *high => {
                *high = price;
                debug!(symbol, price, "broke high of day");
                true
            }
            Some(_) => false,
        }
    }

    pub fn high(&self, symbol: &str) -> Option<f64> {
        self.highs.get(symbol).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_first_observation_seeds() {
        let mut tracker = HighOfDayTracker::new();
        assert!(!tracker.update("ABC", 5.0));
        assert_eq!(tracker.high("ABC"), Some(5.0));
    }

    #[test]
    fn test_break_and_no_break() {
        let mut tracker = HighOfDayTracker::new();
        tracker.update("ABC", 5.0);
        assert!(tracker.update("ABC", 5.5));
        assert_eq!(tracker.high("ABC"), Some(5.5));
        assert!(!tracker.update("ABC", 5.5));
        assert!(!tracker.update("ABC", 5.1));
        assert_eq!(tracker.high("ABC"), Some(5.5));
    }

    proptest! {
        #[test]
        fn prop_high_is_running_max(prices in proptest::collection::vec(0.01f64..500.0, 1..100)) {
            let mut tracker = HighOfDayTracker::new();
            let mut max: Option<f64> = None;
            for price in prices {
                let broke = tracker.update("SYM", price);
                let expected = matches!(max, Some(m) if price > m);
                prop_assert_eq!(broke, expected);
                max = Some(max.map_or(price, |m| m.max(price)));
                prop_assert_eq!(tracker.high("SYM"), max);
            }
        }
    }
}
