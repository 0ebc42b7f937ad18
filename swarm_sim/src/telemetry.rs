//! In-memory metrics sink.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use swarm_env::Aggregator;

/// One accumulated metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub category: String,
    pub key: String,
    pub value: f64,

    /// Number of values summed into `value`
    pub count: u64,
}

#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    sum: f64,
    count: u64,
}

/// Sums values per `(category, key)`. Shared by every radio and NS
/// interface in a world.
#[derive(Debug, Default)]
pub struct MetricsAggregator {
    values: Mutex<BTreeMap<(String, String), Tally>>,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    fn values(&self) -> MutexGuard<'_, BTreeMap<(String, String), Tally>> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sum recorded under `(category, key)`, zero if never recorded.
    pub fn value(&self, category: &str, key: &str) -> f64 {
        self.values()
            .get(&(category.to_string(), key.to_string()))
            .map_or(0.0, |t| t.sum)
    }

    pub fn count(&self, category: &str, key: &str) -> u64 {
        self.values()
            .get(&(category.to_string(), key.to_string()))
            .map_or(0, |t| t.count)
    }

    /// Sum over every key in a category.
    pub fn category_total(&self, category: &str) -> f64 {
        self.values()
            .iter()
            .filter(|((c, _), _)| c == category)
            .map(|(_, t)| t.sum)
            .sum()
    }

    /// Every metric, ordered by category then key.
    pub fn snapshot(&self) -> Vec<MetricSample> {
        self.values()
            .iter()
            .map(|((category, key), tally)| MetricSample {
                category: category.clone(),
                key: key.clone(),
                value: tally.sum,
                count: tally.count,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.values().clear();
    }
}

impl Aggregator for MetricsAggregator {
    fn add_value(&self, category: &str, key: &str, value: f64) {
        let mut values = self.values();
        let tally = values
            .entry((category.to_string(), key.to_string()))
            .or_default();
        tally.sum += value;
        tally.count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_values_sum_per_key() {
        let metrics = MetricsAggregator::new();
        metrics.add_value("energy", "radio-tx", 0.5);
        metrics.add_value("energy", "radio-tx", 0.25);
        metrics.add_value("energy", "radio-idle", 1.0);
        metrics.add_value("ns", "packets-sent", 1.0);

        assert_relative_eq!(metrics.value("energy", "radio-tx"), 0.75);
        assert_eq!(metrics.count("energy", "radio-tx"), 2);
        assert_relative_eq!(metrics.category_total("energy"), 1.75);
        assert_eq!(metrics.value("energy", "radio-rx"), 0.0);
    }

    #[test]
    fn test_snapshot_is_ordered() {
        let metrics = MetricsAggregator::new();
        metrics.add_value("ns", "packets-sent", 1.0);
        metrics.add_value("energy", "radio-tx", 2.0);

        let keys: Vec<(String, String)> = metrics
            .snapshot()
            .into_iter()
            .map(|s| (s.category, s.key))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("energy".to_string(), "radio-tx".to_string()),
                ("ns".to_string(), "packets-sent".to_string()),
            ]
        );

        metrics.clear();
        assert!(metrics.snapshot().is_empty());
    }
}
