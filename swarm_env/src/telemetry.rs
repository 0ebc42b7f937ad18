//! Telemetry sink contract.

/// Accumulates named numeric metrics, e.g. `("energy", "radio-tx")`.
///
/// Values under the same `(category, key)` are summed by the implementation.
pub trait Aggregator: Send + Sync {
    fn add_value(&self, category: &str, key: &str, value: f64);
}

/// Aggregator that discards everything. Useful for radios attached for
/// bookkeeping only.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAggregator;

impl Aggregator for NullAggregator {
    fn add_value(&self, _category: &str, _key: &str, _value: f64) {}
}
