//! In-memory view of the log
//!
//! Maps each metric name to its current value. Counters accumulate, gauges
//! overwrite, and a name stays bound to the kind it was first written with.

use crate::wal::{Operation, WalRecord};
use crate::{Metric, MetricKind, Result, TallyError};
use std::collections::HashMap;

/// Current value per metric name
#[derive(Debug, Default)]
pub struct MemTable {
    metrics: HashMap<String, Metric>,
}

impl MemTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail if `value`'s name is already bound to a different kind
    pub fn conflict(&self, value: &Metric) -> Result<()> {
        match self.metrics.get(value.name()) {
            Some(existing) if existing.kind() != value.kind() => Err(TallyError::Conflict {
                name: value.name().to_string(),
                existing: existing.kind(),
                incoming: value.kind(),
            }),
            _ => Ok(()),
        }
    }

    /// Accumulate a counter delta, returning the new total.
    ///
    /// # Panics
    ///
    /// Panics if `value` (or the stored entry) is not a counter.
    pub fn add(&mut self, value: &Metric) -> Metric {
        assert_eq!(
            value.kind(),
            MetricKind::Counter,
            "add() called with {} metric {:?}",
            value.kind(),
            value.name()
        );
        let merged = match self.metrics.get(value.name()) {
            Some(old) => old.accumulate(value),
            None => value.clone(),
        };
        self.metrics
            .insert(merged.name().to_string(), merged.clone());
        merged
    }

    /// Store a gauge, returning what the slot held before (zero value if empty).
    ///
    /// # Panics
    ///
    /// Panics if `value` is not a gauge.
    pub fn set(&mut self, value: &Metric) -> Metric {
        assert_eq!(
            value.kind(),
            MetricKind::Gauge,
            "set() called with {} metric {:?}",
            value.kind(),
            value.name()
        );
        self.metrics
            .insert(value.name().to_string(), value.clone())
            .unwrap_or_default()
    }

    /// Apply a logged mutation, returning the value now stored
    pub fn apply(&mut self, record: &WalRecord) -> Metric {
        match record.op {
            Operation::Add => self.add(&record.metric),
            Operation::Set => {
                self.set(&record.metric);
                record.metric.clone()
            }
        }
    }

    /// Current value, or the zero value if absent
    pub fn get(&self, name: &str) -> Metric {
        self.metrics.get(name).cloned().unwrap_or_default()
    }

    /// Unordered snapshot of every entry
    pub fn get_all(&self) -> Vec<Metric> {
        self.metrics.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_accumulates() {
        let mut table = MemTable::new();
        assert_eq!(table.add(&Metric::counter("x", 2)), Metric::counter("x", 2));
        let snapshot = table.get("x");

        assert_eq!(table.add(&Metric::counter("x", 3)), Metric::counter("x", 5));
        assert_eq!(table.get("x"), Metric::counter("x", 5));
        assert_eq!(snapshot, Metric::counter("x", 2));
    }

    #[test]
    fn test_gauge_returns_previous() {
        let mut table = MemTable::new();
        assert!(table.set(&Metric::gauge("x", 1.0)).is_zero());
        assert_eq!(table.set(&Metric::gauge("x", 2.0)), Metric::gauge("x", 1.0));
        assert_eq!(table.get("x"), Metric::gauge("x", 2.0));
    }

    #[test]
    fn test_conflict() {
        let mut table = MemTable::new();
        table.add(&Metric::counter("x", 1));

        assert!(table.conflict(&Metric::counter("x", 1)).is_ok());
        assert!(table.conflict(&Metric::gauge("y", 1.0)).is_ok());
        assert!(matches!(
            table.conflict(&Metric::gauge("x", 1.0)),
            Err(TallyError::Conflict {
                existing: MetricKind::Counter,
                incoming: MetricKind::Gauge,
                ..
            })
        ));
    }

    #[test]
    fn test_apply() {
        let mut table = MemTable::new();
        let set = WalRecord::new(Operation::Set, Metric::gauge("g", 4.5));
        assert_eq!(table.apply(&set), Metric::gauge("g", 4.5));
        assert_eq!(table.apply(&set), Metric::gauge("g", 4.5));

        let add = WalRecord::new(Operation::Add, Metric::counter("c", 4));
        table.apply(&add);
        assert_eq!(table.apply(&add), Metric::counter("c", 8));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_get_missing_is_zero() {
        let table = MemTable::new();
        assert!(table.get("nope").is_zero());
        assert!(table.get_all().is_empty());
        assert!(table.is_empty());
    }

    #[test]
    #[should_panic]
    fn test_add_gauge_panics() {
        MemTable::new().add(&Metric::gauge("g", 1.0));
    }
}
