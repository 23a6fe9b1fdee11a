//! Delta detection between a baseline snapshot and the current one.

use crate::domain::{VariableKey, VariableSnapshot};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One tracked variable that moved past its threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerHit {
    pub variable: VariableKey,
    pub baseline: f64,
    pub current: f64,
    pub delta: f64,
    pub threshold: f64,
}

#[derive(Debug, Clone, Default)]
pub struct DeltaTrigger {
    thresholds: BTreeMap<VariableKey, f64>,
}

impl DeltaTrigger {
    pub fn new(thresholds: BTreeMap<VariableKey, f64>) -> Self {
        Self { thresholds }
    }

    /// Every tracked key with `|current - baseline| > threshold`.
    ///
    /// Keys missing from either snapshot are skipped. All breaches are
    /// returned together so one run reports them all.
    pub fn breaches(&self, baseline: &VariableSnapshot, current: &VariableSnapshot) -> Vec<TriggerHit> {
        self.thresholds
            .iter()
            .filter_map(|(key, threshold)| {
                let before = baseline.get_f64(key)?;
                let now = current.get_f64(key)?;
                let delta = (now - before).abs();
                (delta > *threshold).then(|| TriggerHit {
                    variable: key.clone(),
                    baseline: before,
                    current: now,
                    delta,
                    threshold: *threshold,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{TimeMs, VariableValue};

    fn trigger() -> DeltaTrigger {
        DeltaTrigger::new(
            [
                (VariableKey::new("river_stage"), 0.5),
                (VariableKey::new("nola_buy"), 2.0),
                (VariableKey::new("stl_outage"), 0.5),
            ]
            .into_iter()
            .collect(),
        )
    }

    #[test]
    fn test_delta_equal_to_threshold_does_not_fire() {
        let base = VariableSnapshot::from_pairs([("river_stage", 10.0)], TimeMs::new(0));
        let now = VariableSnapshot::from_pairs([("river_stage", 10.5)], TimeMs::new(1));
        assert!(trigger().breaches(&base, &now).is_empty());
    }

    #[test]
    fn test_simultaneous_breaches_reported_together() {
        let base = VariableSnapshot::from_pairs(
            [("river_stage", 10.0), ("nola_buy", 320.0)],
            TimeMs::new(0),
        );
        let now = VariableSnapshot::from_pairs(
            [("river_stage", 9.0), ("nola_buy", 325.0)],
            TimeMs::new(1),
        );
        let hits = trigger().breaches(&base, &now);
        assert_eq!(hits.len(), 2);
        let river = hits.iter().find(|h| h.variable.as_str() == "river_stage").unwrap();
        assert_eq!(river.delta, 1.0);
    }

    #[test]
    fn test_flag_flip_breaches() {
        let base = VariableSnapshot::from_pairs([("stl_outage", VariableValue::Flag(false))], TimeMs::new(0));
        let now = VariableSnapshot::from_pairs([("stl_outage", VariableValue::Flag(true))], TimeMs::new(1));
        assert_eq!(trigger().breaches(&base, &now).len(), 1);
    }
}
