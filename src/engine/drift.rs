//! Drift scoring: how far live values have moved toward a decision's override.

use crate::domain::{TraderDecision, VariableSnapshot};
use std::fmt::Debug;

/// Pluggable scoring formula. The ledger only depends on this trait, so the
/// interpolation can change without touching the state machine.
pub trait DriftStrategy: Send + Sync + Debug {
    /// Score for one variable. `0.0` means live is still at the baseline and
    /// `1.0` means live has reached (or passed) the override.
    fn variable_score(&self, baseline: f64, target: f64, live: f64) -> f64;

    /// Score for a whole decision, or `None` when it has no baseline.
    fn decision_score(&self, decision: &TraderDecision, live: &VariableSnapshot) -> Option<f64> {
        if decision.baseline_snapshot.is_empty() {
            return None;
        }
        let mut worst: Option<f64> = None;
        for key in decision.variable_changes.keys() {
            let (Some(baseline), Some(target), Some(now)) = (
                decision.baseline_snapshot.get(key).copied(),
                decision.target_from_baseline(key),
                live.get_f64(key),
            ) else {
                continue;
            };
            let score = self.variable_score(baseline, target, now);
            worst = Some(worst.map_or(score, |w: f64| w.max(score)));
        }
        worst.or(Some(0.0))
    }
}

/// Linear progress along the baseline→override span, clamped to [0, 1].
///
/// Movement away from the override scores 0. A zero-width span (override
/// equal to baseline) also scores 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearDrift;

const SPAN_EPSILON: f64 = 1e-12;

impl DriftStrategy for LinearDrift {
    fn variable_score(&self, baseline: f64, target: f64, live: f64) -> f64 {
        let span = target - baseline;
        if span.abs() < SPAN_EPSILON {
            return 0.0;
        }
        ((live - baseline) / span).clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriftThresholds {
    pub warning: f64,
    pub critical: f64,
}

impl Default for DriftThresholds {
    fn default() -> Self {
        Self {
            warning: 0.5,
            critical: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriftLevel {
    Quiet,
    Warning,
    Critical,
}

impl DriftThresholds {
    pub fn classify(&self, score: f64) -> DriftLevel {
        if score >= self.critical {
            DriftLevel::Critical
        } else if score >= self.warning {
            DriftLevel::Warning
        } else {
            DriftLevel::Quiet
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_at_baseline_one_at_override() {
        let s = LinearDrift;
        assert_eq!(s.variable_score(10.0, 12.0, 10.0), 0.0);
        assert_eq!(s.variable_score(10.0, 12.0, 12.0), 1.0);
        assert_eq!(s.variable_score(10.0, 12.0, 11.0), 0.5);
    }

    #[test]
    fn test_monotonic_toward_override_for_negative_span() {
        let s = LinearDrift;
        let mut last = -1.0;
        for step in 0..=10 {
            let live = 320.0 - step as f64;
            let score = s.variable_score(320.0, 310.0, live);
            assert!(score >= last);
            last = score;
        }
        assert_eq!(last, 1.0);
    }

    #[test]
    fn test_past_override_clamps_and_away_scores_zero() {
        let s = LinearDrift;
        assert_eq!(s.variable_score(10.0, 12.0, 15.0), 1.0);
        assert_eq!(s.variable_score(10.0, 12.0, 8.0), 0.0);
        assert_eq!(s.variable_score(10.0, 10.0, 11.0), 0.0);
    }

    #[test]
    fn test_classify() {
        let t = DriftThresholds::default();
        assert_eq!(t.classify(0.2), DriftLevel::Quiet);
        assert_eq!(t.classify(0.5), DriftLevel::Warning);
        assert_eq!(t.classify(1.0), DriftLevel::Critical);
    }
}
