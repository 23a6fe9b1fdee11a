//! When a finished auto-run is worth telling the desk about.

use super::RunReason;
use crate::domain::TimeMs;

#[derive(Debug, Clone, PartialEq)]
pub struct NotifyPolicy {
    /// Minimum move in mean profit against the previous run.
    pub threshold_profit: f64,
    pub cooldown_ms: i64,
    pub paused: bool,
}

impl Default for NotifyPolicy {
    fn default() -> Self {
        Self {
            threshold_profit: 5000.0,
            cooldown_ms: 30 * 60 * 1000,
            paused: false,
        }
    }
}

impl NotifyPolicy {
    /// Only delta-triggered runs notify, and only when the mean moved
    /// enough and the cooldown since the last notification is over.
    pub fn should_notify(
        &self,
        reason: RunReason,
        mean: f64,
        previous_mean: Option<f64>,
        last_notified_at: Option<TimeMs>,
        now: TimeMs,
    ) -> bool {
        if self.paused || reason != RunReason::Delta {
            return false;
        }
        let Some(previous) = previous_mean else {
            return false;
        };
        if (mean - previous).abs() < self.threshold_profit {
            return false;
        }
        match last_notified_at {
            Some(at) => now.since(at) >= self.cooldown_ms,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notify_requires_every_condition() {
        let policy = NotifyPolicy::default();
        let now = TimeMs::new(10_000_000);
        assert!(policy.should_notify(RunReason::Delta, 20_000.0, Some(10_000.0), None, now));
        // Small move.
        assert!(!policy.should_notify(RunReason::Delta, 14_000.0, Some(10_000.0), None, now));
        // No previous run to compare with.
        assert!(!policy.should_notify(RunReason::Delta, 20_000.0, None, None, now));
        // Scheduled runs stay quiet.
        assert!(!policy.should_notify(RunReason::Scheduled, 20_000.0, Some(0.0), None, now));
        // Still cooling down.
        let recent = TimeMs::new(now.as_ms() - 60_000);
        assert!(!policy.should_notify(RunReason::Delta, 20_000.0, Some(0.0), Some(recent), now));
        let old = TimeMs::new(now.as_ms() - 31 * 60 * 1000);
        assert!(policy.should_notify(RunReason::Delta, 20_000.0, Some(0.0), Some(old), now));
    }

    #[test]
    fn test_paused_never_notifies() {
        let policy = NotifyPolicy {
            paused: true,
            ..NotifyPolicy::default()
        };
        assert!(!policy.should_notify(RunReason::Delta, 1e9, Some(0.0), None, TimeMs::new(0)));
    }
}
