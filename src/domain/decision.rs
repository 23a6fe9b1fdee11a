//! Trader decision records and their lifecycle status.

use super::primitives::{DecisionId, ProductGroup, TimeMs, TraderId, VariableKey};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Lifecycle status of a trader decision. Exactly one holds at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    Draft,
    Proposed,
    Applied,
    Deactivated,
    Rejected,
    Revoked,
    Superseded,
}

impl DecisionStatus {
    pub const ALL: [DecisionStatus; 7] = [
        DecisionStatus::Draft,
        DecisionStatus::Proposed,
        DecisionStatus::Applied,
        DecisionStatus::Deactivated,
        DecisionStatus::Rejected,
        DecisionStatus::Revoked,
        DecisionStatus::Superseded,
    ];

    /// Terminal records are kept for audit and never change again.
    pub fn is_terminal(&self) -> bool {
        match self {
            DecisionStatus::Rejected | DecisionStatus::Revoked | DecisionStatus::Superseded => true,
            DecisionStatus::Draft
            | DecisionStatus::Proposed
            | DecisionStatus::Applied
            | DecisionStatus::Deactivated => false,
        }
    }

    /// Statuses that take part in conflict detection.
    pub fn is_live(&self) -> bool {
        matches!(self, DecisionStatus::Proposed | DecisionStatus::Applied)
    }

    /// Statuses for which a drift score is defined.
    pub fn tracks_drift(&self) -> bool {
        matches!(self, DecisionStatus::Applied | DecisionStatus::Deactivated)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionStatus::Draft => "draft",
            DecisionStatus::Proposed => "proposed",
            DecisionStatus::Applied => "applied",
            DecisionStatus::Deactivated => "deactivated",
            DecisionStatus::Rejected => "rejected",
            DecisionStatus::Revoked => "revoked",
            DecisionStatus::Superseded => "superseded",
        }
    }
}

impl fmt::Display for DecisionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DecisionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DecisionStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| format!("unknown decision status: {}", s))
    }
}

/// How a variable change is interpreted against the live base value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeMode {
    /// The change replaces the base value.
    Absolute,
    /// The change is added to the base value.
    #[default]
    Relative,
}

impl ChangeMode {
    /// Value that results from applying `change` over `base`.
    pub fn resolve(&self, base: f64, change: f64) -> f64 {
        match self {
            ChangeMode::Absolute => change,
            ChangeMode::Relative => base + change,
        }
    }
}

/// A trader's proposed override of one or more variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraderDecision {
    pub id: DecisionId,
    pub trader_id: TraderId,
    pub trader_name: String,
    pub product_group: ProductGroup,
    pub status: DecisionStatus,
    pub variable_changes: BTreeMap<VariableKey, f64>,
    pub change_modes: BTreeMap<VariableKey, ChangeMode>,
    /// Live values of the changed keys captured when the decision entered
    /// `applied`. Empty until then.
    pub baseline_snapshot: BTreeMap<VariableKey, f64>,
    pub reason: Option<String>,
    pub reviewed_by: Option<TraderId>,
    pub reviewed_at: Option<TimeMs>,
    pub review_note: Option<String>,
    pub deactivated_at: Option<TimeMs>,
    /// Set only when the system deactivated the decision because of drift.
    pub drift_revoked_at: Option<TimeMs>,
    pub expires_at: Option<TimeMs>,
    /// Id of an older decision this one replaces. Lookup only.
    pub supersedes_id: Option<DecisionId>,
    /// Derived on read for `applied`/`deactivated` decisions.
    pub drift_score: Option<f64>,
    pub created_at: TimeMs,
    pub updated_at: TimeMs,
    /// Position in the overlay order, assigned on first apply and kept
    /// across deactivate/reactivate.
    pub apply_seq: Option<u64>,
}

impl TraderDecision {
    pub fn mode_for(&self, key: &VariableKey) -> ChangeMode {
        self.change_modes.get(key).copied().unwrap_or_default()
    }

    pub fn changed_keys(&self) -> BTreeSet<&VariableKey> {
        self.variable_changes.keys().collect()
    }

    /// True when both decisions override at least one common variable.
    pub fn touches_any_of(&self, other: &TraderDecision) -> bool {
        self.variable_changes
            .keys()
            .any(|k| other.variable_changes.contains_key(k))
    }

    /// Override target measured against the baseline captured at apply.
    pub fn target_from_baseline(&self, key: &VariableKey) -> Option<f64> {
        let baseline = self.baseline_snapshot.get(key)?;
        let change = self.variable_changes.get(key)?;
        Some(self.mode_for(key).resolve(*baseline, *change))
    }
}

/// Input for creating a decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDecision {
    pub trader_id: TraderId,
    pub trader_name: String,
    pub product_group: ProductGroup,
    pub variable_changes: BTreeMap<VariableKey, f64>,
    #[serde(default)]
    pub change_modes: BTreeMap<VariableKey, ChangeMode>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub expires_at: Option<TimeMs>,
    #[serde(default)]
    pub supersedes_id: Option<DecisionId>,
    /// Create directly as `proposed` instead of `draft`.
    #[serde(default)]
    pub submit: bool,
}

impl NewDecision {
    pub fn new(trader_id: TraderId, trader_name: &str, product_group: ProductGroup) -> Self {
        Self {
            trader_id,
            trader_name: trader_name.to_string(),
            product_group,
            variable_changes: BTreeMap::new(),
            change_modes: BTreeMap::new(),
            reason: None,
            expires_at: None,
            supersedes_id: None,
            submit: false,
        }
    }

    pub fn with_change(mut self, key: &str, change: f64, mode: ChangeMode) -> Self {
        let key = VariableKey::new(key);
        self.variable_changes.insert(key.clone(), change);
        self.change_modes.insert(key, mode);
        self
    }

    pub fn with_reason(mut self, reason: &str) -> Self {
        self.reason = Some(reason.to_string());
        self
    }

    pub fn superseding(mut self, id: DecisionId) -> Self {
        self.supersedes_id = Some(id);
        self
    }

    pub fn expiring_at(mut self, at: TimeMs) -> Self {
        self.expires_at = Some(at);
        self
    }

    pub fn submitted(mut self) -> Self {
        self.submit = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        let terminal: Vec<_> = DecisionStatus::ALL
            .into_iter()
            .filter(|s| s.is_terminal())
            .collect();
        assert_eq!(
            terminal,
            vec![
                DecisionStatus::Rejected,
                DecisionStatus::Revoked,
                DecisionStatus::Superseded
            ]
        );
    }

    #[test]
    fn test_change_mode_resolve() {
        assert_eq!(ChangeMode::Relative.resolve(10.0, 2.0), 12.0);
        assert_eq!(ChangeMode::Absolute.resolve(10.0, 2.0), 2.0);
    }

    #[test]
    fn test_status_parse() {
        assert_eq!(
            "deactivated".parse::<DecisionStatus>().unwrap(),
            DecisionStatus::Deactivated
        );
        assert!("expired".parse::<DecisionStatus>().is_err());
    }
}
