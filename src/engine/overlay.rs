use crate::domain::{DecisionStatus, TraderDecision, VariableSnapshot};

/// EffectiveState: the live base overlaid by every `applied` decision.
///
/// Decisions are laid on in `apply_seq` order, so a relative change stacks
/// on whatever the earlier decisions produced and an absolute change
/// replaces it. Nothing is cached; the overlay is recomputed from the
/// base each time, which is what makes removing one decision remove only
/// its own changes.
pub fn effective_state<'a, I>(base: &VariableSnapshot, decisions: I) -> VariableSnapshot
where
    I: IntoIterator<Item = &'a TraderDecision>,
{
    let mut applied: Vec<&TraderDecision> = decisions
        .into_iter()
        .filter(|d| d.status == DecisionStatus::Applied)
        .collect();
    applied.sort_by_key(|d| (d.apply_seq.unwrap_or(u64::MAX), d.id));

    let mut state = base.clone();
    for decision in applied {
        for (key, change) in &decision.variable_changes {
            let current = state.get_f64(key).unwrap_or(0.0);
            let next = decision.mode_for(key).resolve(current, *change);
            state = state.with_value(key, next);
        }
    }
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        ChangeMode, DecisionId, ProductGroup, TimeMs, TraderId, VariableKey,
    };
    use std::collections::BTreeMap;

    fn decision(id: u64, seq: Option<u64>, status: DecisionStatus, changes: &[(&str, f64, ChangeMode)]) -> TraderDecision {
        TraderDecision {
            id: DecisionId(id),
            trader_id: TraderId(1),
            trader_name: "A".to_string(),
            product_group: ProductGroup::AmmoniaDomestic,
            status,
            variable_changes: changes.iter().map(|(k, v, _)| (VariableKey::new(*k), *v)).collect(),
            change_modes: changes.iter().map(|(k, _, m)| (VariableKey::new(*k), *m)).collect(),
            baseline_snapshot: BTreeMap::new(),
            reason: None,
            reviewed_by: None,
            reviewed_at: None,
            review_note: None,
            deactivated_at: None,
            drift_revoked_at: None,
            expires_at: None,
            supersedes_id: None,
            drift_score: None,
            created_at: TimeMs::new(0),
            updated_at: TimeMs::new(0),
            apply_seq: seq,
        }
    }

    fn base() -> VariableSnapshot {
        VariableSnapshot::from_pairs([("river_stage", 10.0), ("nola_buy", 320.0)], TimeMs::new(0))
    }

    #[test]
    fn test_only_applied_decisions_overlay() {
        let ds = vec![
            decision(1, Some(1), DecisionStatus::Applied, &[("river_stage", 2.0, ChangeMode::Relative)]),
            decision(2, None, DecisionStatus::Proposed, &[("nola_buy", 300.0, ChangeMode::Absolute)]),
            decision(3, Some(2), DecisionStatus::Deactivated, &[("nola_buy", 5.0, ChangeMode::Relative)]),
        ];
        let eff = effective_state(&base(), &ds);
        assert_eq!(eff.get_f64(&VariableKey::new("river_stage")), Some(12.0));
        assert_eq!(eff.get_f64(&VariableKey::new("nola_buy")), Some(320.0));
    }

    #[test]
    fn test_overlay_follows_apply_order() {
        let ds = vec![
            decision(2, Some(2), DecisionStatus::Applied, &[("nola_buy", 5.0, ChangeMode::Relative)]),
            decision(1, Some(1), DecisionStatus::Applied, &[("nola_buy", 300.0, ChangeMode::Absolute)]),
        ];
        let eff = effective_state(&base(), &ds);
        assert_eq!(eff.get_f64(&VariableKey::new("nola_buy")), Some(305.0));
    }

    #[test]
    fn test_removing_one_decision_removes_only_its_changes() {
        let mut ds = vec![
            decision(1, Some(1), DecisionStatus::Applied, &[("river_stage", 2.0, ChangeMode::Relative)]),
            decision(2, Some(2), DecisionStatus::Applied, &[("nola_buy", -10.0, ChangeMode::Relative)]),
        ];
        ds[0].status = DecisionStatus::Revoked;
        let eff = effective_state(&base(), &ds);
        assert_eq!(eff.get_f64(&VariableKey::new("river_stage")), Some(10.0));
        assert_eq!(eff.get_f64(&VariableKey::new("nola_buy")), Some(310.0));
    }

    #[test]
    fn test_overrides_are_not_clamped_to_frame_bounds() {
        // river_stage is bounded to [0, 50] in the domestic frame.
        let ds = vec![
            decision(1, Some(1), DecisionStatus::Applied, &[("river_stage", 48.0, ChangeMode::Absolute)]),
            decision(2, Some(2), DecisionStatus::Applied, &[("river_stage", 5.0, ChangeMode::Relative)]),
        ];
        let eff = effective_state(&base(), &ds);
        assert_eq!(eff.get_f64(&VariableKey::new("river_stage")), Some(53.0));
    }
}
