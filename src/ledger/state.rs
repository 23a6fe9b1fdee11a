//! Per-product-group decision state machine.
//!
//! `GroupLedger` is synchronous and owns no I/O. Every operation checks the
//! current status and all preconditions before touching anything, so a
//! failed call leaves the ledger exactly as it was. Side effects
//! (notifications, changed records) are returned as `Effects` for the
//! coordinator to deliver.

use super::{LedgerAction, LedgerError};
use crate::domain::{
    DeactivationRequester, DecisionId, DecisionStatus, NewDecision, NotificationDraft,
    NotificationType, ProductGroup, TimeMs, TraderDecision, TraderId, TraderRef,
    VariableKind, VariableRegistry, VariableSnapshot, VariableValue,
};
use crate::engine::{effective_state, DriftLevel, DriftStrategy, DriftThresholds, LinearDrift};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// What a successful operation changed.
#[derive(Debug, Default)]
pub struct Effects {
    pub changed: Vec<TraderDecision>,
    pub notifications: Vec<NotificationDraft>,
}

impl Effects {
    fn recording(decision: &TraderDecision) -> Self {
        Self {
            changed: vec![decision.clone()],
            notifications: Vec::new(),
        }
    }

    fn notify(mut self, draft: Option<NotificationDraft>) -> Self {
        self.notifications.extend(draft);
        self
    }

    fn merge(&mut self, other: Effects) {
        self.changed.extend(other.changed);
        self.notifications.extend(other.notifications);
    }

    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.notifications.is_empty()
    }
}

/// Outcome of a deactivation call at the state-machine level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeactivateStep {
    Deactivated,
    RequestSent,
}

/// Consistent read-only copy of one group's ledger.
///
/// Drift scores are already filled in for `applied` and `deactivated`
/// decisions.
#[derive(Debug, Clone, Serialize)]
pub struct GroupView {
    pub product_group: ProductGroup,
    pub version: u64,
    pub live: VariableSnapshot,
    pub effective: VariableSnapshot,
    pub decisions: Vec<TraderDecision>,
}

impl GroupView {
    pub fn get(&self, id: DecisionId) -> Option<&TraderDecision> {
        self.decisions.iter().find(|d| d.id == id)
    }

    pub fn contains(&self, id: DecisionId) -> bool {
        self.get(id).is_some()
    }

    pub fn with_status(&self, status: Option<DecisionStatus>) -> Vec<TraderDecision> {
        self.decisions
            .iter()
            .filter(|d| status.map_or(true, |s| d.status == s))
            .cloned()
            .collect()
    }

    /// Other live decisions whose changed keys intersect this one's. A
    /// decision that is not live conflicts with nothing.
    pub fn conflicts_of(&self, id: DecisionId) -> Option<Vec<TraderDecision>> {
        let target = self.get(id)?;
        if !target.status.is_live() {
            return Some(Vec::new());
        }
        Some(
            self.decisions
                .iter()
                .filter(|d| d.id != id && d.status.is_live() && d.touches_any_of(target))
                .cloned()
                .collect(),
        )
    }

    /// The newer decision that names `id` in its `supersedes_id`.
    pub fn superseded_by(&self, id: DecisionId) -> Option<&TraderDecision> {
        self.decisions
            .iter()
            .filter(|d| d.supersedes_id == Some(id))
            .max_by_key(|d| d.id)
    }
}

/// Drift scoring strategy plus the thresholds it is classified against.
#[derive(Debug, Clone)]
pub struct DriftPolicy {
    pub strategy: Arc<dyn DriftStrategy>,
    pub thresholds: DriftThresholds,
}

impl Default for DriftPolicy {
    fn default() -> Self {
        Self {
            strategy: Arc::new(LinearDrift),
            thresholds: DriftThresholds::default(),
        }
    }
}

#[derive(Debug)]
pub struct GroupLedger {
    group: ProductGroup,
    variables: VariableRegistry,
    live: VariableSnapshot,
    decisions: BTreeMap<DecisionId, TraderDecision>,
    next_apply_seq: u64,
    /// Applied decisions that already got a drift warning this apply cycle.
    warned: BTreeSet<DecisionId>,
    drift: DriftPolicy,
    roster: Vec<TraderRef>,
}

impl GroupLedger {
    pub fn new(
        group: ProductGroup,
        variables: VariableRegistry,
        live: VariableSnapshot,
        drift: DriftPolicy,
        roster: Vec<TraderRef>,
    ) -> Self {
        Self {
            group,
            variables,
            live,
            decisions: BTreeMap::new(),
            next_apply_seq: 0,
            warned: BTreeSet::new(),
            drift,
            roster,
        }
    }

    pub fn product_group(&self) -> ProductGroup {
        self.group
    }

    pub fn live(&self) -> &VariableSnapshot {
        &self.live
    }

    pub fn effective_state(&self) -> VariableSnapshot {
        effective_state(&self.live, self.decisions.values())
    }

    pub fn view(&self, version: u64) -> GroupView {
        GroupView {
            product_group: self.group,
            version,
            live: self.live.clone(),
            effective: self.effective_state(),
            decisions: self.decisions.values().map(|d| self.scored(d)).collect(),
        }
    }

    pub fn get(&self, id: DecisionId) -> Option<TraderDecision> {
        self.decisions.get(&id).map(|d| self.scored(d))
    }

    fn scored(&self, decision: &TraderDecision) -> TraderDecision {
        let mut d = decision.clone();
        d.drift_score = if d.status.tracks_drift() {
            self.drift.strategy.decision_score(&d, &self.live)
        } else {
            None
        };
        d
    }

    fn require(&self, id: DecisionId) -> Result<&TraderDecision, LedgerError> {
        self.decisions.get(&id).ok_or(LedgerError::NotFound(id))
    }

    fn require_owner(&self, id: DecisionId, trader: TraderId) -> Result<&TraderDecision, LedgerError> {
        let d = self.require(id)?;
        if d.trader_id != trader {
            return Err(LedgerError::NotOwner { id, trader });
        }
        Ok(d)
    }

    fn require_status(
        d: &TraderDecision,
        allowed: &[DecisionStatus],
        action: LedgerAction,
    ) -> Result<(), LedgerError> {
        if allowed.contains(&d.status) {
            Ok(())
        } else {
            Err(LedgerError::InvalidTransition {
                id: d.id,
                from: d.status,
                action,
            })
        }
    }

    /// Mutate a decision in place and hand back a scored copy.
    fn update<F>(&mut self, id: DecisionId, now: TimeMs, f: F) -> Result<TraderDecision, LedgerError>
    where
        F: FnOnce(&mut TraderDecision),
    {
        let d = self.decisions.get_mut(&id).ok_or(LedgerError::NotFound(id))?;
        f(d);
        d.updated_at = now;
        let d = d.clone();
        Ok(self.scored(&d))
    }

    fn validate(&self, new: &NewDecision) -> Result<(), LedgerError> {
        if new.product_group != self.group {
            return Err(LedgerError::InvalidInput(format!(
                "decision for {} routed to {}",
                new.product_group, self.group
            )));
        }
        if new.variable_changes.is_empty() {
            return Err(LedgerError::InvalidInput(
                "decision must change at least one variable".to_string(),
            ));
        }
        for (key, change) in &new.variable_changes {
            if !self.variables.contains(key) {
                return Err(LedgerError::InvalidInput(format!(
                    "unknown variable {} for {}",
                    key, self.group
                )));
            }
            if !change.is_finite() {
                return Err(LedgerError::InvalidInput(format!(
                    "change for {} is not a finite number",
                    key
                )));
            }
        }
        if let Some(key) = new
            .change_modes
            .keys()
            .find(|k| !new.variable_changes.contains_key(*k))
        {
            return Err(LedgerError::InvalidInput(format!(
                "change mode given for unchanged variable {}",
                key
            )));
        }
        if let Some(old) = new.supersedes_id {
            self.require(old)?;
        }
        Ok(())
    }

    pub fn propose(&mut self, id: DecisionId, new: NewDecision, now: TimeMs) -> Result<Effects, LedgerError> {
        self.validate(&new)?;
        let status = if new.submit {
            DecisionStatus::Proposed
        } else {
            DecisionStatus::Draft
        };
        let decision = TraderDecision {
            id,
            trader_id: new.trader_id,
            trader_name: new.trader_name,
            product_group: self.group,
            status,
            variable_changes: new.variable_changes,
            change_modes: new.change_modes,
            baseline_snapshot: BTreeMap::new(),
            reason: new.reason,
            reviewed_by: None,
            reviewed_at: None,
            review_note: None,
            deactivated_at: None,
            drift_revoked_at: None,
            expires_at: new.expires_at,
            supersedes_id: new.supersedes_id,
            drift_score: None,
            created_at: now,
            updated_at: now,
            apply_seq: None,
        };
        tracing::info!(group = %self.group, decision_id = %id, status = %status, "decision created");
        let mut effects = Effects::recording(&decision);
        if status == DecisionStatus::Proposed {
            effects.notifications.extend(self.proposal_notices(&decision));
        }
        self.decisions.insert(id, decision);
        Ok(effects)
    }

    pub fn submit(&mut self, id: DecisionId, trader: TraderId, now: TimeMs) -> Result<Effects, LedgerError> {
        let d = self.require_owner(id, trader)?;
        Self::require_status(d, &[DecisionStatus::Draft], LedgerAction::Submit)?;
        let updated = self.update(id, now, |d| d.status = DecisionStatus::Proposed)?;
        tracing::info!(group = %self.group, decision_id = %id, "decision submitted");
        let notices = self.proposal_notices(&updated);
        let mut effects = Effects::recording(&updated);
        effects.notifications.extend(notices);
        Ok(effects)
    }

    /// `proposed → applied` by a different trader. Captures the baseline
    /// from live values and supersedes the referenced decision, if any, in
    /// the same step.
    pub fn apply(
        &mut self,
        id: DecisionId,
        reviewer: &TraderRef,
        note: Option<String>,
        now: TimeMs,
    ) -> Result<Effects, LedgerError> {
        let d = self.require(id)?;
        if d.trader_id == reviewer.id {
            return Err(LedgerError::SelfReview {
                id,
                trader: reviewer.id,
            });
        }
        Self::require_status(d, &[DecisionStatus::Proposed], LedgerAction::Apply)?;

        let baseline = self.live.project(d.variable_changes.keys().cloned());
        let keep_seq = d.apply_seq;
        let supersede_target = d.supersedes_id.filter(|old| {
            *old != id
                && self
                    .decisions
                    .get(old)
                    .map_or(false, |o| !o.status.is_terminal())
        });
        let conflicts = self.conflicting_ids(id);
        if !conflicts.is_empty() {
            tracing::warn!(
                group = %self.group,
                decision_id = %id,
                conflicts = ?conflicts,
                "applying decision that conflicts with other live decisions"
            );
        }

        let seq = match keep_seq {
            Some(seq) => seq,
            None => {
                self.next_apply_seq += 1;
                self.next_apply_seq
            }
        };
        let reviewer_id = reviewer.id;
        let updated = self.update(id, now, |d| {
            d.status = DecisionStatus::Applied;
            d.baseline_snapshot = baseline;
            d.reviewed_by = Some(reviewer_id);
            d.reviewed_at = Some(now);
            d.review_note = note;
            d.apply_seq = Some(seq);
        })?;
        self.warned.remove(&id);
        tracing::info!(group = %self.group, decision_id = %id, reviewer = %reviewer_id, "decision applied");

        let mut effects = Effects::recording(&updated).notify(Some(self.notice(
            &updated,
            updated.trader_id,
            NotificationType::DecisionApplied,
            format!("{} applied your decision #{}", reviewer.name, id),
        )));
        if let Some(old) = supersede_target {
            effects.merge(self.mark_superseded(old, id, now)?);
        }
        Ok(effects)
    }

    pub fn reject(
        &mut self,
        id: DecisionId,
        reviewer: &TraderRef,
        note: Option<String>,
        now: TimeMs,
    ) -> Result<Effects, LedgerError> {
        let d = self.require(id)?;
        if d.trader_id == reviewer.id {
            return Err(LedgerError::SelfReview {
                id,
                trader: reviewer.id,
            });
        }
        Self::require_status(d, &[DecisionStatus::Proposed], LedgerAction::Reject)?;
        let reviewer_id = reviewer.id;
        let updated = self.update(id, now, |d| {
            d.status = DecisionStatus::Rejected;
            d.reviewed_by = Some(reviewer_id);
            d.reviewed_at = Some(now);
            d.review_note = note;
        })?;
        tracing::info!(group = %self.group, decision_id = %id, reviewer = %reviewer_id, "decision rejected");
        let draft = self.notice(
            &updated,
            updated.trader_id,
            NotificationType::DecisionRejected,
            format!("{} rejected your decision #{}", reviewer.name, id),
        );
        Ok(Effects::recording(&updated).notify(Some(draft)))
    }

    pub fn revoke(&mut self, id: DecisionId, trader: TraderId, now: TimeMs) -> Result<Effects, LedgerError> {
        let d = self.require_owner(id, trader)?;
        Self::require_status(
            d,
            &[
                DecisionStatus::Draft,
                DecisionStatus::Proposed,
                DecisionStatus::Applied,
                DecisionStatus::Deactivated,
            ],
            LedgerAction::Revoke,
        )?;
        let updated = self.update(id, now, |d| d.status = DecisionStatus::Revoked)?;
        self.warned.remove(&id);
        tracing::info!(group = %self.group, decision_id = %id, "decision revoked");
        Ok(Effects::recording(&updated))
    }

    /// Owner deactivates immediately; anyone else only sends a request to
    /// the owner and the decision stays applied.
    pub fn deactivate(
        &mut self,
        id: DecisionId,
        requester: &TraderRef,
        now: TimeMs,
    ) -> Result<(DeactivateStep, Effects), LedgerError> {
        let d = self.require(id)?;
        Self::require_status(d, &[DecisionStatus::Applied], LedgerAction::Deactivate)?;

        if d.trader_id != requester.id {
            let owner = d.trader_id;
            let draft = self
                .notice(
                    d,
                    owner,
                    NotificationType::DeactivateRequested,
                    format!("{} asks you to deactivate decision #{}", requester.name, id),
                )
                .requested_by(DeactivationRequester {
                    trader_id: requester.id,
                    trader_name: requester.name.clone(),
                });
            tracing::info!(group = %self.group, decision_id = %id, requester = %requester.id, "deactivation requested");
            return Ok((
                DeactivateStep::RequestSent,
                Effects::default().notify(Some(draft)),
            ));
        }

        let updated = self.update(id, now, |d| {
            d.status = DecisionStatus::Deactivated;
            d.deactivated_at = Some(now);
        })?;
        self.warned.remove(&id);
        tracing::info!(group = %self.group, decision_id = %id, "decision deactivated by owner");
        let draft = updated
            .reviewed_by
            .filter(|r| *r != updated.trader_id)
            .map(|reviewer| {
                self.notice(
                    &updated,
                    reviewer,
                    NotificationType::DecisionDeactivated,
                    format!("{} deactivated decision #{}", updated.trader_name, id),
                )
            });
        Ok((DeactivateStep::Deactivated, Effects::recording(&updated).notify(draft)))
    }

    /// Accepted deactivation request: the owner deactivates on the
    /// requester's behalf and the requester is told.
    pub fn deactivate_for_requester(
        &mut self,
        id: DecisionId,
        owner: TraderId,
        requesters: &[DeactivationRequester],
        now: TimeMs,
    ) -> Result<Effects, LedgerError> {
        let d = self.require_owner(id, owner)?;
        Self::require_status(d, &[DecisionStatus::Applied], LedgerAction::Deactivate)?;
        let updated = self.update(id, now, |d| {
            d.status = DecisionStatus::Deactivated;
            d.deactivated_at = Some(now);
        })?;
        self.warned.remove(&id);
        tracing::info!(group = %self.group, decision_id = %id, "decision deactivated on request");

        let mut seen = BTreeSet::new();
        let drafts: Vec<NotificationDraft> = requesters
            .iter()
            .filter(|r| seen.insert(r.trader_id))
            .map(|r| {
                self.notice(
                    &updated,
                    r.trader_id,
                    NotificationType::DecisionDeactivated,
                    format!(
                        "{} accepted your request and deactivated decision #{}",
                        updated.trader_name, id
                    ),
                )
            })
            .collect();
        let mut effects = Effects::recording(&updated);
        effects.notifications.extend(drafts);
        Ok(effects)
    }

    /// `deactivated → applied` by the owner. The baseline is recaptured and
    /// drift warnings start over.
    pub fn reactivate(&mut self, id: DecisionId, trader: TraderId, now: TimeMs) -> Result<Effects, LedgerError> {
        let d = self.require_owner(id, trader)?;
        Self::require_status(d, &[DecisionStatus::Deactivated], LedgerAction::Reactivate)?;
        let baseline = self.live.project(d.variable_changes.keys().cloned());
        let updated = self.update(id, now, |d| {
            d.status = DecisionStatus::Applied;
            d.baseline_snapshot = baseline;
            d.deactivated_at = None;
            d.drift_revoked_at = None;
        })?;
        self.warned.remove(&id);
        tracing::info!(group = %self.group, decision_id = %id, "decision reactivated");
        let draft = updated
            .reviewed_by
            .filter(|r| *r != updated.trader_id)
            .map(|reviewer| {
                self.notice(
                    &updated,
                    reviewer,
                    NotificationType::DecisionReactivated,
                    format!("{} reactivated decision #{}", updated.trader_name, id),
                )
            });
        Ok(Effects::recording(&updated).notify(draft))
    }

    /// Mark `id` superseded by `by`, recording the back-reference on `by`
    /// when it has none yet.
    pub fn supersede(&mut self, id: DecisionId, by: DecisionId, now: TimeMs) -> Result<Effects, LedgerError> {
        if id == by {
            return Err(LedgerError::InvalidInput(format!(
                "decision {} cannot supersede itself",
                id
            )));
        }
        let d = self.require(id)?;
        self.require(by)?;
        if d.status.is_terminal() {
            return Err(LedgerError::InvalidTransition {
                id,
                from: d.status,
                action: LedgerAction::Supersede,
            });
        }
        let mut effects = Effects::default();
        if self.decisions.get(&by).map_or(false, |b| b.supersedes_id.is_none()) {
            let newer = self.update(by, now, |b| b.supersedes_id = Some(id))?;
            effects.changed.push(newer);
        }
        effects.merge(self.mark_superseded(id, by, now)?);
        Ok(effects)
    }

    fn mark_superseded(&mut self, id: DecisionId, by: DecisionId, now: TimeMs) -> Result<Effects, LedgerError> {
        let updated = self.update(id, now, |d| d.status = DecisionStatus::Superseded)?;
        self.warned.remove(&id);
        tracing::info!(group = %self.group, decision_id = %id, by = %by, "decision superseded");
        Ok(Effects::recording(&updated))
    }

    /// Lay new live readings over the base and re-score drift. Readings
    /// for unknown variables, or of the wrong kind, reject the whole batch.
    pub fn update_live(&mut self, readings: &VariableSnapshot, now: TimeMs) -> Result<Effects, LedgerError> {
        self.validate_readings(readings)?;
        self.live = self.live.merged_with(readings);
        Ok(self.evaluate_drift(now))
    }

    fn validate_readings(&self, readings: &VariableSnapshot) -> Result<(), LedgerError> {
        for (key, value) in readings.iter() {
            let meta = self.variables.get(key).ok_or_else(|| {
                LedgerError::InvalidInput(format!("unknown variable {} for {}", key, self.group))
            })?;
            match (meta.kind, value) {
                (VariableKind::Number, VariableValue::Number(v)) if v.is_finite() => {}
                (VariableKind::Flag, VariableValue::Flag(_)) => {}
                (VariableKind::Number, _) => {
                    return Err(LedgerError::InvalidInput(format!(
                        "reading for {} must be a finite number",
                        key
                    )))
                }
                (VariableKind::Flag, _) => {
                    return Err(LedgerError::InvalidInput(format!(
                        "reading for {} must be true or false",
                        key
                    )))
                }
            }
        }
        Ok(())
    }

    /// Deactivate applied decisions at or past the critical threshold and
    /// warn once per apply cycle for those past the warning threshold.
    pub fn evaluate_drift(&mut self, now: TimeMs) -> Effects {
        let scores: Vec<(DecisionId, f64)> = self
            .decisions
            .values()
            .filter(|d| d.status == DecisionStatus::Applied)
            .filter_map(|d| {
                self.drift
                    .strategy
                    .decision_score(d, &self.live)
                    .map(|s| (d.id, s))
            })
            .collect();

        let mut effects = Effects::default();
        for (id, score) in scores {
            match self.drift.thresholds.classify(score) {
                DriftLevel::Critical => {
                    let Ok(updated) = self.update(id, now, |d| {
                        d.status = DecisionStatus::Deactivated;
                        d.deactivated_at = Some(now);
                        d.drift_revoked_at = Some(now);
                    }) else {
                        continue;
                    };
                    self.warned.remove(&id);
                    tracing::warn!(
                        group = %self.group,
                        decision_id = %id,
                        score,
                        actor = "system",
                        "decision auto-deactivated on critical drift"
                    );
                    let draft = self.notice(
                        &updated,
                        updated.trader_id,
                        NotificationType::DriftCritical,
                        format!(
                            "Live values reached your override on decision #{} (drift {:.2}); it was deactivated",
                            id, score
                        ),
                    );
                    effects.merge(Effects::recording(&updated).notify(Some(draft)));
                }
                DriftLevel::Warning => {
                    if self.warned.insert(id) {
                        if let Some(d) = self.decisions.get(&id) {
                            tracing::info!(group = %self.group, decision_id = %id, score, "drift warning");
                            let draft = self.notice(
                                d,
                                d.trader_id,
                                NotificationType::DriftWarning,
                                format!(
                                    "Live values are moving toward your override on decision #{} (drift {:.2})",
                                    id, score
                                ),
                            );
                            effects.notifications.push(draft);
                        }
                    }
                }
                DriftLevel::Quiet => {}
            }
        }
        effects
    }

    /// System deactivation of applied decisions whose `expires_at` passed.
    pub fn expire_due(&mut self, now: TimeMs) -> Effects {
        let due: Vec<DecisionId> = self
            .decisions
            .values()
            .filter(|d| {
                d.status == DecisionStatus::Applied && d.expires_at.map_or(false, |at| at <= now)
            })
            .map(|d| d.id)
            .collect();

        let mut effects = Effects::default();
        for id in due {
            let Ok(updated) = self.update(id, now, |d| {
                d.status = DecisionStatus::Deactivated;
                d.deactivated_at = Some(now);
            }) else {
                continue;
            };
            self.warned.remove(&id);
            tracing::info!(group = %self.group, decision_id = %id, actor = "system", "decision expired");
            let draft = self.notice(
                &updated,
                updated.trader_id,
                NotificationType::DecisionDeactivated,
                format!("Decision #{} expired and was deactivated", id),
            );
            effects.merge(Effects::recording(&updated).notify(Some(draft)));
        }
        effects
    }

    fn conflicting_ids(&self, id: DecisionId) -> Vec<DecisionId> {
        let Some(target) = self.decisions.get(&id) else {
            return Vec::new();
        };
        self.decisions
            .values()
            .filter(|d| d.id != id && d.status.is_live() && d.touches_any_of(target))
            .map(|d| d.id)
            .collect()
    }

    fn proposal_notices(&self, d: &TraderDecision) -> Vec<NotificationDraft> {
        let keys: Vec<&str> = d.variable_changes.keys().map(|k| k.as_str()).collect();
        self.roster
            .iter()
            .filter(|t| t.id != d.trader_id)
            .map(|t| {
                self.notice(
                    d,
                    t.id,
                    NotificationType::DecisionProposed,
                    format!(
                        "{} proposed decision #{} on {}",
                        d.trader_name,
                        d.id,
                        keys.join(", ")
                    ),
                )
            })
            .collect()
    }

    fn notice(
        &self,
        d: &TraderDecision,
        to: TraderId,
        kind: NotificationType,
        message: String,
    ) -> NotificationDraft {
        NotificationDraft::new(to, self.group, kind, message).about(d.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ChangeMode, VariableKey};
    use crate::frame::FrameRegistry;

    const ALICE: TraderId = TraderId(1);
    const BOB: TraderId = TraderId(2);

    fn alice() -> TraderRef {
        TraderRef { id: ALICE, name: "Alice".to_string() }
    }

    fn bob() -> TraderRef {
        TraderRef { id: BOB, name: "Bob".to_string() }
    }

    fn ledger() -> GroupLedger {
        let frames = FrameRegistry::default_frames();
        let frame = frames.get(ProductGroup::AmmoniaDomestic).unwrap();
        let live = frame
            .default_snapshot()
            .with_value(&VariableKey::new("river_stage"), 10.0);
        GroupLedger::new(
            ProductGroup::AmmoniaDomestic,
            frame.variables.clone(),
            live,
            DriftPolicy::default(),
            vec![alice(), bob()],
        )
    }

    fn river_up(by: f64) -> NewDecision {
        NewDecision::new(ALICE, "Alice", ProductGroup::AmmoniaDomestic)
            .with_change("river_stage", by, ChangeMode::Relative)
            .submitted()
    }

    fn key(s: &str) -> VariableKey {
        VariableKey::new(s)
    }

    fn t(ms: i64) -> TimeMs {
        TimeMs::new(ms)
    }

    #[test]
    fn test_propose_notifies_roster_except_proposer() {
        let mut l = ledger();
        let effects = l.propose(DecisionId(1), river_up(2.0), t(1)).unwrap();
        assert_eq!(effects.notifications.len(), 1);
        assert_eq!(effects.notifications[0].trader_id, BOB);
        assert_eq!(effects.notifications[0].kind, NotificationType::DecisionProposed);
    }

    #[test]
    fn test_draft_then_submit() {
        let mut l = ledger();
        let mut draft = river_up(2.0);
        draft.submit = false;
        let effects = l.propose(DecisionId(1), draft, t(1)).unwrap();
        assert!(effects.notifications.is_empty());
        assert_eq!(l.get(DecisionId(1)).unwrap().status, DecisionStatus::Draft);

        assert!(matches!(
            l.submit(DecisionId(1), BOB, t(2)),
            Err(LedgerError::NotOwner { .. })
        ));
        l.submit(DecisionId(1), ALICE, t(2)).unwrap();
        assert_eq!(l.get(DecisionId(1)).unwrap().status, DecisionStatus::Proposed);
    }

    #[test]
    fn test_unknown_variable_rejected() {
        let mut l = ledger();
        let bad = NewDecision::new(ALICE, "Alice", ProductGroup::AmmoniaDomestic)
            .with_change("moon_phase", 1.0, ChangeMode::Absolute);
        assert!(matches!(
            l.propose(DecisionId(1), bad, t(1)),
            Err(LedgerError::InvalidInput(_))
        ));
        assert!(l.get(DecisionId(1)).is_none());
    }

    #[test]
    fn test_apply_captures_baseline_and_overlays() {
        let mut l = ledger();
        l.propose(DecisionId(1), river_up(2.0), t(1)).unwrap();
        l.apply(DecisionId(1), &bob(), None, t(2)).unwrap();

        let d = l.get(DecisionId(1)).unwrap();
        assert_eq!(d.status, DecisionStatus::Applied);
        assert_eq!(d.baseline_snapshot[&key("river_stage")], 10.0);
        assert_eq!(d.drift_score, Some(0.0));
        assert_eq!(l.effective_state().get_f64(&key("river_stage")), Some(12.0));
    }

    #[test]
    fn test_self_review_checked_before_status() {
        let mut l = ledger();
        l.propose(DecisionId(1), river_up(2.0), t(1)).unwrap();
        l.reject(DecisionId(1), &bob(), None, t(2)).unwrap();
        assert!(matches!(
            l.apply(DecisionId(1), &alice(), None, t(3)),
            Err(LedgerError::SelfReview { .. })
        ));
        let err = l.apply(DecisionId(1), &bob(), None, t(3)).unwrap_err();
        assert!(err.is_already_resolved());
    }

    #[test]
    fn test_non_owner_deactivate_sends_request_only() {
        let mut l = ledger();
        let mut d = river_up(2.0);
        d.trader_id = BOB;
        d.trader_name = "Bob".to_string();
        l.propose(DecisionId(1), d, t(1)).unwrap();
        l.apply(DecisionId(1), &alice(), None, t(2)).unwrap();

        let (step, effects) = l.deactivate(DecisionId(1), &alice(), t(3)).unwrap();
        assert_eq!(step, DeactivateStep::RequestSent);
        assert!(effects.changed.is_empty());
        assert_eq!(effects.notifications[0].trader_id, BOB);
        assert_eq!(effects.notifications[0].kind, NotificationType::DeactivateRequested);
        assert_eq!(l.get(DecisionId(1)).unwrap().status, DecisionStatus::Applied);
    }

    #[test]
    fn test_critical_drift_auto_deactivates() {
        let mut l = ledger();
        l.propose(DecisionId(1), river_up(2.0), t(1)).unwrap();
        l.apply(DecisionId(1), &bob(), None, t(2)).unwrap();

        let half = VariableSnapshot::from_pairs([("river_stage", 11.0)], t(3));
        let effects = l.update_live(&half, t(3)).unwrap();
        assert_eq!(effects.notifications.len(), 1);
        assert_eq!(effects.notifications[0].kind, NotificationType::DriftWarning);
        // Warning is not repeated within the same apply cycle.
        assert!(l.update_live(&half, t(4)).unwrap().is_empty());

        let reached = VariableSnapshot::from_pairs([("river_stage", 12.0)], t(5));
        let effects = l.update_live(&reached, t(5)).unwrap();
        let d = l.get(DecisionId(1)).unwrap();
        assert_eq!(d.status, DecisionStatus::Deactivated);
        assert_eq!(d.drift_revoked_at, Some(t(5)));
        assert_eq!(d.drift_score, Some(1.0));
        assert_eq!(effects.notifications[0].kind, NotificationType::DriftCritical);
        assert_eq!(effects.notifications[0].trader_id, ALICE);
    }

    #[test]
    fn test_live_readings_are_checked_against_registry() {
        let mut l = ledger();
        let before = l.view(1).live;

        let unknown = VariableSnapshot::from_pairs([("river_stage", 11.0), ("sea_level", 3.0)], t(1));
        assert!(matches!(l.update_live(&unknown, t(1)), Err(LedgerError::InvalidInput(_))));

        let flag_for_number =
            VariableSnapshot::from_pairs([("river_stage", VariableValue::Flag(true))], t(1));
        assert!(matches!(l.update_live(&flag_for_number, t(1)), Err(LedgerError::InvalidInput(_))));

        let number_for_flag =
            VariableSnapshot::from_pairs([("stl_outage", VariableValue::Number(1.0))], t(1));
        assert!(matches!(l.update_live(&number_for_flag, t(1)), Err(LedgerError::InvalidInput(_))));

        let not_finite = VariableSnapshot::from_pairs([("river_stage", f64::NAN)], t(1));
        assert!(matches!(l.update_live(&not_finite, t(1)), Err(LedgerError::InvalidInput(_))));

        // A rejected batch leaves live values untouched.
        assert_eq!(l.view(2).live, before);

        let ok = VariableSnapshot::from_pairs([("stl_outage", VariableValue::Flag(true))], t(2));
        assert!(l.update_live(&ok, t(2)).is_ok());
        assert_eq!(
            l.view(3).live.get(&VariableKey::new("stl_outage")),
            Some(VariableValue::Flag(true))
        );
    }

    #[test]
    fn test_apply_supersedes_referenced_decision() {
        let mut l = ledger();
        l.propose(DecisionId(1), river_up(2.0), t(1)).unwrap();
        l.apply(DecisionId(1), &bob(), None, t(2)).unwrap();
        l.propose(DecisionId(2), river_up(3.0).superseding(DecisionId(1)), t(3))
            .unwrap();
        l.apply(DecisionId(2), &bob(), None, t(4)).unwrap();

        assert_eq!(l.get(DecisionId(1)).unwrap().status, DecisionStatus::Superseded);
        assert_eq!(l.effective_state().get_f64(&key("river_stage")), Some(13.0));
        let view = l.view(1);
        assert_eq!(view.superseded_by(DecisionId(1)).map(|d| d.id), Some(DecisionId(2)));
    }

    #[test]
    fn test_expire_due_deactivates_without_drift_flag() {
        let mut l = ledger();
        l.propose(DecisionId(1), river_up(2.0).expiring_at(t(100)), t(1))
            .unwrap();
        l.apply(DecisionId(1), &bob(), None, t(2)).unwrap();
        assert!(l.expire_due(t(99)).is_empty());
        let effects = l.expire_due(t(100));
        assert_eq!(effects.changed.len(), 1);
        let d = l.get(DecisionId(1)).unwrap();
        assert_eq!(d.status, DecisionStatus::Deactivated);
        assert!(d.drift_revoked_at.is_none());
    }

    #[test]
    fn test_revoke_is_terminal() {
        let mut l = ledger();
        l.propose(DecisionId(1), river_up(2.0), t(1)).unwrap();
        l.revoke(DecisionId(1), ALICE, t(2)).unwrap();
        assert!(matches!(
            l.revoke(DecisionId(1), ALICE, t(3)),
            Err(LedgerError::InvalidTransition { from: DecisionStatus::Revoked, .. })
        ));
    }
}
