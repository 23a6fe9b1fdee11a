//! Async coordinator over the per-group state machines.
//!
//! Writes to one product group go through that group's mutex, one at a
//! time. After every write the coordinator publishes a fresh `GroupView`
//! on a watch channel, and all reads are served from the latest view
//! without taking the write lock.
//!
//! Lock order is always group state first, then the notification store.

use super::state::{DeactivateStep, DriftPolicy, Effects, GroupLedger, GroupView};
use super::LedgerError;
use crate::datasource::SnapshotSource;
use crate::domain::{
    DeactivationRequester, DeactivationResponse, DecisionId, DecisionStatus, NewDecision,
    NotificationId, NotificationType, ProductGroup, TimeMs, TraderDecision, TraderId, TraderRef,
    TraderNotification, VariableSnapshot,
};
use crate::frame::FrameRegistry;
use crate::notify::{DeskEvent, NotificationCenter, NotifyError, Topic};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Default)]
pub struct LedgerSettings {
    pub drift: DriftPolicy,
    /// Traders told about every new proposal.
    pub roster: Vec<TraderRef>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeactivateOutcome {
    Deactivated { decision: TraderDecision },
    /// Not the owner: the decision is unchanged and the owner was asked.
    RequestSent { notification: TraderNotification },
}

#[derive(Debug)]
struct GroupSlot {
    state: Mutex<GroupLedger>,
    view: watch::Sender<Arc<GroupView>>,
}

#[derive(Debug)]
pub struct DecisionLedger {
    groups: BTreeMap<ProductGroup, GroupSlot>,
    next_id: AtomicU64,
    notifications: Arc<NotificationCenter>,
}

impl DecisionLedger {
    /// One group ledger per configured frame, starting from the frame's
    /// default values.
    pub fn new(
        frames: &FrameRegistry,
        settings: LedgerSettings,
        notifications: Arc<NotificationCenter>,
    ) -> Self {
        let groups = frames
            .iter()
            .map(|frame| {
                let state = GroupLedger::new(
                    frame.product_group,
                    frame.variables.clone(),
                    frame.default_snapshot(),
                    settings.drift.clone(),
                    settings.roster.clone(),
                );
                let (view, _) = watch::channel(Arc::new(state.view(0)));
                (
                    frame.product_group,
                    GroupSlot {
                        state: Mutex::new(state),
                        view,
                    },
                )
            })
            .collect();
        Self {
            groups,
            next_id: AtomicU64::new(0),
            notifications,
        }
    }

    pub fn groups(&self) -> impl Iterator<Item = ProductGroup> + '_ {
        self.groups.keys().copied()
    }

    fn slot(&self, group: ProductGroup) -> Result<&GroupSlot, LedgerError> {
        self.groups
            .get(&group)
            .ok_or(LedgerError::UnknownProductGroup(group))
    }

    /// Decisions never move between groups, so the latest views are
    /// enough to route an id.
    fn group_of(&self, id: DecisionId) -> Result<ProductGroup, LedgerError> {
        self.groups
            .iter()
            .find(|(_, slot)| slot.view.borrow().contains(id))
            .map(|(group, _)| *group)
            .ok_or(LedgerError::NotFound(id))
    }

    /// Publish the post-write view, then deliver side effects. Called with
    /// the group lock held.
    async fn commit(
        &self,
        slot: &GroupSlot,
        state: &GroupLedger,
        effects: Effects,
    ) -> Vec<TraderNotification> {
        let group = state.product_group();
        let version = slot.view.borrow().version + 1;
        slot.view.send_replace(Arc::new(state.view(version)));

        let bus = self.notifications.bus();
        for decision in effects.changed {
            if decision.status != DecisionStatus::Applied {
                let closed = self.notifications.close_requests(decision.id, TimeMs::now()).await;
                if closed > 0 {
                    tracing::info!(
                        decision_id = %decision.id,
                        status = %decision.status,
                        closed,
                        "closed unanswered deactivation requests"
                    );
                }
            }
            bus.publish(
                Topic::Decisions(group),
                DeskEvent::DecisionChanged(Box::new(decision)),
            );
        }
        self.notifications.deliver(effects.notifications).await
    }

    async fn write<T, F>(&self, group: ProductGroup, op: F) -> Result<(T, Vec<TraderNotification>), LedgerError>
    where
        F: FnOnce(&mut GroupLedger, TimeMs) -> Result<(T, Effects), LedgerError>,
    {
        let slot = self.slot(group)?;
        let mut state = slot.state.lock().await;
        let (out, effects) = op(&mut *state, TimeMs::now())?;
        let delivered = self.commit(slot, &state, effects).await;
        Ok((out, delivered))
    }

    /// Write to the group owning `id` and return the decision afterwards.
    async fn transition<F>(&self, id: DecisionId, op: F) -> Result<TraderDecision, LedgerError>
    where
        F: FnOnce(&mut GroupLedger, TimeMs) -> Result<Effects, LedgerError>,
    {
        let group = self.group_of(id)?;
        let (decision, _) = self
            .write(group, |state, now| {
                let effects = op(state, now)?;
                let decision = state.get(id).ok_or(LedgerError::NotFound(id))?;
                Ok((decision, effects))
            })
            .await?;
        Ok(decision)
    }

    pub async fn propose(&self, new: NewDecision) -> Result<TraderDecision, LedgerError> {
        let group = new.product_group;
        self.slot(group)?;
        let id = DecisionId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let (decision, _) = self
            .write(group, |state, now| {
                let effects = state.propose(id, new, now)?;
                let decision = state.get(id).ok_or(LedgerError::NotFound(id))?;
                Ok((decision, effects))
            })
            .await?;
        Ok(decision)
    }

    pub async fn submit(&self, id: DecisionId, trader: TraderId) -> Result<TraderDecision, LedgerError> {
        self.transition(id, |state, now| state.submit(id, trader, now))
            .await
    }

    pub async fn apply(
        &self,
        id: DecisionId,
        reviewer: &TraderRef,
        note: Option<String>,
    ) -> Result<TraderDecision, LedgerError> {
        self.transition(id, |state, now| state.apply(id, reviewer, note, now))
            .await
    }

    pub async fn reject(
        &self,
        id: DecisionId,
        reviewer: &TraderRef,
        note: Option<String>,
    ) -> Result<TraderDecision, LedgerError> {
        self.transition(id, |state, now| state.reject(id, reviewer, note, now))
            .await
    }

    pub async fn revoke(&self, id: DecisionId, trader: TraderId) -> Result<TraderDecision, LedgerError> {
        self.transition(id, |state, now| state.revoke(id, trader, now))
            .await
    }

    pub async fn reactivate(&self, id: DecisionId, trader: TraderId) -> Result<TraderDecision, LedgerError> {
        self.transition(id, |state, now| state.reactivate(id, trader, now))
            .await
    }

    pub async fn supersede(&self, id: DecisionId, by: DecisionId) -> Result<TraderDecision, LedgerError> {
        if self.group_of(by)? != self.group_of(id)? {
            return Err(LedgerError::InvalidInput(format!(
                "decision {} belongs to another product group",
                by
            )));
        }
        self.transition(id, |state, now| state.supersede(id, by, now))
            .await
    }

    pub async fn deactivate(
        &self,
        id: DecisionId,
        requester: &TraderRef,
    ) -> Result<DeactivateOutcome, LedgerError> {
        let group = self.group_of(id)?;
        let ((step, decision), delivered) = self
            .write(group, |state, now| {
                let (step, effects) = state.deactivate(id, requester, now)?;
                let decision = state.get(id).ok_or(LedgerError::NotFound(id))?;
                Ok(((step, decision), effects))
            })
            .await?;
        match step {
            DeactivateStep::Deactivated => Ok(DeactivateOutcome::Deactivated { decision }),
            DeactivateStep::RequestSent => delivered
                .into_iter()
                .find(|n| n.kind == NotificationType::DeactivateRequested)
                .map(|notification| DeactivateOutcome::RequestSent { notification })
                .ok_or(LedgerError::NotFound(id)),
        }
    }

    /// The owner answers pending deactivation requests. `Accepted`
    /// deactivates on the requesters' behalf; `Rejected` only records the
    /// answer.
    pub async fn respond_to_deactivation(
        &self,
        id: DecisionId,
        response: DeactivationResponse,
        responder: &TraderRef,
    ) -> Result<TraderDecision, LedgerError> {
        let group = self.group_of(id)?;
        let slot = self.slot(group)?;
        let mut state = slot.state.lock().await;
        let now = TimeMs::now();

        let decision = state.get(id).ok_or(LedgerError::NotFound(id))?;
        if decision.trader_id != responder.id {
            return Err(LedgerError::NotOwner {
                id,
                trader: responder.id,
            });
        }
        let pending = self.notifications.pending_requests(id).await;
        if pending.is_empty() {
            return Err(LedgerError::NoPendingRequest(id));
        }
        let requesters: Vec<DeactivationRequester> =
            pending.into_iter().filter_map(|n| n.requester).collect();

        let effects = match response {
            DeactivationResponse::Accepted => {
                state.deactivate_for_requester(id, responder.id, &requesters, now)?
            }
            DeactivationResponse::Rejected => Effects::default(),
        };
        self.notifications
            .record_response(id, response, &responder.name)
            .await
            .map_err(|_| LedgerError::NoPendingRequest(id))?;
        tracing::info!(decision_id = %id, ?response, "deactivation request answered");

        self.commit(slot, &state, effects).await;
        state.get(id).ok_or(LedgerError::NotFound(id))
    }

    /// Lay new live readings over the group's base and run drift
    /// evaluation. Returns the decisions that changed as a result.
    pub async fn update_live(
        &self,
        group: ProductGroup,
        readings: &VariableSnapshot,
    ) -> Result<Vec<TraderDecision>, LedgerError> {
        let (changed, _) = self
            .write(group, |state, now| {
                let effects = state.update_live(readings, now)?;
                Ok((effects.changed.clone(), effects))
            })
            .await?;
        Ok(changed)
    }

    /// Deactivate expired decisions in every group.
    pub async fn expire_due(&self, now: TimeMs) -> Vec<TraderDecision> {
        let mut expired = Vec::new();
        for slot in self.groups.values() {
            let mut state = slot.state.lock().await;
            let effects = state.expire_due(now);
            if effects.is_empty() {
                continue;
            }
            expired.extend(effects.changed.iter().cloned());
            self.commit(slot, &state, effects).await;
        }
        expired
    }

    /// Periodic `expire_due` sweep.
    pub fn spawn_expiry_sweeper(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                let expired = self.expire_due(TimeMs::now()).await;
                if !expired.is_empty() {
                    tracing::info!(count = expired.len(), "expired decisions deactivated");
                }
            }
        })
    }

    pub fn view(&self, group: ProductGroup) -> Result<Arc<GroupView>, LedgerError> {
        Ok(self.slot(group)?.view.borrow().clone())
    }

    /// Receiver that sees every new view of the group.
    pub fn watch(&self, group: ProductGroup) -> Result<watch::Receiver<Arc<GroupView>>, LedgerError> {
        Ok(self.slot(group)?.view.subscribe())
    }

    pub fn list(
        &self,
        group: ProductGroup,
        status: Option<DecisionStatus>,
    ) -> Result<Vec<TraderDecision>, LedgerError> {
        Ok(self.view(group)?.with_status(status))
    }

    pub fn get(&self, id: DecisionId) -> Result<TraderDecision, LedgerError> {
        let view = self.view(self.group_of(id)?)?;
        view.get(id).cloned().ok_or(LedgerError::NotFound(id))
    }

    pub fn effective_state(&self, group: ProductGroup) -> Result<VariableSnapshot, LedgerError> {
        Ok(self.view(group)?.effective.clone())
    }

    pub fn live(&self, group: ProductGroup) -> Result<VariableSnapshot, LedgerError> {
        Ok(self.view(group)?.live.clone())
    }

    pub fn conflicting_decisions(&self, id: DecisionId) -> Result<Vec<TraderDecision>, LedgerError> {
        let view = self.view(self.group_of(id)?)?;
        view.conflicts_of(id).ok_or(LedgerError::NotFound(id))
    }

    pub fn superseded_by(&self, id: DecisionId) -> Result<Option<TraderDecision>, LedgerError> {
        let view = self.view(self.group_of(id)?)?;
        Ok(view.superseded_by(id).cloned())
    }

    pub async fn notifications(&self, trader: TraderId, unread_only: bool) -> Vec<TraderNotification> {
        self.notifications.for_trader(trader, unread_only).await
    }

    pub async fn mark_read(
        &self,
        id: NotificationId,
        trader: TraderId,
    ) -> Result<TraderNotification, NotifyError> {
        self.notifications.mark_read(id, trader).await
    }
}

/// The auto-runner solves against what the desk currently believes:
/// the live base with applied overrides on top.
#[async_trait]
impl SnapshotSource for DecisionLedger {
    async fn snapshot(&self, group: ProductGroup) -> Option<VariableSnapshot> {
        self.effective_state(group).ok()
    }
}
