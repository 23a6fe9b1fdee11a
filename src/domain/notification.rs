//! Trader notifications produced by ledger and auto-runner side effects.

use super::primitives::{DecisionId, NotificationId, ProductGroup, TimeMs, TraderId};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    DecisionProposed,
    DecisionApplied,
    DecisionRejected,
    DecisionDeactivated,
    DecisionReactivated,
    DeactivateRequested,
    DriftWarning,
    DriftCritical,
    AutoSolve,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::DecisionProposed => "decision_proposed",
            NotificationType::DecisionApplied => "decision_applied",
            NotificationType::DecisionRejected => "decision_rejected",
            NotificationType::DecisionDeactivated => "decision_deactivated",
            NotificationType::DecisionReactivated => "decision_reactivated",
            NotificationType::DeactivateRequested => "deactivate_requested",
            NotificationType::DriftWarning => "drift_warning",
            NotificationType::DriftCritical => "drift_critical",
            NotificationType::AutoSolve => "auto_solve",
        }
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owner's answer to a deactivation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeactivationResponse {
    Accepted,
    Rejected,
}

/// Who asked for a deactivation on someone else's decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeactivationRequester {
    pub trader_id: TraderId,
    pub trader_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraderNotification {
    pub id: NotificationId,
    pub trader_id: TraderId,
    pub product_group: ProductGroup,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub decision_id: Option<DecisionId>,
    pub message: String,
    pub read: bool,
    /// Only ever set on `deactivate_requested` notifications.
    pub response: Option<DeactivationResponse>,
    pub responded_by: Option<String>,
    pub requester: Option<DeactivationRequester>,
    /// Set when the decision left `applied` before the owner answered. A
    /// closed request can no longer be answered.
    #[serde(default)]
    pub closed_at: Option<TimeMs>,
    pub inserted_at: TimeMs,
}

impl TraderNotification {
    /// A deactivation request still waiting for the owner's answer.
    pub fn is_pending_request_for(&self, decision_id: DecisionId) -> bool {
        self.kind == NotificationType::DeactivateRequested
            && self.decision_id == Some(decision_id)
            && self.response.is_none()
            && self.closed_at.is_none()
    }
}

/// A notification before it has been stored and assigned an id.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationDraft {
    pub trader_id: TraderId,
    pub product_group: ProductGroup,
    pub kind: NotificationType,
    pub decision_id: Option<DecisionId>,
    pub message: String,
    pub requester: Option<DeactivationRequester>,
}

impl NotificationDraft {
    pub fn new(
        trader_id: TraderId,
        product_group: ProductGroup,
        kind: NotificationType,
        message: String,
    ) -> Self {
        Self {
            trader_id,
            product_group,
            kind,
            decision_id: None,
            message,
            requester: None,
        }
    }

    pub fn about(mut self, decision_id: DecisionId) -> Self {
        self.decision_id = Some(decision_id);
        self
    }

    pub fn requested_by(mut self, requester: DeactivationRequester) -> Self {
        self.requester = Some(requester);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_type_serializes_snake_case() {
        let json = serde_json::to_string(&NotificationType::DeactivateRequested).unwrap();
        assert_eq!(json, "\"deactivate_requested\"");
        assert_eq!(NotificationType::DriftCritical.to_string(), "drift_critical");
    }

    #[test]
    fn test_pending_request_detection() {
        let mut n = TraderNotification {
            id: NotificationId(1),
            trader_id: TraderId(1),
            product_group: ProductGroup::AmmoniaDomestic,
            kind: NotificationType::DeactivateRequested,
            decision_id: Some(DecisionId(7)),
            message: String::new(),
            read: false,
            response: None,
            responded_by: None,
            requester: None,
            closed_at: None,
            inserted_at: TimeMs::new(0),
        };
        assert!(n.is_pending_request_for(DecisionId(7)));
        assert!(!n.is_pending_request_for(DecisionId(8)));
        n.closed_at = Some(TimeMs::new(5));
        assert!(!n.is_pending_request_for(DecisionId(7)));
        n.closed_at = None;
        n.response = Some(DeactivationResponse::Rejected);
        assert!(!n.is_pending_request_for(DecisionId(7)));
    }
}
