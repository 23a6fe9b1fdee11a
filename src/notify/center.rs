//! Durable notification store with bus fan-out on delivery.

use super::bus::{DeskEvent, EventBus, Topic};
use crate::domain::{
    DecisionId, DeactivationResponse, NotificationDraft, NotificationId, TimeMs, TraderId,
    TraderNotification,
};
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NotifyError {
    #[error("notification {0} not found")]
    NotFound(NotificationId),
    #[error("no pending deactivation request for decision {0}")]
    NoPendingRequest(DecisionId),
}

#[derive(Debug, Default)]
struct Store {
    next_id: u64,
    items: Vec<TraderNotification>,
}

/// Notifications are stored before they are broadcast, so a subscriber
/// that missed the broadcast can re-read them.
#[derive(Debug)]
pub struct NotificationCenter {
    store: Mutex<Store>,
    bus: EventBus,
}

impl NotificationCenter {
    pub fn new(bus: EventBus) -> Self {
        Self {
            store: Mutex::new(Store::default()),
            bus,
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub async fn deliver(&self, drafts: Vec<NotificationDraft>) -> Vec<TraderNotification> {
        if drafts.is_empty() {
            return Vec::new();
        }
        let now = TimeMs::now();
        let stored: Vec<TraderNotification> = {
            let mut store = self.store.lock().await;
            drafts
                .into_iter()
                .map(|d| {
                    store.next_id += 1;
                    let n = TraderNotification {
                        id: NotificationId(store.next_id),
                        trader_id: d.trader_id,
                        product_group: d.product_group,
                        kind: d.kind,
                        decision_id: d.decision_id,
                        message: d.message,
                        read: false,
                        response: None,
                        responded_by: None,
                        requester: d.requester,
                        closed_at: None,
                        inserted_at: now,
                    };
                    store.items.push(n.clone());
                    n
                })
                .collect()
        };
        for n in &stored {
            tracing::debug!(trader = %n.trader_id, kind = %n.kind, "notification delivered");
            self.bus.publish(
                Topic::Trader(n.trader_id),
                DeskEvent::Notification(Box::new(n.clone())),
            );
        }
        stored
    }

    /// A trader's notifications, newest first.
    pub async fn for_trader(&self, trader: TraderId, unread_only: bool) -> Vec<TraderNotification> {
        let store = self.store.lock().await;
        store
            .items
            .iter()
            .rev()
            .filter(|n| n.trader_id == trader && (!unread_only || !n.read))
            .cloned()
            .collect()
    }

    pub async fn get(&self, id: NotificationId) -> Option<TraderNotification> {
        let store = self.store.lock().await;
        store.items.iter().find(|n| n.id == id).cloned()
    }

    /// Mark read. Another trader's notification reads as not found.
    pub async fn mark_read(
        &self,
        id: NotificationId,
        trader: TraderId,
    ) -> Result<TraderNotification, NotifyError> {
        let mut store = self.store.lock().await;
        let n = store
            .items
            .iter_mut()
            .find(|n| n.id == id && n.trader_id == trader)
            .ok_or(NotifyError::NotFound(id))?;
        n.read = true;
        Ok(n.clone())
    }

    /// Deactivation requests on the decision still waiting for an answer.
    pub async fn pending_requests(&self, decision_id: DecisionId) -> Vec<TraderNotification> {
        let store = self.store.lock().await;
        store
            .items
            .iter()
            .filter(|n| n.is_pending_request_for(decision_id))
            .cloned()
            .collect()
    }

    /// Close every pending request on the decision without an answer.
    /// Returns how many were closed.
    pub async fn close_requests(&self, decision_id: DecisionId, now: TimeMs) -> usize {
        let mut store = self.store.lock().await;
        let mut closed = 0;
        for n in store
            .items
            .iter_mut()
            .filter(|n| n.is_pending_request_for(decision_id))
        {
            n.closed_at = Some(now);
            closed += 1;
        }
        closed
    }

    /// Record the owner's answer on every pending request for the decision.
    /// Returns the updated requests.
    pub async fn record_response(
        &self,
        decision_id: DecisionId,
        response: DeactivationResponse,
        responder_name: &str,
    ) -> Result<Vec<TraderNotification>, NotifyError> {
        let mut store = self.store.lock().await;
        let answered: Vec<TraderNotification> = store
            .items
            .iter_mut()
            .filter(|n| n.is_pending_request_for(decision_id))
            .map(|n| {
                n.response = Some(response);
                n.responded_by = Some(responder_name.to_string());
                n.read = true;
                n.clone()
            })
            .collect();
        if answered.is_empty() {
            return Err(NotifyError::NoPendingRequest(decision_id));
        }
        Ok(answered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DeactivationRequester, NotificationType, ProductGroup};

    fn draft(trader: i64, kind: NotificationType) -> NotificationDraft {
        NotificationDraft::new(
            TraderId(trader),
            ProductGroup::AmmoniaDomestic,
            kind,
            format!("{} for {}", kind, trader),
        )
    }

    #[tokio::test]
    async fn test_deliver_assigns_ids_and_publishes() {
        let bus = EventBus::new(32);
        let mut sub = bus.subscribe(Topic::Trader(TraderId(2)));
        let center = NotificationCenter::new(bus);

        let stored = center
            .deliver(vec![
                draft(1, NotificationType::DecisionProposed),
                draft(2, NotificationType::DecisionProposed),
            ])
            .await;
        assert_eq!(stored[0].id, NotificationId(1));
        assert_eq!(stored[1].id, NotificationId(2));

        match sub.try_recv() {
            Some(DeskEvent::Notification(n)) => assert_eq!(n.trader_id, TraderId(2)),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_mark_read_is_owner_scoped() {
        let center = NotificationCenter::new(EventBus::new(16));
        let stored = center.deliver(vec![draft(1, NotificationType::DriftWarning)]).await;
        let id = stored[0].id;

        assert_eq!(
            center.mark_read(id, TraderId(2)).await,
            Err(NotifyError::NotFound(id))
        );
        assert!(center.mark_read(id, TraderId(1)).await.unwrap().read);
        assert!(center.for_trader(TraderId(1), true).await.is_empty());
        assert_eq!(center.for_trader(TraderId(1), false).await.len(), 1);
    }

    #[tokio::test]
    async fn test_record_response_requires_pending_request() {
        let center = NotificationCenter::new(EventBus::new(16));
        let decision = DecisionId(9);
        assert_eq!(
            center
                .record_response(decision, DeactivationResponse::Rejected, "Owner")
                .await,
            Err(NotifyError::NoPendingRequest(decision))
        );

        let request = draft(1, NotificationType::DeactivateRequested)
            .about(decision)
            .requested_by(DeactivationRequester {
                trader_id: TraderId(2),
                trader_name: "Bo".to_string(),
            });
        center.deliver(vec![request]).await;
        assert_eq!(center.pending_requests(decision).await.len(), 1);

        let answered = center
            .record_response(decision, DeactivationResponse::Rejected, "Owner")
            .await
            .unwrap();
        assert_eq!(answered[0].response, Some(DeactivationResponse::Rejected));
        assert_eq!(answered[0].responded_by.as_deref(), Some("Owner"));
        assert!(center.pending_requests(decision).await.is_empty());
    }

    #[tokio::test]
    async fn test_closed_request_cannot_be_answered() {
        let center = NotificationCenter::new(EventBus::new(16));
        let decision = DecisionId(4);
        let request = draft(1, NotificationType::DeactivateRequested)
            .about(decision)
            .requested_by(DeactivationRequester {
                trader_id: TraderId(3),
                trader_name: "Cy".to_string(),
            });
        center.deliver(vec![request]).await;

        assert_eq!(center.close_requests(decision, TimeMs::new(50)).await, 1);
        assert_eq!(center.close_requests(decision, TimeMs::new(60)).await, 0);
        assert!(center.pending_requests(decision).await.is_empty());
        assert_eq!(
            center
                .record_response(decision, DeactivationResponse::Accepted, "Owner")
                .await,
            Err(NotifyError::NoPendingRequest(decision))
        );
        let stored = center.for_trader(TraderId(1), false).await;
        assert_eq!(stored[0].closed_at, Some(TimeMs::new(50)));
        assert_eq!(stored[0].response, None);
    }
}
