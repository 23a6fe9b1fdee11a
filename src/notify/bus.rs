//! Typed, topic-filtered event bus over a single tokio broadcast channel.

use crate::autorunner::AutoRunRecord;
use crate::domain::{ProductGroup, TraderDecision, TraderId, TraderNotification};
use crate::pipeline::{CallerRef, PipelineEvent};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

/// Address of a stream of events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Phase events of one pipeline caller.
    Pipeline(CallerRef),
    /// Lifecycle changes of decisions in one product group.
    Decisions(ProductGroup),
    /// Notifications delivered to one trader.
    Trader(TraderId),
    /// Completed auto-runner runs for one product group.
    AutoRunner(ProductGroup),
}

#[derive(Debug, Clone)]
pub enum DeskEvent {
    Pipeline(PipelineEvent),
    DecisionChanged(Box<TraderDecision>),
    Notification(Box<TraderNotification>),
    AutoRun(Box<AutoRunRecord>),
}

#[derive(Debug, Clone)]
struct Envelope {
    topic: Topic,
    event: DeskEvent,
}

/// Fire-and-forget broadcast. Delivery is at-most-once: a slow subscriber
/// that lags behind the channel capacity skips what it missed, and
/// publishing with no subscribers is not an error.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Envelope>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(16));
        Self { tx }
    }

    pub fn publish(&self, topic: Topic, event: DeskEvent) {
        if self.tx.send(Envelope { topic, event }).is_err() {
            tracing::trace!(?topic, "no subscribers for event");
        }
    }

    pub fn subscribe(&self, topic: Topic) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
            topic: Some(topic),
        }
    }

    /// Every event on every topic.
    pub fn subscribe_all(&self) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
            topic: None,
        }
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[derive(Debug)]
pub struct Subscription {
    rx: broadcast::Receiver<Envelope>,
    topic: Option<Topic>,
}

impl Subscription {
    /// Next event on this subscription's topic, or `None` once the bus is
    /// gone.
    pub async fn recv(&mut self) -> Option<DeskEvent> {
        loop {
            match self.rx.recv().await {
                Ok(envelope) => {
                    if self.topic.map_or(true, |t| t == envelope.topic) {
                        return Some(envelope.event);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant; `None` when nothing matching is queued.
    pub fn try_recv(&mut self) -> Option<DeskEvent> {
        use broadcast::error::TryRecvError;
        loop {
            match self.rx.try_recv() {
                Ok(envelope) => {
                    if self.topic.map_or(true, |t| t == envelope.topic) {
                        return Some(envelope.event);
                    }
                }
                Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NotificationId, NotificationType, TimeMs};

    fn notification(trader: i64) -> DeskEvent {
        DeskEvent::Notification(Box::new(TraderNotification {
            id: NotificationId(1),
            trader_id: TraderId(trader),
            product_group: ProductGroup::AmmoniaDomestic,
            kind: NotificationType::DecisionApplied,
            decision_id: None,
            message: "applied".to_string(),
            read: false,
            response: None,
            responded_by: None,
            requester: None,
            closed_at: None,
            inserted_at: TimeMs::new(0),
        }))
    }

    #[tokio::test]
    async fn test_subscription_filters_by_topic() {
        let bus = EventBus::new(32);
        let mut alice = bus.subscribe(Topic::Trader(TraderId(1)));
        bus.publish(Topic::Trader(TraderId(2)), notification(2));
        bus.publish(Topic::Trader(TraderId(1)), notification(1));

        match alice.recv().await {
            Some(DeskEvent::Notification(n)) => assert_eq!(n.trader_id, TraderId(1)),
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(alice.try_recv().is_none());
    }

    #[test]
    fn test_publish_without_subscribers_is_fine() {
        let bus = EventBus::new(16);
        bus.publish(Topic::Trader(TraderId(1)), notification(1));
        assert_eq!(bus.receiver_count(), 0);
    }

    #[tokio::test]
    async fn test_lagged_subscriber_keeps_receiving() {
        let bus = EventBus::new(16);
        let mut sub = bus.subscribe_all();
        for _ in 0..40 {
            bus.publish(Topic::Trader(TraderId(1)), notification(1));
        }
        assert!(sub.recv().await.is_some());
    }
}
