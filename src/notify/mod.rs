//! Notification fan-out: typed event bus plus the durable notification store.

pub mod bus;
pub mod center;

pub use bus::{DeskEvent, EventBus, Subscription, Topic};
pub use center::{NotificationCenter, NotifyError};
