//! In-process change bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`ChangeBus`] carries [`DeliveryChange`] notifications from whatever
//! backend owns the delivery records to every board watching a date. It is
//! designed to be shared via `Arc<ChangeBus>` across the application.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use beton_core::types::DeliveryId;

// ---------------------------------------------------------------------------
// DeliveryChange
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

/// A change to one delivery record, scoped by its scheduled date.
///
/// Constructed via [`DeliveryChange::new`] and optionally enriched with
/// [`with_payload`](DeliveryChange::with_payload).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryChange {
    pub kind: ChangeKind,
    pub delivery_id: DeliveryId,
    /// The date whose boards must reconcile.
    pub scheduled_date: NaiveDate,
    /// Free-form JSON payload (changed fields, origin).
    pub payload: serde_json::Value,
    /// When the change was observed (UTC).
    pub occurred_at: DateTime<Utc>,
}

impl DeliveryChange {
    pub fn new(
        kind: ChangeKind,
        delivery_id: impl Into<DeliveryId>,
        scheduled_date: NaiveDate,
    ) -> Self {
        Self {
            kind,
            delivery_id: delivery_id.into(),
            scheduled_date,
            payload: serde_json::Value::Object(Default::default()),
            occurred_at: Utc::now(),
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

// ---------------------------------------------------------------------------
// ChangeBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
pub const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out bus for delivery changes.
///
/// # Usage
///
/// ```rust
/// use beton_events::bus::{ChangeBus, ChangeKind, DeliveryChange};
/// use chrono::NaiveDate;
///
/// let bus = ChangeBus::default();
/// let date = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
/// let _sub = bus.subscribe_date(date);
///
/// bus.publish(DeliveryChange::new(ChangeKind::Updated, "BL-1", date));
/// ```
pub struct ChangeBus {
    sender: broadcast::Sender<DeliveryChange>,
}

impl ChangeBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed messages are dropped
    /// and slow receivers observe a lag.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish a change to all current subscribers.
    ///
    /// If there are no active subscribers the change is silently dropped.
    pub fn publish(&self, change: DeliveryChange) {
        // Ignore the SendError: it only means there are zero receivers.
        let _ = self.sender.send(change);
    }

    /// Subscribe to every change regardless of date.
    pub fn subscribe(&self) -> broadcast::Receiver<DeliveryChange> {
        self.sender.subscribe()
    }

    /// Subscribe to changes for one scheduled date.
    pub fn subscribe_date(&self, date: NaiveDate) -> DateSubscription {
        DateSubscription {
            scope: DateScope::Fixed(date),
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe to changes for whatever date `active` currently holds.
    ///
    /// The filter reads the watched value on every message, so a day switch
    /// applies to the very next change without re-subscribing.
    pub fn follow_date(&self, active: watch::Receiver<NaiveDate>) -> DateSubscription {
        DateSubscription {
            scope: DateScope::Follow(active),
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ChangeBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// DateSubscription
// ---------------------------------------------------------------------------

/// What a date-scoped subscriber observed.
#[derive(Debug, Clone)]
pub enum Notification {
    Changed(DeliveryChange),
    /// The receiver fell behind and missed `n` changes; treat as "something
    /// changed".
    Lagged(u64),
}

enum DateScope {
    Fixed(NaiveDate),
    Follow(watch::Receiver<NaiveDate>),
}

/// A subscription that only yields changes for its active date.
pub struct DateSubscription {
    scope: DateScope,
    receiver: broadcast::Receiver<DeliveryChange>,
}

impl DateSubscription {
    pub fn date(&self) -> NaiveDate {
        match &self.scope {
            DateScope::Fixed(date) => *date,
            DateScope::Follow(active) => *active.borrow(),
        }
    }

    /// Pin the subscription to `date`, detaching it from any followed value.
    pub fn set_date(&mut self, date: NaiveDate) {
        self.scope = DateScope::Fixed(date);
    }

    /// Wait for the next relevant notification.
    ///
    /// Returns `None` once the bus is dropped. Cancel-safe.
    pub async fn recv(&mut self) -> Option<Notification> {
        loop {
            match self.receiver.recv().await {
                Ok(change) if change.scheduled_date == self.date() => {
                    return Some(Notification::Changed(change));
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, date = %self.date(), "Change subscription lagged");
                    return Some(Notification::Lagged(n));
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    #[tokio::test]
    async fn publish_and_receive_for_active_date() {
        let bus = ChangeBus::default();
        let mut sub = bus.subscribe_date(day(2));

        bus.publish(
            DeliveryChange::new(ChangeKind::Updated, "BL-1", day(2))
                .with_payload(serde_json::json!({"state": "planned"})),
        );

        let Some(Notification::Changed(change)) = sub.recv().await else {
            panic!("expected a change notification");
        };
        assert_eq!(change.delivery_id, "BL-1");
        assert_eq!(change.kind, ChangeKind::Updated);
        assert_eq!(change.payload["state"], "planned");
    }

    #[tokio::test]
    async fn other_dates_are_filtered_out() {
        let bus = ChangeBus::default();
        let mut sub = bus.subscribe_date(day(2));

        bus.publish(DeliveryChange::new(ChangeKind::Created, "BL-9", day(3)));
        bus.publish(DeliveryChange::new(ChangeKind::Deleted, "BL-2", day(2)));

        let Some(Notification::Changed(change)) = sub.recv().await else {
            panic!("expected a change notification");
        };
        assert_eq!(change.delivery_id, "BL-2");
    }

    #[tokio::test]
    async fn rescoped_subscription_follows_new_date() {
        let bus = ChangeBus::default();
        let mut sub = bus.subscribe_date(day(2));
        sub.set_date(day(3));

        bus.publish(DeliveryChange::new(ChangeKind::Updated, "BL-1", day(2)));
        bus.publish(DeliveryChange::new(ChangeKind::Updated, "BL-3", day(3)));

        let Some(Notification::Changed(change)) = sub.recv().await else {
            panic!("expected a change notification");
        };
        assert_eq!(change.delivery_id, "BL-3");
    }

    #[tokio::test]
    async fn followed_date_applies_to_next_change() {
        let bus = ChangeBus::default();
        let (active, rx) = watch::channel(day(2));
        let mut sub = bus.follow_date(rx);
        assert_eq!(sub.date(), day(2));

        // Already buffered before the switch, filtered against the new day.
        bus.publish(DeliveryChange::new(ChangeKind::Updated, "BL-1", day(2)));
        active.send_replace(day(3));
        bus.publish(DeliveryChange::new(ChangeKind::Updated, "BL-3", day(3)));

        assert_eq!(sub.date(), day(3));
        let Some(Notification::Changed(change)) = sub.recv().await else {
            panic!("expected a change notification");
        };
        assert_eq!(change.delivery_id, "BL-3");
    }

    #[tokio::test]
    async fn lag_is_reported_not_swallowed() {
        let bus = ChangeBus::new(2);
        let mut sub = bus.subscribe_date(day(2));

        for i in 0..5 {
            bus.publish(DeliveryChange::new(ChangeKind::Updated, format!("BL-{i}"), day(2)));
        }

        assert!(matches!(sub.recv().await, Some(Notification::Lagged(3))));
    }

    #[tokio::test]
    async fn closed_bus_ends_subscription() {
        let bus = ChangeBus::default();
        let mut sub = bus.subscribe_date(day(2));
        drop(bus);
        assert!(sub.recv().await.is_none());
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        let bus = ChangeBus::default();
        bus.publish(DeliveryChange::new(ChangeKind::Created, "BL-1", day(2)));
        assert_eq!(bus.subscriber_count(), 0);
    }
}
