use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use outpost_common::{Message, MessageId};
use tracing::debug;

/// Receives a snapshot of a message after every queue transition.
///
/// Called with the queue's write lock held; implementations must not call
/// back into the queue.
pub trait QueueObserver: Send + Sync {
    fn observe(&self, message: &Message);
}

/// Latest known state of every message, including ones the queue has
/// already released as delivered or failed.
#[derive(Debug, Default)]
pub struct StatusTracker {
    records: DashMap<MessageId, Message>,
}

impl StatusTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, id: &MessageId) -> Option<Message> {
        self.records.get(id).map(|record| record.clone())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drops terminal records last updated more than `retention` ago and
    /// returns how many were removed.
    pub fn prune(&self, retention: Duration) -> usize {
        let cutoff = TimeDelta::from_std(retention)
            .ok()
            .and_then(|retention| Utc::now().checked_sub_signed(retention))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let before = self.records.len();

        self.records
            .retain(|_, message| !(message.status.is_terminal() && message.updated_at < cutoff));

        let removed = before.saturating_sub(self.records.len());
        if removed > 0 {
            debug!(removed, "Pruned terminal status records");
        }

        removed
    }
}

impl QueueObserver for StatusTracker {
    fn observe(&self, message: &Message) {
        self.records.insert(message.id.clone(), message.clone());
    }
}

#[cfg(test)]
mod tests {
    use outpost_common::Status;
    use pretty_assertions::assert_eq;

    use super::*;

    fn record(status: Status, age: TimeDelta) -> Message {
        let mut message = Message::new("a@example.com", vec!["b@example.com".into()], "s");
        message.status = status;
        message.updated_at = Utc::now() - age;
        message
    }

    #[test]
    fn keeps_latest_snapshot() {
        let tracker = StatusTracker::new();
        let mut message = record(Status::Queued, TimeDelta::zero());
        tracker.observe(&message);

        message.status = Status::Delivered;
        tracker.observe(&message);

        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.get(&message.id).unwrap().status, Status::Delivered);
        assert!(tracker.get(&MessageId::from("unknown")).is_none());
    }

    #[test]
    fn prune_only_drops_old_terminal_records() {
        let tracker = StatusTracker::new();
        let old_delivered = record(Status::Delivered, TimeDelta::hours(2));
        let old_failed = record(Status::Failed, TimeDelta::hours(2));
        let old_queued = record(Status::Queued, TimeDelta::hours(2));
        let fresh_delivered = record(Status::Delivered, TimeDelta::zero());

        for message in [&old_delivered, &old_failed, &old_queued, &fresh_delivered] {
            tracker.observe(message);
        }

        assert_eq!(tracker.prune(Duration::from_secs(3600)), 2);
        assert!(tracker.get(&old_delivered.id).is_none());
        assert!(tracker.get(&old_failed.id).is_none());
        assert!(tracker.get(&old_queued.id).is_some());
        assert!(tracker.get(&fresh_delivered.id).is_some());
    }
}
