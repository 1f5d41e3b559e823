use std::{collections::BTreeMap, fmt, sync::Arc, time::Duration};

use ahash::AHashMap;
use chrono::Utc;
use outpost_common::{Message, MessageId, Status};
use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::{Queue, QueueError, QueueObserver, Result, retry};

/// Insertion-ordered in-memory queue.
///
/// All state sits behind a single `RwLock`: mutations (including the
/// select-and-transition step of `dequeue`) take the write lock, `size`
/// takes the read lock. Observers are notified while the write lock is
/// held so they see transitions of a message in order.
pub struct MemoryQueue {
    inner: RwLock<Inner>,
    capacity: usize,
    retry_delay: Duration,
    observer: Option<Arc<dyn QueueObserver>>,
}

#[derive(Default)]
struct Inner {
    next_seq: u64,
    order: BTreeMap<u64, MessageId>,
    entries: AHashMap<MessageId, Entry>,
}

struct Entry {
    seq: u64,
    message: Message,
}

impl fmt::Debug for MemoryQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryQueue")
            .field("size", &self.size())
            .field("capacity", &self.capacity)
            .field("retry_delay", &self.retry_delay)
            .field("observed", &self.observer.is_some())
            .finish()
    }
}

impl MemoryQueue {
    #[must_use]
    pub fn new(capacity: usize, retry_delay: Duration) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            capacity,
            retry_delay,
            observer: None,
        }
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn QueueObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Snapshot of an active message.
    #[must_use]
    pub fn get(&self, id: &MessageId) -> Option<Message> {
        self.inner
            .read()
            .entries
            .get(id)
            .map(|entry| entry.message.clone())
    }

    fn notify(&self, message: &Message) {
        if let Some(observer) = &self.observer {
            observer.observe(message);
        }
    }
}

impl Queue for MemoryQueue {
    fn enqueue(&self, mut message: Message) -> Result<()> {
        let mut inner = self.inner.write();
        let replaced = inner.entries.get(&message.id).map(|entry| entry.seq);

        if replaced.is_none() && inner.entries.len() >= self.capacity {
            return Err(QueueError::Full {
                capacity: self.capacity,
            });
        }

        message.status = Status::Queued;
        message.touch();

        // A re-used id takes the new position; the old one must not linger.
        if let Some(seq) = replaced {
            inner.order.remove(&seq);
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.order.insert(seq, message.id.clone());

        self.notify(&message);
        trace!(message_id = %message.id, "Enqueued message");
        inner.entries.insert(message.id.clone(), Entry { seq, message });

        Ok(())
    }

    fn dequeue(&self, max: usize) -> Vec<Message> {
        if max == 0 {
            return Vec::new();
        }

        let mut inner = self.inner.write();
        let now = Utc::now();

        let ready: Vec<MessageId> = inner
            .order
            .values()
            .filter(|id| {
                inner.entries.get(*id).is_some_and(|entry| {
                    entry.message.status == Status::Queued && entry.message.is_due(now)
                })
            })
            .take(max)
            .cloned()
            .collect();

        let mut batch = Vec::with_capacity(ready.len());
        for id in ready {
            if let Some(entry) = inner.entries.get_mut(&id) {
                entry.message.status = Status::Sending;
                entry.message.updated_at = now;
                self.notify(&entry.message);
                batch.push(entry.message.clone());
            }
        }

        if !batch.is_empty() {
            debug!(count = batch.len(), "Dequeued messages for delivery");
        }

        batch
    }

    fn mark_delivered(&self, id: &MessageId) -> Result<()> {
        let mut inner = self.inner.write();

        let Entry { seq, mut message } = inner
            .entries
            .remove(id)
            .ok_or_else(|| QueueError::NotFound(id.clone()))?;
        inner.order.remove(&seq);

        let now = Utc::now();
        message.status = Status::Delivered;
        message.delivered_at = Some(now);
        message.updated_at = now;
        self.notify(&message);

        Ok(())
    }

    fn mark_failed(&self, id: &MessageId, reason: &str, retry: bool) -> Result<()> {
        let mut inner = self.inner.write();
        let now = Utc::now();

        if retry {
            let entry = inner
                .entries
                .get_mut(id)
                .ok_or_else(|| QueueError::NotFound(id.clone()))?;

            let message = &mut entry.message;
            message.retry_count += 1;
            message.status = Status::Queued;
            message.last_error = Some(reason.to_string());
            message.updated_at = now;
            message.scheduled_at = Some(retry::next_attempt_at(
                now,
                message.retry_count,
                self.retry_delay,
            ));

            debug!(
                message_id = %id,
                retry_count = message.retry_count,
                scheduled_at = ?message.scheduled_at,
                "Requeued message after failed attempt"
            );
            self.notify(message);
        } else {
            let Entry { seq, mut message } = inner
                .entries
                .remove(id)
                .ok_or_else(|| QueueError::NotFound(id.clone()))?;
            inner.order.remove(&seq);

            message.status = Status::Failed;
            message.last_error = Some(reason.to_string());
            message.updated_at = now;
            self.notify(&message);
        }

        Ok(())
    }

    fn release(&self, id: &MessageId) -> Result<()> {
        let mut inner = self.inner.write();

        let message = &mut inner
            .entries
            .get_mut(id)
            .ok_or_else(|| QueueError::NotFound(id.clone()))?
            .message;
        message.status = Status::Queued;
        message.updated_at = Utc::now();

        trace!(message_id = %id, "Released message without an attempt");
        self.notify(message);

        Ok(())
    }

    fn size(&self) -> usize {
        self.inner.read().entries.len()
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, thread};

    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    use super::*;

    fn message(n: usize) -> Message {
        Message::new(
            "sender@example.com",
            vec![format!("rcpt{n}@example.org")],
            format!("Message {n}"),
        )
        .with_body("body")
    }

    fn queue(capacity: usize) -> MemoryQueue {
        MemoryQueue::new(capacity, Duration::from_secs(300))
    }

    #[test]
    fn enqueue_then_dequeue() {
        let queue = queue(10);
        let msg = message(0);
        let id = msg.id.clone();

        queue.enqueue(msg).unwrap();
        assert_eq!(queue.size(), 1);
        assert_eq!(queue.get(&id).unwrap().status, Status::Queued);

        let batch = queue.dequeue(1);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id, id);
        assert_eq!(batch[0].status, Status::Sending);
        assert_eq!(queue.size(), 1);

        assert!(queue.dequeue(1).is_empty());
    }

    #[test]
    fn dequeue_preserves_insertion_order() {
        let queue = queue(10);
        let ids: Vec<_> = (0..5)
            .map(|n| {
                let msg = message(n);
                let id = msg.id.clone();
                queue.enqueue(msg).unwrap();
                id
            })
            .collect();

        let first: Vec<_> = queue.dequeue(3).into_iter().map(|m| m.id).collect();
        let rest: Vec<_> = queue.dequeue(10).into_iter().map(|m| m.id).collect();

        assert_eq!(first, ids[..3]);
        assert_eq!(rest, ids[3..]);
    }

    #[test]
    fn enqueue_rejects_when_full() {
        let queue = queue(2);
        queue.enqueue(message(0)).unwrap();
        queue.enqueue(message(1)).unwrap();

        assert_eq!(
            queue.enqueue(message(2)),
            Err(QueueError::Full { capacity: 2 })
        );
        assert_eq!(queue.size(), 2);
    }

    #[test]
    fn delivered_messages_leave_the_queue() {
        let queue = queue(10);
        let msg = message(0);
        let id = msg.id.clone();
        queue.enqueue(msg).unwrap();
        queue.dequeue(1);

        queue.mark_delivered(&id).unwrap();

        assert_eq!(queue.size(), 0);
        assert!(queue.get(&id).is_none());
        assert!(queue.dequeue(10).is_empty());
        assert_eq!(
            queue.mark_delivered(&id),
            Err(QueueError::NotFound(id.clone()))
        );
    }

    #[test]
    fn retry_hides_message_until_scheduled() {
        let queue = MemoryQueue::new(10, Duration::from_millis(50));
        let msg = message(0);
        let id = msg.id.clone();
        queue.enqueue(msg).unwrap();
        queue.dequeue(1);

        queue.mark_failed(&id, "connection refused", true).unwrap();

        let requeued = queue.get(&id).unwrap();
        assert_eq!(requeued.status, Status::Queued);
        assert_eq!(requeued.retry_count, 1);
        assert_eq!(requeued.last_error.as_deref(), Some("connection refused"));
        assert!(requeued.scheduled_at.is_some());
        assert_eq!(queue.size(), 1);

        assert!(queue.dequeue(1).is_empty());

        thread::sleep(Duration::from_millis(80));
        let batch = queue.dequeue(1);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id, id);
        assert_eq!(batch[0].retry_count, 1);
    }

    #[test]
    fn permanent_failure_removes_message() {
        let queue = queue(10);
        let msg = message(0);
        let id = msg.id.clone();
        queue.enqueue(msg).unwrap();
        queue.dequeue(1);

        queue.mark_failed(&id, "550 no such user", false).unwrap();

        assert_eq!(queue.size(), 0);
        assert!(queue.dequeue(10).is_empty());
        assert_eq!(
            queue.mark_failed(&id, "again", true),
            Err(QueueError::NotFound(id.clone()))
        );
    }

    #[test]
    fn release_requeues_without_charging_a_retry() {
        let queue = queue(10);
        let msg = message(0);
        let id = msg.id.clone();
        queue.enqueue(msg).unwrap();
        queue.dequeue(1);

        queue.release(&id).unwrap();

        let released = queue.get(&id).unwrap();
        assert_eq!(released.status, Status::Queued);
        assert_eq!(released.retry_count, 0);
        assert!(released.scheduled_at.is_none());
        assert!(released.last_error.is_none());

        let batch = queue.dequeue(1);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id, id);

        queue.mark_delivered(&id).unwrap();
        assert_eq!(queue.release(&id), Err(QueueError::NotFound(id.clone())));
    }

    #[test]
    fn reused_id_is_dequeued_once() {
        let queue = queue(1);
        let msg = message(0);
        let id = msg.id.clone();

        queue.enqueue(msg.clone()).unwrap();
        queue.enqueue(msg).unwrap();
        assert_eq!(queue.size(), 1);

        let batch = queue.dequeue(10);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id, id);

        queue.mark_delivered(&id).unwrap();
        assert!(queue.dequeue(10).is_empty());
        assert!(queue.inner.read().order.is_empty());
    }

    #[test]
    fn scheduled_messages_wait() {
        let queue = queue(10);
        let msg = message(0).with_scheduled_at(Utc::now() + chrono::Duration::hours(1));
        queue.enqueue(msg).unwrap();
        queue.enqueue(message(1)).unwrap();

        let batch = queue.dequeue(10);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].subject, "Message 1");
    }

    #[test]
    fn concurrent_dequeue_hands_out_each_message_once() {
        const WORKERS: usize = 8;
        const BATCH: usize = 5;
        const MESSAGES: usize = 37;

        let queue = Arc::new(queue(MESSAGES));
        let expected: HashSet<_> = (0..MESSAGES)
            .map(|n| {
                let msg = message(n);
                let id = msg.id.clone();
                queue.enqueue(msg).unwrap();
                id
            })
            .collect();

        let handles: Vec<_> = (0..WORKERS)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    let mut seen = Vec::new();
                    loop {
                        let batch = queue.dequeue(BATCH);
                        if batch.is_empty() {
                            break seen;
                        }
                        seen.extend(batch.into_iter().map(|m| m.id));
                    }
                })
            })
            .collect();

        let all: Vec<_> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        let unique: HashSet<_> = all.iter().cloned().collect();

        assert_eq!(all.len(), MESSAGES);
        assert_eq!(unique, expected);
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Status>>);

    impl QueueObserver for Recorder {
        fn observe(&self, message: &Message) {
            self.0.lock().push(message.status);
        }
    }

    #[test]
    fn observer_sees_every_transition() {
        let recorder = Arc::new(Recorder::default());
        let queue = MemoryQueue::new(10, Duration::ZERO)
            .with_observer(Arc::clone(&recorder) as Arc<dyn QueueObserver>);

        let msg = message(0);
        let id = msg.id.clone();
        queue.enqueue(msg).unwrap();
        queue.dequeue(1);
        queue.mark_failed(&id, "timeout", true).unwrap();
        queue.dequeue(1);
        queue.mark_delivered(&id).unwrap();

        assert_eq!(
            *recorder.0.lock(),
            vec![
                Status::Queued,
                Status::Sending,
                Status::Queued,
                Status::Sending,
                Status::Delivered
            ]
        );
    }
}
