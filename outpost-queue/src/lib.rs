//! Outbound message queue.
//!
//! The queue holds the *active set*: every message that is either waiting
//! for an attempt (`queued`) or currently held by a delivery worker
//! (`sending`). Terminal messages leave the queue and are only visible
//! through a [`QueueObserver`] such as the [`StatusTracker`].

mod config;
mod error;
mod memory;
pub mod retry;
mod submit;
mod tracker;

use std::fmt::Debug;

use outpost_common::{Message, MessageId};

pub use config::QueueConfig;
pub use error::{QueueError, Result};
pub use memory::MemoryQueue;
pub use submit::{SubmitError, Submitter};
pub use tracker::{QueueObserver, StatusTracker};

/// Storage and state machine for messages awaiting delivery.
///
/// Implementations must be safe to share between any number of submitters
/// and delivery workers. A message returned by [`Queue::dequeue`] is never
/// handed to another caller until it is failed with retry.
pub trait Queue: Send + Sync + Debug {
    /// Adds `message` to the active set with status `queued`.
    ///
    /// # Errors
    ///
    /// [`QueueError::Full`] when the active set is at capacity.
    fn enqueue(&self, message: Message) -> Result<()>;

    /// Moves up to `max` due `queued` messages, in insertion order, to
    /// `sending` and returns snapshots of them.
    fn dequeue(&self, max: usize) -> Vec<Message>;

    /// Records a successful delivery and removes the message.
    ///
    /// # Errors
    ///
    /// [`QueueError::NotFound`] if the message is not active.
    fn mark_delivered(&self, id: &MessageId) -> Result<()>;

    /// Records a failed attempt. With `retry` the message is requeued behind
    /// a backoff delay, otherwise it fails permanently and is removed.
    ///
    /// # Errors
    ///
    /// [`QueueError::NotFound`] if the message is not active.
    fn mark_failed(&self, id: &MessageId, reason: &str, retry: bool) -> Result<()>;

    /// Returns a message taken by `dequeue` to `queued` as if it had never
    /// been handed out: retry count, schedule and last error are untouched.
    ///
    /// # Errors
    ///
    /// [`QueueError::NotFound`] if the message is not active.
    fn release(&self, id: &MessageId) -> Result<()>;

    /// Number of active messages.
    fn size(&self) -> usize;
}
