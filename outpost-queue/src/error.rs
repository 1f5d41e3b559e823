use outpost_common::MessageId;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// The active set is at capacity.
    #[error("Queue is full (capacity {capacity})")]
    Full { capacity: usize },

    /// The message is not in the active set.
    #[error("Message not found: {0}")]
    NotFound(MessageId),
}

pub type Result<T> = std::result::Result<T, QueueError>;
