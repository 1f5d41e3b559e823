use std::sync::Arc;

use outpost_common::{DeliveryStats, Limits, Message, MessageId, ValidationError};
use thiserror::Error;
use tracing::info;

use crate::{Queue, QueueError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubmitError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Entry point shared by every ingestion surface: validates a message,
/// places it on the queue and counts it as sent.
#[derive(Debug, Clone)]
pub struct Submitter {
    queue: Arc<dyn Queue>,
    stats: Arc<DeliveryStats>,
    limits: Limits,
}

impl Submitter {
    #[must_use]
    pub fn new(queue: Arc<dyn Queue>, stats: Arc<DeliveryStats>, limits: Limits) -> Self {
        Self {
            queue,
            stats,
            limits,
        }
    }

    #[must_use]
    pub const fn limits(&self) -> &Limits {
        &self.limits
    }

    #[must_use]
    pub fn queue(&self) -> &Arc<dyn Queue> {
        &self.queue
    }

    #[must_use]
    pub fn stats(&self) -> &Arc<DeliveryStats> {
        &self.stats
    }

    /// # Errors
    ///
    /// [`SubmitError::Invalid`] if the message breaks a limit or has bad
    /// addresses, [`SubmitError::Queue`] if the queue refuses it.
    pub fn submit(&self, message: Message) -> Result<MessageId, SubmitError> {
        message.validate(&self.limits)?;

        let id = message.id.clone();
        let recipients = message.recipient_count();
        self.queue.enqueue(message)?;
        self.stats.record_sent();

        info!(message_id = %id, recipients, "Accepted message for delivery");
        Ok(id)
    }
}
