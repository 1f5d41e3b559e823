use std::{sync::Arc, time::Duration};

use serde::Deserialize;

use crate::{MemoryQueue, QueueObserver};

/// Queue configuration.
///
/// ```ron
/// queue: (
///     capacity: 10000,
///     retry_delay_secs: 300,
/// )
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Maximum number of active messages (default: 10000)
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Base delay between attempts; the n-th retry waits n times this long
    /// (default: 300 = 5 minutes)
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
}

const fn default_capacity() -> usize {
    10_000
}

const fn default_retry_delay_secs() -> u64 {
    300
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            retry_delay_secs: default_retry_delay_secs(),
        }
    }
}

impl QueueConfig {
    #[must_use]
    pub const fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    /// Builds an in-memory queue reporting every transition to `observer`.
    #[must_use]
    pub fn into_queue(self, observer: Option<Arc<dyn QueueObserver>>) -> MemoryQueue {
        let queue = MemoryQueue::new(self.capacity, self.retry_delay());

        match observer {
            Some(observer) => queue.with_observer(observer),
            None => queue,
        }
    }
}
