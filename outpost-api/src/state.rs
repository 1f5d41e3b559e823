use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use outpost_queue::{StatusTracker, Submitter};

use crate::ApiConfig;

/// Everything the route handlers share.
#[derive(Debug)]
pub struct ApiState {
    pub(crate) submitter: Submitter,
    pub(crate) tracker: Arc<StatusTracker>,
    auth_token: String,
    pub(crate) max_batch: usize,
    started: Instant,
}

impl ApiState {
    #[must_use]
    pub fn new(config: &ApiConfig, submitter: Submitter, tracker: Arc<StatusTracker>) -> Self {
        Self {
            submitter,
            tracker,
            auth_token: config.auth_token.clone(),
            max_batch: config.max_batch,
            started: Instant::now(),
        }
    }

    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Compares without short-circuiting on the first differing byte.
    pub(crate) fn token_matches(&self, candidate: &str) -> bool {
        let expected = self.auth_token.as_bytes();
        let candidate = candidate.as_bytes();

        !expected.is_empty()
            && expected.len() == candidate.len()
            && expected
                .iter()
                .zip(candidate)
                .fold(0u8, |acc, (a, b)| acc | (a ^ b))
                == 0
    }
}
