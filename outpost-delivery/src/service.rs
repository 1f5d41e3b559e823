//! The delivery worker pool.

use std::{fmt, sync::Arc, time::Duration};

use outpost_common::{DeliveryStats, Message, Signal, address::extract_domain, internal, tracing};
use outpost_queue::Queue;
use parking_lot::RwLock;
use tokio::{
    sync::{
        broadcast::{self, error::RecvError},
        watch,
    },
    task::JoinSet,
    time::{MissedTickBehavior, interval, timeout},
};

use crate::{
    AttemptError, DeliveryConfig, MxCache, MxResolver, ServiceError, Transport, TransportError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Idle,
    Running,
    /// Shutdown was requested; workers are finishing their current batch.
    Draining,
    Stopped,
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        })
    }
}

/// A fixed pool of workers moving messages from a [`Queue`] to their mail
/// exchangers.
pub struct DeliveryService {
    queue: Arc<dyn Queue>,
    cache: Arc<MxCache>,
    transport: Arc<dyn Transport>,
    stats: Arc<DeliveryStats>,
    workers: usize,
    batch_size: usize,
    poll_interval: Duration,
    connection_timeout: Duration,
    max_retries: u32,
    state: RwLock<ServiceState>,
    cancel: watch::Sender<bool>,
}

impl fmt::Debug for DeliveryService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryService")
            .field("state", &self.state())
            .field("workers", &self.workers)
            .field("batch_size", &self.batch_size)
            .field("poll_interval", &self.poll_interval)
            .field("connection_timeout", &self.connection_timeout)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

/// Resolves once the cancellation flag has been raised.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    let _ = cancel.wait_for(|cancelled| *cancelled).await;
}

impl DeliveryService {
    #[must_use]
    pub fn new(
        config: &DeliveryConfig,
        queue: Arc<dyn Queue>,
        resolver: Arc<dyn MxResolver>,
        transport: Arc<dyn Transport>,
        stats: Arc<DeliveryStats>,
    ) -> Self {
        let (cancel, _) = watch::channel(false);

        Self {
            queue,
            cache: Arc::new(MxCache::new(resolver, config.dns_cache_ttl())),
            transport,
            stats,
            workers: config.workers.max(1),
            batch_size: config.batch_size.max(1),
            poll_interval: config.poll_interval().max(Duration::from_millis(1)),
            connection_timeout: config.connection_timeout(),
            max_retries: config.max_retries,
            state: RwLock::new(ServiceState::Idle),
            cancel,
        }
    }

    #[must_use]
    pub fn state(&self) -> ServiceState {
        *self.state.read()
    }

    #[must_use]
    pub const fn cache(&self) -> &Arc<MxCache> {
        &self.cache
    }

    #[must_use]
    pub const fn stats(&self) -> &Arc<DeliveryStats> {
        &self.stats
    }

    /// Runs the worker pool until `shutdown` delivers [`Signal::Shutdown`]
    /// or is closed, then waits for every worker to exit.
    ///
    /// Attempts still in flight when shutdown begins are abandoned and their
    /// messages requeued.
    ///
    /// # Errors
    ///
    /// [`ServiceError::NotIdle`] if the service was already started.
    #[tracing::instrument(level = "trace", skip_all)]
    pub async fn start(
        self: &Arc<Self>,
        mut shutdown: broadcast::Receiver<Signal>,
    ) -> Result<(), ServiceError> {
        {
            let mut state = self.state.write();
            if *state != ServiceState::Idle {
                return Err(ServiceError::NotIdle(*state));
            }
            *state = ServiceState::Running;
        }

        internal!(
            level = INFO,
            "Delivery service starting {} workers (batch={}, poll={:?}, timeout={:?}, max_retries={})",
            self.workers,
            self.batch_size,
            self.poll_interval,
            self.connection_timeout,
            self.max_retries
        );

        let mut workers = JoinSet::new();
        for worker in 0..self.workers {
            let service = Arc::clone(self);
            workers.spawn(async move { service.work(worker).await });
        }

        loop {
            match shutdown.recv().await {
                Ok(Signal::Shutdown) | Err(RecvError::Closed) => break,
                Ok(Signal::Finalised) | Err(RecvError::Lagged(_)) => {}
            }
        }

        internal!(level = INFO, "Delivery service draining ...");
        *self.state.write() = ServiceState::Draining;
        self.cancel.send_replace(true);

        while let Some(result) = workers.join_next().await {
            if let Err(err) = result {
                tracing::error!(error = %err, "Delivery worker terminated abnormally");
            }
        }

        *self.state.write() = ServiceState::Stopped;
        internal!(level = INFO, "Delivery service stopped");

        Ok(())
    }

    async fn work(&self, worker: usize) {
        internal!("Delivery worker {} started", worker);

        let mut cancel = self.cancel.subscribe();
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = cancelled(&mut cancel) => break,
                _ = ticker.tick() => {
                    let handled = self.process_batch().await;
                    if handled > 0 {
                        tracing::debug!(worker, handled, "Processed delivery batch");
                    }
                }
            }
        }

        internal!("Delivery worker {} stopped", worker);
    }

    fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// One poll cycle: dequeue up to the batch size, attempt each message
    /// and record the outcome. Returns the number of messages handled.
    ///
    /// Once shutdown begins, messages of the batch that have not been
    /// attempted yet are released back to the queue untouched.
    pub async fn process_batch(&self) -> usize {
        let batch = self.queue.dequeue(self.batch_size);
        let handled = batch.len();

        for message in batch {
            if self.is_cancelled() {
                self.release(&message);
                continue;
            }

            let outcome = self.attempt(&message).await;
            self.settle(&message, outcome);
        }

        handled
    }

    fn release(&self, message: &Message) {
        match self.queue.release(&message.id) {
            Ok(()) => {
                tracing::debug!(message_id = %message.id, "Released unattempted message");
            }
            Err(err) => tracing::warn!(
                message_id = %message.id,
                error = %err,
                "Unable to release message"
            ),
        }
    }

    /// A single delivery attempt: every recipient of `message` is handed to
    /// the first mail exchanger of the first `To` recipient's domain that
    /// accepts it.
    ///
    /// # Errors
    ///
    /// See [`AttemptError`].
    pub async fn attempt(&self, message: &Message) -> Result<(), AttemptError> {
        if self.is_cancelled() {
            return Err(AttemptError::Cancelled);
        }
        let mut cancel = self.cancel.subscribe();

        let recipient = message.to.first().ok_or(AttemptError::NoRecipients)?;
        let domain = extract_domain(recipient)
            .ok_or_else(|| AttemptError::InvalidDomain(recipient.clone()))?;

        let hosts = tokio::select! {
            biased;
            () = cancelled(&mut cancel) => return Err(AttemptError::Cancelled),
            hosts = self.cache.resolve(domain) => hosts?,
        };

        let mut last_error = None;
        for mx in hosts.iter() {
            let result = tokio::select! {
                biased;
                () = cancelled(&mut cancel) => return Err(AttemptError::Cancelled),
                result = timeout(
                    self.connection_timeout,
                    self.transport.deliver(&mx.host, message, self.connection_timeout),
                ) => result.unwrap_or(Err(TransportError::Timeout(self.connection_timeout))),
            };

            match result {
                Ok(()) => {
                    tracing::info!(
                        message_id = %message.id,
                        host = %mx.host,
                        recipients = message.recipient_count(),
                        "Message delivered"
                    );
                    return Ok(());
                }
                Err(err) => {
                    tracing::warn!(
                        message_id = %message.id,
                        host = %mx.host,
                        error = %err,
                        permanent = err.is_permanent(),
                        "Delivery to mail exchanger failed"
                    );
                    last_error = Some(err);
                }
            }
        }

        Err(last_error.map_or_else(
            || AttemptError::NoTargets(domain.to_string()),
            AttemptError::AllTargetsFailed,
        ))
    }

    fn settle(&self, message: &Message, outcome: Result<(), AttemptError>) {
        match outcome {
            Ok(()) => match self.queue.mark_delivered(&message.id) {
                Ok(()) => self.stats.record_delivered(),
                Err(err) => tracing::warn!(
                    message_id = %message.id,
                    error = %err,
                    "Unable to mark message delivered"
                ),
            },
            Err(failure) => {
                let retry = message.retry_count < self.max_retries;
                let interrupted = failure.is_cancellation();
                let reason = failure.to_string();

                if let Err(err) = self.queue.mark_failed(&message.id, &reason, retry) {
                    tracing::warn!(
                        message_id = %message.id,
                        error = %err,
                        "Unable to mark message failed"
                    );
                    return;
                }

                if retry {
                    self.stats.record_retry();
                    tracing::info!(
                        message_id = %message.id,
                        attempt = message.retry_count + 1,
                        interrupted,
                        reason = %reason,
                        "Delivery failed, will retry"
                    );
                } else {
                    self.stats.record_failed();
                    tracing::error!(
                        message_id = %message.id,
                        attempts = message.retry_count + 1,
                        interrupted,
                        reason = %reason,
                        "Delivery failed permanently"
                    );
                }
            }
        }
    }
}
