use std::{fmt, sync::Arc, sync::LazyLock};

use outpost_api::{ApiServer, ApiState};
use outpost_common::{DeliveryStats, Signal, internal, logging, tracing};
use outpost_delivery::{
    DeliveryService, HickoryResolver, MxCache, MxResolver, SmtpTransport, Transport,
};
use outpost_queue::{Queue, QueueObserver, StatusTracker, Submitter};
use outpost_smtp::SubmissionServer;
use tokio::sync::broadcast;

use crate::config::{Config, StatusConfig};

pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(64);
    sender
});

#[tracing::instrument(level = "trace")]
async fn shutdown() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!("CTRL+C entered -- Enter it again to force shutdown");
        }
        _ = terminate.recv() => {
            internal!("Terminate Signal received, shutting down");
        }
    };

    let mut receiver = SHUTDOWN_BROADCAST.subscribe();

    SHUTDOWN_BROADCAST
        .send(Signal::Shutdown)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Interrupted, e.to_string()))?;

    loop {
        tokio::select! {
            sig = receiver.recv() => {
                match sig {
                    Ok(Signal::Finalised) | Err(broadcast::error::RecvError::Closed) => break,
                    Ok(s) => tracing::debug!("Received {s:?}"),
                    Err(e) => tracing::debug!("Received: {e:?}"),
                }
            }

            _ = tokio::signal::ctrl_c() => {
                break;
            }
        }
    }

    Ok(())
}

/// Runs `task`; if it fails, every other component is told to shut down.
async fn supervise<E>(
    component: &'static str,
    signals: &broadcast::Sender<Signal>,
    task: impl Future<Output = Result<(), E>>,
) -> anyhow::Result<()>
where
    E: Into<anyhow::Error>,
{
    let result = task.await.map_err(Into::into);

    if let Err(err) = &result {
        tracing::error!(component, error = %err, "Component failed, shutting down");
        let _ = signals.send(Signal::Shutdown);
    }

    result
}

/// Periodically drops expired status records and cached mail exchangers.
async fn maintain(
    tracker: Arc<StatusTracker>,
    cache: Arc<MxCache>,
    status: StatusConfig,
    mut shutdown: broadcast::Receiver<Signal>,
) {
    let mut ticker =
        tokio::time::interval(status.prune_interval().max(std::time::Duration::from_secs(1)));
    ticker.tick().await;

    loop {
        tokio::select! {
            sig = shutdown.recv() => {
                if matches!(sig, Ok(Signal::Shutdown) | Err(broadcast::error::RecvError::Closed)) {
                    break;
                }
            }

            _ = ticker.tick() => {
                let pruned = tracker.prune(status.retention());
                let purged = cache.purge_expired();
                tracing::debug!(
                    pruned,
                    purged,
                    tracked = tracker.len(),
                    "Maintenance pass finished"
                );
            }
        }
    }
}

/// The relay: submission surfaces, queue and delivery workers.
pub struct Outpost {
    config: Config,
    resolver: Option<Arc<dyn MxResolver>>,
    transport: Option<Arc<dyn Transport>>,
}

impl fmt::Debug for Outpost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Outpost")
            .field("hostname", &self.config.hostname)
            .finish_non_exhaustive()
    }
}

impl Outpost {
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self {
            config,
            resolver: None,
            transport: None,
        }
    }

    /// Replaces the system DNS resolver.
    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<dyn MxResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Replaces SMTP delivery to remote mail exchangers.
    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Run this controller, and everything it controls, until SIGINT or
    /// SIGTERM.
    ///
    /// # Errors
    ///
    /// This function will return an error if the configuration is invalid or
    /// any component fails to start.
    #[tracing::instrument(level = "trace", skip_all, err)]
    pub async fn run(self) -> anyhow::Result<()> {
        logging::init(&self.config.logging);
        self.config.validate()?;

        internal!("Controller running");

        let ret = tokio::select! {
            biased;
            r = self.serve(SHUTDOWN_BROADCAST.clone()) => {
                r
            }
            r = shutdown() => {
                r
            }
        };

        internal!("Shutting down...");

        ret
    }

    /// Builds every component and serves until `signals` carries
    /// [`Signal::Shutdown`]. The delivery workers have drained and
    /// [`Signal::Finalised`] has been sent by the time this returns.
    ///
    /// # Errors
    ///
    /// If a component cannot be built, or any component fails while running.
    pub async fn serve(self, signals: broadcast::Sender<Signal>) -> anyhow::Result<()> {
        let Self {
            config,
            resolver,
            transport,
        } = self;

        let tracker = Arc::new(StatusTracker::new());
        let queue: Arc<dyn Queue> = Arc::new(
            config
                .queue
                .clone()
                .into_queue(Some(Arc::clone(&tracker) as Arc<dyn QueueObserver>)),
        );
        let stats = Arc::new(DeliveryStats::new());
        let submitter = Submitter::new(Arc::clone(&queue), Arc::clone(&stats), config.limits);

        let resolver: Arc<dyn MxResolver> = match resolver {
            Some(resolver) => resolver,
            None => Arc::new(HickoryResolver::new(&config.delivery.dns)?),
        };
        let transport: Arc<dyn Transport> = match transport {
            Some(transport) => transport,
            None => Arc::new(
                SmtpTransport::new(config.helo_name())
                    .with_port(config.delivery.smtp_port)
                    .accept_invalid_certs(config.delivery.accept_invalid_certs),
            ),
        };
        let delivery = Arc::new(DeliveryService::new(
            &config.delivery,
            Arc::clone(&queue),
            resolver,
            transport,
            Arc::clone(&stats),
        ));

        let api = if config.api.enabled {
            let state = Arc::new(ApiState::new(
                &config.api,
                submitter.clone(),
                Arc::clone(&tracker),
            ));
            Some(ApiServer::new(&config.api, state).await?)
        } else {
            internal!(level = INFO, "HTTP API disabled");
            None
        };
        let smtp = SubmissionServer::new(&config.smtp, config.hostname.clone(), submitter);

        let delivery_signal = signals.subscribe();
        let api_signal = signals.subscribe();
        let smtp_signal = signals.subscribe();
        let maintenance_signal = signals.subscribe();

        let (delivery_result, api_result, smtp_result, ()) = tokio::join!(
            supervise("delivery", &signals, delivery.start(delivery_signal)),
            supervise("api", &signals, async move {
                match api {
                    Some(api) => api.serve(api_signal).await,
                    None => Ok(()),
                }
            }),
            supervise("smtp", &signals, smtp.serve(smtp_signal)),
            maintain(
                Arc::clone(&tracker),
                Arc::clone(delivery.cache()),
                config.status.clone(),
                maintenance_signal,
            ),
        );

        let snapshot = stats.snapshot();
        internal!(
            level = INFO,
            "All components stopped (sent={}, delivered={}, failed={}, retried={}, queued={})",
            snapshot.sent,
            snapshot.delivered,
            snapshot.failed,
            snapshot.retried,
            queue.size()
        );
        let _ = signals.send(Signal::Finalised);

        delivery_result?;
        api_result?;
        smtp_result
    }
}
