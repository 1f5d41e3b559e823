//! Plain-text ESMTP submission listener.
//!
//! Accepted messages are validated and placed on the delivery queue through a
//! [`Submitter`]. There is no authentication and no server-side TLS; the
//! listener is meant to sit on a trusted network.

mod command;
mod ingest;
mod session;

use std::{net::SocketAddr, sync::Arc, time::Duration};

use futures_util::future::join_all;
use outpost_common::{Signal, internal, tracing};
use outpost_queue::Submitter;
use serde::Deserialize;
use tokio::{net::TcpListener, sync::broadcast};

pub use ingest::build_message;
use session::{Session, SessionContext};

/// Submission listener configuration.
///
/// ```ron
/// smtp: (
///     listen_address: "0.0.0.0:587",
///     read_timeout_secs: 10,
/// )
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct SubmissionConfig {
    #[serde(default = "default_listen_address")]
    pub listen_address: SocketAddr,

    /// Idle time allowed between client lines before the session is closed
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
}

fn default_listen_address() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 587))
}

const fn default_read_timeout_secs() -> u64 {
    10
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            read_timeout_secs: default_read_timeout_secs(),
        }
    }
}

#[derive(Debug)]
pub struct SubmissionServer {
    listen_address: SocketAddr,
    context: Arc<SessionContext>,
}

impl SubmissionServer {
    #[must_use]
    pub fn new(
        config: &SubmissionConfig,
        hostname: impl Into<String>,
        submitter: Submitter,
    ) -> Self {
        Self {
            listen_address: config.listen_address,
            context: Arc::new(SessionContext {
                hostname: hostname.into(),
                submitter,
                read_timeout: Duration::from_secs(config.read_timeout_secs),
            }),
        }
    }

    /// Binds the configured address and serves until shutdown.
    ///
    /// # Errors
    ///
    /// Fails if the address cannot be bound or accepting connections fails.
    pub async fn serve(&self, shutdown: broadcast::Receiver<Signal>) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.listen_address).await?;
        self.serve_on(listener, shutdown).await
    }

    /// Serves sessions from an already bound listener until a
    /// [`Signal::Shutdown`] arrives, then waits for open sessions to end.
    ///
    /// # Errors
    ///
    /// Fails if accepting a connection fails.
    #[tracing::instrument(level = "trace", skip_all, err)]
    pub async fn serve_on(
        &self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<Signal>,
    ) -> anyhow::Result<()> {
        let address = listener.local_addr()?;
        internal!(level = INFO, "SMTP submission listening on {}", address);
        let mut sessions = Vec::new();

        loop {
            tokio::select! {
                sig = shutdown.recv() => {
                    if matches!(
                        sig,
                        Ok(Signal::Shutdown) | Err(broadcast::error::RecvError::Closed)
                    ) {
                        internal!(
                            level = INFO,
                            "SMTP listener {} received shutdown signal, finishing sessions ...",
                            address
                        );
                        join_all(sessions).await;
                        break;
                    }
                }

                connection = listener.accept() => {
                    let (stream, peer) = connection?;
                    tracing::debug!(%peer, "Connection received on {address}");

                    sessions.retain(|session: &tokio::task::JoinHandle<()>| !session.is_finished());
                    let session = Session::new(stream, peer, Arc::clone(&self.context));
                    sessions.push(tokio::spawn(async move {
                        if let Err(err) = session.run().await {
                            internal!(
                                level = WARN,
                                "Session with {} ended with error: {}",
                                peer,
                                err
                            );
                        }
                    }));
                }
            }
        }

        Ok(())
    }
}
