//! API HTTP server

use std::{net::SocketAddr, sync::Arc};

use axum::{Router, extract::DefaultBodyLimit};
use outpost_common::{Signal, internal};
use tokio::{net::TcpListener, sync::broadcast};
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;

use crate::{ApiConfig, ApiError, ApiState, routes};

/// HTTP submission and status API
///
/// Serves `/send`, `/send/batch`, `/status/{id}`, `/stats` and `/health`.
pub struct ApiServer {
    listener: TcpListener,
    router: Router,
}

impl ApiServer {
    /// Create a new API server bound to `config.listen_address`
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the specified address fails.
    pub async fn new(config: &ApiConfig, state: Arc<ApiState>) -> Result<Self, ApiError> {
        let listener = TcpListener::bind(&config.listen_address)
            .await
            .map_err(|e| ApiError::BindError {
                address: config.listen_address.clone(),
                source: e,
            })?;

        tracing::info!(
            address = %config.listen_address,
            "API server bound successfully"
        );

        let router = routes::router(state).layer(
            ServiceBuilder::new()
                .layer(TimeoutLayer::new(config.request_timeout()))
                .layer(DefaultBodyLimit::max(config.max_body_size)),
        );

        Ok(Self { listener, router })
    }

    /// # Errors
    ///
    /// Returns an error if the listener has no local address.
    pub fn local_addr(&self) -> Result<SocketAddr, ApiError> {
        self.listener
            .local_addr()
            .map_err(|e| ApiError::ServerError(e.to_string()))
    }

    /// Run the API server until a shutdown signal is received
    ///
    /// # Errors
    ///
    /// Returns an error if the server encounters a runtime error.
    pub async fn serve(self, mut shutdown: broadcast::Receiver<Signal>) -> Result<(), ApiError> {
        internal!(level = INFO, "API server starting");

        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                internal!(level = INFO, "API server received shutdown signal");
            })
            .await
            .map_err(|e| ApiError::ServerError(e.to_string()))?;

        internal!(level = INFO, "API server stopped");
        Ok(())
    }
}
