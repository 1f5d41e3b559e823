//! HTTP API for the outpost relay
//!
//! # Endpoints
//!
//! - **`POST /send`** - Validate and queue one message
//! - **`POST /send/batch`** - Queue up to `max_batch` messages, reporting each
//! - **`GET /status/{id}`** - Latest known state of a message
//! - **`GET /stats`** - Queue size and delivery counters
//! - **`GET /health`** - Liveness and uptime, no authentication
//!
//! Every endpoint except `/health` requires `Authorization: Bearer <token>`.
//! Errors are returned as `{"error": "..."}`.

mod auth;
mod config;
mod error;
mod routes;
mod server;
mod state;

pub use config::ApiConfig;
pub use error::{ApiError, HttpError};
pub use routes::{
    HealthResponse, SendEmailRequest, SendEmailResponse, StatsResponse, StatusResponse, router,
};
pub use server::ApiServer;
pub use state::ApiState;
