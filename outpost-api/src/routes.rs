//! Route handlers and request/response bodies.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    middleware,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use outpost_common::{Message, MessageId, Status};
use serde::{Deserialize, Serialize};

use crate::{ApiState, HttpError, auth::require_token};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SendEmailRequest {
    pub from: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub body: String,
    pub html: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl SendEmailRequest {
    fn into_message(self) -> Message {
        let mut message = Message::new(self.from, self.to, self.subject)
            .with_body(self.body)
            .with_cc(self.cc)
            .with_bcc(self.bcc);

        if let Some(html) = self.html.filter(|html| !html.is_empty()) {
            message = message.with_html(html);
        }
        for (name, value) in self.headers {
            message = message.with_header(name, value);
        }
        if let Some(at) = self.scheduled_at {
            message = message.with_scheduled_at(at);
        }

        message
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SendEmailResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<MessageId>,
    pub status: String,
    pub message: String,
}

impl SendEmailResponse {
    fn queued(id: MessageId) -> Self {
        Self {
            id: Some(id),
            status: Status::Queued.to_string(),
            message: "Email queued for delivery".to_string(),
        }
    }

    fn rejected(error: &HttpError) -> Self {
        Self {
            id: None,
            status: "error".to_string(),
            message: error.message().to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub id: MessageId,
    pub status: Status,
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<DateTime<Utc>>,
}

impl From<Message> for StatusResponse {
    fn from(message: Message) -> Self {
        Self {
            id: message.id,
            status: message.status,
            retry_count: message.retry_count,
            last_error: message.last_error,
            created_at: message.created_at,
            updated_at: message.updated_at,
            scheduled_at: message.scheduled_at,
            delivered_at: message.delivered_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatsResponse {
    pub queue_size: usize,
    pub total_sent: u64,
    pub total_delivered: u64,
    pub total_failed: u64,
    pub total_retried: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub queue_size: usize,
    pub uptime: String,
    pub uptime_secs: u64,
}

/// All routes; everything but `/health` requires the bearer token.
pub fn router(state: Arc<ApiState>) -> Router {
    let protected = Router::new()
        .route("/send", post(send))
        .route("/send/batch", post(send_batch))
        .route("/status/{id}", get(status))
        .route("/stats", get(stats))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            require_token,
        ));

    Router::new()
        .merge(protected)
        .route("/health", get(health))
        .with_state(state)
}

fn invalid_json(rejection: &JsonRejection) -> HttpError {
    HttpError::bad_request(format!("invalid JSON: {}", rejection.body_text()))
}

async fn send(
    State(state): State<Arc<ApiState>>,
    payload: Result<Json<SendEmailRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SendEmailResponse>), HttpError> {
    let Json(request) = payload.map_err(|rejection| invalid_json(&rejection))?;

    let id = state.submitter.submit(request.into_message())?;

    Ok((StatusCode::ACCEPTED, Json(SendEmailResponse::queued(id))))
}

async fn send_batch(
    State(state): State<Arc<ApiState>>,
    payload: Result<Json<Vec<SendEmailRequest>>, JsonRejection>,
) -> Result<(StatusCode, Json<Vec<SendEmailResponse>>), HttpError> {
    let Json(requests) = payload.map_err(|rejection| invalid_json(&rejection))?;

    if requests.len() > state.max_batch {
        return Err(HttpError::bad_request(format!(
            "batch size exceeds limit ({})",
            state.max_batch
        )));
    }

    let responses = requests
        .into_iter()
        .map(|request| {
            state
                .submitter
                .submit(request.into_message())
                .map_or_else(
                    |err| SendEmailResponse::rejected(&HttpError::from(err)),
                    SendEmailResponse::queued,
                )
        })
        .collect();

    Ok((StatusCode::ACCEPTED, Json(responses)))
}

async fn status(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<Json<StatusResponse>, HttpError> {
    state
        .tracker
        .get(&MessageId::from(id))
        .map(|message| Json(message.into()))
        .ok_or_else(|| HttpError::not_found("email not found"))
}

async fn stats(State(state): State<Arc<ApiState>>) -> Json<StatsResponse> {
    let snapshot = state.submitter.stats().snapshot();

    Json(StatsResponse {
        queue_size: state.submitter.queue().size(),
        total_sent: snapshot.sent,
        total_delivered: snapshot.delivered,
        total_failed: snapshot.failed,
        total_retried: snapshot.retried,
    })
}

async fn health(State(state): State<Arc<ApiState>>) -> Json<HealthResponse> {
    let uptime = state.uptime();

    Json(HealthResponse {
        status: "healthy".to_string(),
        queue_size: state.submitter.queue().size(),
        uptime: format_uptime(uptime),
        uptime_secs: uptime.as_secs(),
    })
}

fn format_uptime(uptime: Duration) -> String {
    let secs = uptime.as_secs();
    let (hours, minutes, seconds) = (secs / 3600, secs / 60 % 60, secs % 60);

    if hours > 0 {
        format!("{hours}h{minutes}m{seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m{seconds}s")
    } else {
        format!("{seconds}s")
    }
}
