//! REST API of the Kafka browser
//!
//! ## Endpoints
//!
//! - `POST /consumers` - Start an ephemeral consumer session
//! - `GET /consumers/:id` - Status of the latest session under an id
//! - `POST /records` - Publish a batch of messages
//! - `GET /d/:file` - Download an artifact
//! - `GET /health` - Liveness and counters

use crate::broker::{BrokerClient, BrokerError, RecordMetadata, TopicMessages};
use crate::env;
use crate::session::{
    ArtifactReference, ConsumerSessionManager, SessionError, SessionStatus, StartSessionRequest,
};
use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Shared state for the API
#[derive(Clone)]
pub struct ApiState {
    pub manager: Arc<ConsumerSessionManager>,
    /// Used for publishing
    pub broker: Arc<dyn BrokerClient>,
    /// Root the artifacts are served from
    pub data_path: PathBuf,
}

/// Error payload
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Errors surfaced by the handlers
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Broker(#[from] BrokerError),
    #[error("{0} not found")]
    NotFound(String),
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Invalid request body: {0}")]
    Body(#[from] JsonRejection),
    #[error("Failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Session(
                SessionError::NoTopics
                | SessionError::InvalidTimeout(_)
                | SessionError::InvalidName { .. },
            ) => (StatusCode::BAD_REQUEST, "invalid_request"),
            ApiError::Session(SessionError::Connection { .. }) => {
                (StatusCode::BAD_GATEWAY, "broker_unavailable")
            }
            ApiError::Session(SessionError::Subscription { .. }) => {
                (StatusCode::BAD_GATEWAY, "subscription_failed")
            }
            ApiError::Broker(_) => (StatusCode::BAD_GATEWAY, "broker_error"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ApiError::BadRequest(_) | ApiError::Body(_) => {
                (StatusCode::BAD_REQUEST, "invalid_request")
            }
            ApiError::Io { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "io_error"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            warn!(status = %status, error = %self, "Request failed");
        }
        let body = ErrorResponse {
            error: code.to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Body of `POST /records`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishRequest {
    pub topic_messages: Vec<TopicMessages>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub broker: String,
    pub sessions: usize,
    pub pending_timers: usize,
}

/// Create the API router
pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/consumers", post(start_consumer))
        .route("/consumers/:id", get(get_consumer))
        .route("/records", post(publish_records))
        .route(
            &format!("/{}/:file", env::DOWNLOAD_PREFIX),
            get(download_artifact),
        )
        .route("/health", get(health))
        .with_state(state)
}

async fn start_consumer(
    State(state): State<ApiState>,
    request: Result<Json<StartSessionRequest>, JsonRejection>,
) -> Result<Json<Vec<ArtifactReference>>, ApiError> {
    let Json(request) = request?;
    let references = state.manager.start_session(request).await?;
    Ok(Json(references))
}

async fn get_consumer(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<SessionStatus>, ApiError> {
    state
        .manager
        .session_status(&id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Session '{id}'")))
}

async fn publish_records(
    State(state): State<ApiState>,
    request: Result<Json<PublishRequest>, JsonRejection>,
) -> Result<Json<Vec<RecordMetadata>>, ApiError> {
    let Json(request) = request?;
    if request.topic_messages.is_empty() {
        return Err(ApiError::BadRequest("topicMessages must not be empty".to_string()));
    }

    let message_count: usize = request
        .topic_messages
        .iter()
        .map(|batch| batch.messages.len())
        .sum();

    let producer = state.broker.connect_producer().await?;
    let sent = producer.send_batch(request.topic_messages).await;
    if let Err(e) = producer.disconnect().await {
        warn!(error = %e, "Failed to disconnect producer");
    }
    let metadata = sent?;

    info!(messages = message_count, "Published records");
    Ok(Json(metadata))
}

async fn download_artifact(
    State(state): State<ApiState>,
    Path(file): Path<String>,
) -> Result<Response, ApiError> {
    if !env::is_safe_name(&file) {
        return Err(ApiError::BadRequest(format!("invalid artifact name '{file}'")));
    }

    let path = state.data_path.join(&file);
    match tokio::fs::read(&path).await {
        Ok(bytes) => Ok((
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            bytes,
        )
            .into_response()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(ApiError::NotFound(format!("Artifact '{file}'")))
        }
        Err(source) => Err(ApiError::Io { path, source }),
    }
}

async fn health(State(state): State<ApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        broker: state.broker.broker_name().to_string(),
        sessions: state.manager.sessions().len(),
        pending_timers: state.manager.registry().pending_count(),
    })
}
