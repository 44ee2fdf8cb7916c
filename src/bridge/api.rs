use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    broker::{Broker, envelope::QueueMessage},
    bridge::store::SubmissionStore,
    metrics::MetricsRegistry,
    models::{Submission, SubmissionStatus},
};

#[derive(Clone)]
struct AppState {
    store: SubmissionStore,
    broker: Broker,
    metrics: Arc<MetricsRegistry>,
}

pub fn routes(store: SubmissionStore, broker: Broker, metrics: Arc<MetricsRegistry>) -> Router {
    let state = AppState {
        store,
        broker,
        metrics,
    };
    Router::new()
        .route("/healthz", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/submissions", post(submit))
        .route("/submissions/{id}", get(get_submission))
        .route("/custom_runs", post(submit_custom_run))
        .route("/custom_result/{id}", get(take_custom_result))
        .with_state(state)
}

#[derive(Debug, Error)]
enum BridgeError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("not found")]
    NotFound,
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        let status = match self {
            BridgeError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            BridgeError::NotFound => StatusCode::NOT_FOUND,
            BridgeError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(ErrorBody {
            error: self.to_string(),
        });
        (status, body).into_response()
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true }))
}

async fn metrics_endpoint(State(state): State<AppState>) -> (StatusCode, String) {
    (StatusCode::OK, state.metrics.render_prometheus())
}

#[derive(Debug, Deserialize)]
struct SubmitRequest {
    user_id: i64,
    problem_id: i64,
    source_code: String,
    language: String,
}

#[derive(Debug, Serialize)]
struct SubmitResponse {
    id: i64,
    status: SubmissionStatus,
}

async fn submit(
    State(state): State<AppState>,
    Json(request): Json<SubmitRequest>,
) -> Result<(StatusCode, Json<SubmitResponse>), BridgeError> {
    validate(&request)?;

    let submission = state.store.create(
        request.user_id,
        request.problem_id,
        request.source_code,
        request.language,
    );
    state
        .broker
        .publish_submission(&QueueMessage::Submission { id: submission.id })
        .await
        .map_err(|err| BridgeError::Internal(err.to_string()))?;
    state.metrics.submitted();
    tracing::info!(submission_id = submission.id, "submission enqueued");

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            id: submission.id,
            status: submission.status,
        }),
    ))
}

#[derive(Debug, Deserialize)]
struct CustomRunRequest {
    source_code: String,
    language: String,
    #[serde(default)]
    stdin: String,
}

#[derive(Debug, Serialize)]
struct CustomRunResponse {
    id: String,
}

/// Custom-input run: nothing is persisted up front, the payload rides on
/// the queue message itself and the result is fetched one-shot later.
async fn submit_custom_run(
    State(state): State<AppState>,
    Json(request): Json<CustomRunRequest>,
) -> Result<(StatusCode, Json<CustomRunResponse>), BridgeError> {
    if request.source_code.trim().is_empty() {
        return Err(BridgeError::InvalidRequest(
            "source_code is empty".to_string(),
        ));
    }
    let id = uuid::Uuid::new_v4().to_string();
    state
        .broker
        .publish_submission(&QueueMessage::Input {
            id: id.clone(),
            code: request.source_code,
            language: request.language,
            stdin: request.stdin,
        })
        .await
        .map_err(|err| BridgeError::Internal(err.to_string()))?;
    tracing::info!(run_id = %id, "custom-input run enqueued");
    Ok((StatusCode::ACCEPTED, Json(CustomRunResponse { id })))
}

async fn get_submission(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Submission>, BridgeError> {
    state.store.get(id).map(Json).ok_or(BridgeError::NotFound)
}

/// Custom-input results are consumed on read.
async fn take_custom_result(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<crate::broker::envelope::CustomResultBody>, BridgeError> {
    state
        .store
        .take_custom_result(&id)
        .map(Json)
        .ok_or(BridgeError::NotFound)
}

fn validate(request: &SubmitRequest) -> Result<(), BridgeError> {
    if request.source_code.trim().is_empty() {
        return Err(BridgeError::InvalidRequest(
            "source_code is empty".to_string(),
        ));
    }
    if request.source_code.len() > 250_000 {
        return Err(BridgeError::InvalidRequest(
            "source_code too large".to_string(),
        ));
    }
    if request.language.trim().is_empty() {
        return Err(BridgeError::InvalidRequest("language is empty".to_string()));
    }
    Ok(())
}
