//! HTTP request handlers for the worker API.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;

use super::AppState;
use crate::models::WorkItemUpdate;
use crate::orchestrator::OrchestratorError;
use crate::repository::RepositoryError;

#[derive(Debug, Deserialize)]
pub struct WorkQuery {
    #[serde(rename = "serviceID")]
    pub service_id: String,
}

/// `GET /work?serviceID=...` — claim one READY item for a service.
/// 404 means no work is available; workers poll.
pub async fn get_work(
    State(state): State<AppState>,
    Query(query): Query<WorkQuery>,
) -> Response {
    match state.scheduler.get_work(&query.service_id, 1).await {
        Ok(mut work) => match work.pop() {
            Some(dispatched) => (StatusCode::OK, Json(dispatched)).into_response(),
            None => error_response(StatusCode::NOT_FOUND, "no work available"),
        },
        Err(e) => {
            tracing::error!(service = %query.service_id, error = %e, "get_work failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal failure")
        }
    }
}

/// `PUT /work/:id` — apply a worker's completion report.
pub async fn update_work_item(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(update): Json<WorkItemUpdate>,
) -> Response {
    match state.engine.handle_update(id, &update).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "accepted": true }))).into_response(),
        Err(OrchestratorError::Conflict(reason)) => {
            tracing::info!(item_id = id, reason, "work item update rejected");
            error_response(StatusCode::CONFLICT, reason)
        }
        Err(OrchestratorError::NotFound(_)) => {
            error_response(StatusCode::NOT_FOUND, "unknown work item")
        }
        Err(OrchestratorError::Validation(reason)) => {
            error_response(StatusCode::BAD_REQUEST, &reason)
        }
        Err(e) => {
            tracing::error!(item_id = id, error = %e, "work item update failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal failure")
        }
    }
}

/// `GET /jobs/:job_id` — read-only job status with result links.
pub async fn job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Response {
    let job = match state.jobs.get(&job_id).await {
        Ok(job) => job,
        Err(RepositoryError::NotFound(_)) => {
            return error_response(StatusCode::NOT_FOUND, "unknown job");
        }
        Err(e) => {
            tracing::error!(%job_id, error = %e, "job lookup failed");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal failure");
        }
    };

    let links = match state.jobs.links(&job_id).await {
        Ok(links) => links,
        Err(e) => {
            tracing::error!(%job_id, error = %e, "link lookup failed");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal failure");
        }
    };

    let body = json!({
        "jobID": job.job_id,
        "username": job.username,
        "status": job.status.as_str(),
        "progress": job.progress,
        "message": job.message,
        "numInputGranules": job.num_input_granules,
        "links": links,
    });
    (StatusCode::OK, Json(body)).into_response()
}

pub async fn health() -> Response {
    (StatusCode::OK, Json(json!({ "status": "ok" }))).into_response()
}

/// Prometheus text exposition of the registry the maintenance publisher
/// writes into.
pub async fn metrics(State(state): State<AppState>) -> Response {
    use prometheus::Encoder;

    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&state.metrics.gather(), &mut buffer) {
        tracing::error!(error = %e, "metrics encoding failed");
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal failure");
    }
    (
        StatusCode::OK,
        [("content-type", encoder.format_type().to_string())],
        buffer,
    )
        .into_response()
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}
