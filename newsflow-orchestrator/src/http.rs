//! ABOUTME: The orchestrator's public HTTP surface: submit, inspect, health
//! ABOUTME: POST /workflows supports the Idempotency-Key header for safe client retries

use crate::engine::Engine;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use newsflow_bus::Bus;
use newsflow_core::{NewsflowError, WorkflowRecord};
use newsflow_store::WorkflowStore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub store: Arc<dyn WorkflowStore>,
    pub bus: Arc<dyn Bus>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/workflows", post(submit_workflow))
        .route("/workflows/:id", get(get_workflow))
        .route("/healthz", get(healthz))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct SubmitRequest {
    workflow_type: String,
    initial_payload: Value,
}

#[derive(Debug, Serialize)]
struct SubmitResponse {
    correlation_id: Uuid,
}

async fn submit_workflow(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SubmitRequest>,
) -> Response {
    let idempotency_key = headers
        .get("Idempotency-Key")
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string);

    match state
        .engine
        .submit(&request.workflow_type, request.initial_payload, idempotency_key)
        .await
    {
        Ok(correlation_id) => (StatusCode::ACCEPTED, Json(SubmitResponse { correlation_id })).into_response(),
        Err(err) => error_response(&err),
    }
}

async fn get_workflow(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    match state.store.load(id).await {
        Ok(Some(record)) => (StatusCode::OK, Json(WorkflowView::from(&record))).into_response(),
        Ok(None) => error_status(StatusCode::NOT_FOUND, "NOT_FOUND", &format!("workflow {id} not found")),
        Err(err) => error_response(&err),
    }
}

async fn healthz(State(state): State<AppState>) -> Response {
    let bus_ok = state.bus.is_healthy().await;
    let store_ok = state
        .store
        .load(Uuid::nil())
        .await
        .is_ok();

    if bus_ok && store_ok {
        StatusCode::OK.into_response()
    } else {
        StatusCode::SERVICE_UNAVAILABLE.into_response()
    }
}

/// The subset of `WorkflowRecord` the status endpoint exposes, matching
/// §7's "user-visible failure" contract: `status, current_stage, last_error`.
#[derive(Debug, Serialize)]
struct WorkflowView {
    correlation_id: Uuid,
    workflow_type: String,
    status: newsflow_core::WorkflowStatus,
    current_index: usize,
    current_stage: Option<String>,
    stage_output: Value,
    attempts_per_stage: std::collections::HashMap<String, u32>,
    last_error: Option<newsflow_core::WorkflowErrorInfo>,
}

impl From<&WorkflowRecord> for WorkflowView {
    fn from(record: &WorkflowRecord) -> Self {
        Self {
            correlation_id: record.correlation_id,
            workflow_type: record.workflow_type.clone(),
            status: record.status,
            current_index: record.current_index,
            current_stage: record.current_stage().map(|s| s.name.clone()),
            stage_output: record.stage_output.clone(),
            attempts_per_stage: record.attempts_per_stage.clone(),
            last_error: record.last_error.clone(),
        }
    }
}

fn error_response(err: &NewsflowError) -> Response {
    let status = match err {
        NewsflowError::BadInput { .. } => StatusCode::BAD_REQUEST,
        NewsflowError::NotFound { .. } => StatusCode::NOT_FOUND,
        NewsflowError::BusUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_status(status, err.kind(), &err.to_string())
}

fn error_status(status: StatusCode, kind: &str, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": { "kind": kind, "message": message } }))).into_response()
}
