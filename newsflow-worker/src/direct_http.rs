//! ABOUTME: Synchronous direct-invocation HTTP adapter bypassing the bus, for testing only
//! ABOUTME: Not used in the normal consume/execute/publish flow

use crate::handler::TaskHandler;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::Value;
use std::sync::Arc;

/// Build a one-route router that runs `handler` synchronously against the
/// posted JSON body and returns its result (or error) directly, without
/// touching the bus or the workflow store. Each worker binary mounts this
/// under its own path (`/extraction/run`, `/transformation/run`,
/// `/verification/claim`) per the specification's optional direct-invocation
/// surface.
pub fn direct_invocation_router<H: TaskHandler + 'static>(path: &str, handler: Arc<H>) -> Router {
    Router::new().route(path, post(run::<H>)).with_state(handler)
}

async fn run<H: TaskHandler + 'static>(
    State(handler): State<Arc<H>>,
    Json(payload): Json<Value>,
) -> Response {
    match handler.execute(payload).await {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(err) if err.is_retryable() => {
            (StatusCode::SERVICE_UNAVAILABLE, Json(error_body(&err))).into_response()
        }
        Err(err) => (StatusCode::BAD_REQUEST, Json(error_body(&err))).into_response(),
    }
}

fn error_body(err: &newsflow_core::NewsflowError) -> Value {
    serde_json::json!({ "error": { "kind": err.kind(), "message": err.to_string() } })
}
