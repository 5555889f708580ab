use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, ErrorResponse, log_error};
use crate::init::AppState;
use crate::models::{HealthStatus, RunRequest};

// ============================================================================
// RESPONSE TYPES
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct CancelResponse {
    pub success: bool,
    pub request_id: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CancelErrorResponse {
    pub error: String,
    pub message: String,
}

// ============================================================================
// SSE BRIDGE HANDLER
// ============================================================================

/// Handler for executing a run with decoded progress updates via SSE
///
/// POST /api/runs/execute
/// Body: RunRequest JSON
///
/// Returns: Server-Sent Events stream with RunUpdate data
pub async fn run_stream_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RunRequest>,
) -> Response {
    if let Err(errors) = request.validate() {
        return errors.into_app_error().into_response();
    }

    let mut rx = state.executor.handle_run_stream(request).await;

    let stream = async_stream::stream! {
        while let Some(update) = rx.recv().await {
            match serde_json::to_string(&update) {
                Ok(json_data) => {
                    let sse_event = Event::default()
                        .event("message")
                        .data(json_data);

                    let terminal = update.is_terminal();
                    yield Ok::<_, Infallible>(sse_event);
                    if terminal {
                        break;
                    }
                }
                Err(e) => {
                    let sse_event = Event::default()
                        .event("error")
                        .data(format!("{{\"error\":\"Serialization error: {}\"}}", e));
                    yield Ok(sse_event);
                    break;
                }
            }
        }

        // Send final event to indicate stream end
        let done_event = Event::default()
            .event("done")
            .data("Stream closed");
        yield Ok(done_event);
    };

    Sse::new(stream)
        .keep_alive(
            KeepAlive::new()
                .interval(std::time::Duration::from_secs(15))
                .text("keep-alive"),
        )
        .into_response()
}

// ============================================================================
// RELAY HANDLER
// ============================================================================

/// Handler relaying the backend's raw event stream byte-for-byte
///
/// POST /api/runs/stream
/// Body: RunRequest JSON
///
/// The response mode is decided once, before the first byte goes out:
/// either a verbatim event-stream pass-through or a single JSON error.
pub async fn run_relay_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RunRequest>,
) -> Response {
    // Reject locally before contacting upstream at all
    if let Err(errors) = request.validate() {
        let error = errors.into_app_error();
        log_error(&error);
        return error.into_response();
    }

    match state.backend.open_run_stream(&request).await {
        Ok(upstream) if upstream.status().is_success() => {
            // Forward chunks as they arrive; no re-decoding, no buffering.
            // A downstream disconnect drops this body, which drops the
            // upstream handle and aborts its read.
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, "text/event-stream"),
                    (header::CACHE_CONTROL, "no-cache"),
                    (header::CONNECTION, "keep-alive"),
                ],
                Body::from_stream(upstream.bytes_stream()),
            )
                .into_response()
        }
        Ok(upstream) => {
            let status = upstream.status();
            let body = upstream.text().await.unwrap_or_default();
            upstream_error_response(status, &body)
        }
        Err(e) => {
            let error = AppError::internal(format!("Failed to reach test backend: {}", e));
            log_error(&error);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new(error)),
            )
                .into_response()
        }
    }
}

/// Single JSON error response mirroring the upstream status. No stream
/// bytes are ever written on this path.
fn upstream_error_response(status: reqwest::StatusCode, body: &str) -> Response {
    let error = AppError::backend(format!("Backend returned {}: {}", status, body));
    log_error(&error);

    let status =
        StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    (status, Json(ErrorResponse::new(error))).into_response()
}

// ============================================================================
// CANCEL HANDLER
// ============================================================================

/// Handler for cancelling an active run
///
/// DELETE /api/runs/{request_id}
///
/// Returns: JSON with cancellation status
pub async fn run_cancel_handler(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<String>,
) -> std::result::Result<Json<CancelResponse>, (StatusCode, Json<CancelErrorResponse>)> {
    let cancelled = state.executor.cancel_run(&request_id).await;

    if cancelled {
        Ok(Json(CancelResponse {
            success: true,
            request_id: request_id.clone(),
            message: format!("Run {} cancelled successfully", request_id),
        }))
    } else {
        Err((
            StatusCode::NOT_FOUND,
            Json(CancelErrorResponse {
                error: "NOT_FOUND".to_string(),
                message: format!("Run {} not found or already completed", request_id),
            }),
        ))
    }
}

// ============================================================================
// HEALTH HANDLER
// ============================================================================

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthStatus> {
    let mut health = HealthStatus::healthy();
    if state.backend.ping().await.is_err() {
        health.status = "degraded".to_string();
        health.services.backend = false;
    }
    Json(health)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_error_mirrors_status() {
        let response =
            upstream_error_response(reqwest::StatusCode::NOT_FOUND, "{\"error\":\"missing\"}");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        assert!(content_type.starts_with("application/json"));
    }

    #[tokio::test]
    async fn test_upstream_error_body_is_single_json_envelope() {
        let response =
            upstream_error_response(reqwest::StatusCode::SERVICE_UNAVAILABLE, "overloaded");
        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap();

        let envelope: ErrorResponse = serde_json::from_slice(&bytes).unwrap();
        assert!(envelope.error.message.contains("overloaded"));
        assert!(envelope.error.message.contains("503"));
    }
}
