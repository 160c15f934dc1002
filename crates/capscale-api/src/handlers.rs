//! REST API handlers.
//!
//! Each handler reads/writes via `StateStore` and returns JSON responses.
//! Writes to a spec publish a change notification, so the dispatcher picks
//! them up without waiting for the periodic resync.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use capscale_core::{ResourceSpec, ScalingBehavior, UtilizationSample, epoch_secs};

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

fn internal_error(e: impl std::fmt::Display) -> axum::response::Response {
    error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response()
}

// ── Resources ──────────────────────────────────────────────────

/// Body of `PUT /api/v1/resources/:id`. The id comes from the path;
/// generation and timestamps are managed by the store.
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceRequest {
    pub min_nodes: u32,
    pub max_nodes: u32,
    pub target_utilization_percent: f64,
    #[serde(default)]
    pub behavior: Option<ScalingBehavior>,
}

/// GET /api/v1/resources
pub async fn list_resources(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.list_specs() {
        Ok(specs) => ApiResponse::ok(specs).into_response(),
        Err(e) => internal_error(e),
    }
}

/// GET /api/v1/resources/:id
pub async fn get_resource(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.get_spec(&id) {
        Ok(Some(spec)) => ApiResponse::ok(spec).into_response(),
        Ok(None) => error_response("resource not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => internal_error(e),
    }
}

/// PUT /api/v1/resources/:id
pub async fn put_resource(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<ResourceRequest>,
) -> impl IntoResponse {
    let mut spec = ResourceSpec::new(
        &id,
        req.min_nodes,
        req.max_nodes,
        req.target_utilization_percent,
    );
    spec.behavior = req.behavior;

    if let Err(e) = spec.validate() {
        return error_response(&e.to_string(), StatusCode::BAD_REQUEST).into_response();
    }

    match state.store.put_spec(&spec) {
        Ok(stored) => {
            info!(resource = %id, generation = stored.generation, "resource spec stored");
            let status = if stored.generation == 1 {
                StatusCode::CREATED
            } else {
                StatusCode::OK
            };
            (status, ApiResponse::ok(stored)).into_response()
        }
        Err(e) => internal_error(e),
    }
}

/// DELETE /api/v1/resources/:id
pub async fn delete_resource(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.delete_spec(&id) {
        Ok(true) => {
            info!(resource = %id, "resource deleted");
            state.metrics.remove_resource(&id).await;
            ApiResponse::ok("deleted").into_response()
        }
        Ok(false) => error_response("resource not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => internal_error(e),
    }
}

// ── Status ─────────────────────────────────────────────────────

/// GET /api/v1/resources/:id/status
pub async fn get_status(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.get_spec(&id) {
        Ok(Some(_)) => {}
        Ok(None) => {
            return error_response("resource not found", StatusCode::NOT_FOUND).into_response();
        }
        Err(e) => return internal_error(e),
    }
    match state.store.get_status(&id) {
        Ok(Some(status)) => ApiResponse::ok(status).into_response(),
        Ok(None) => {
            error_response("status not reported yet", StatusCode::NOT_FOUND).into_response()
        }
        Err(e) => internal_error(e),
    }
}

// ── Samples ────────────────────────────────────────────────────

/// Body of `POST /api/v1/resources/:id/samples`.
#[derive(Debug, Clone, Deserialize)]
pub struct SampleRequest {
    pub utilization_percent: f64,
    /// Unix seconds; defaults to now.
    #[serde(default)]
    pub sampled_at: Option<u64>,
}

/// POST /api/v1/resources/:id/samples
pub async fn post_sample(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<SampleRequest>,
) -> impl IntoResponse {
    if !req.utilization_percent.is_finite() || !(0.0..=100.0).contains(&req.utilization_percent) {
        return error_response(
            &format!(
                "utilization_percent must be within [0, 100], got {}",
                req.utilization_percent
            ),
            StatusCode::BAD_REQUEST,
        )
        .into_response();
    }

    match state.store.get_spec(&id) {
        Ok(Some(_)) => {}
        Ok(None) => {
            return error_response("resource not found", StatusCode::NOT_FOUND).into_response();
        }
        Err(e) => return internal_error(e),
    }

    let sample = UtilizationSample {
        resource_id: id,
        utilization_percent: req.utilization_percent,
        sampled_at: req.sampled_at.unwrap_or_else(epoch_secs),
    };
    match state.store.put_sample(&sample) {
        Ok(()) => {
            debug!(
                resource = %sample.resource_id,
                utilization = sample.utilization_percent,
                "sample recorded"
            );
            (StatusCode::CREATED, ApiResponse::ok(sample)).into_response()
        }
        Err(e) => internal_error(e),
    }
}

// ── Reconcile ──────────────────────────────────────────────────

/// POST /api/v1/resources/:id/reconcile
pub async fn request_reconcile(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.get_spec(&id) {
        Ok(Some(_)) => {
            state.store.notify(&id);
            (
                StatusCode::ACCEPTED,
                ApiResponse::ok(serde_json::json!({
                    "resource": id,
                    "status": "queued"
                })),
            )
                .into_response()
        }
        Ok(None) => error_response("resource not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => internal_error(e),
    }
}

// ── Health ─────────────────────────────────────────────────────

/// GET /healthz
pub async fn healthz() -> impl IntoResponse {
    ApiResponse::ok("ok")
}

// ── Prometheus ─────────────────────────────────────────────────

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let snapshot = state.metrics.snapshot().await;
    let body = capscale_metrics::render_prometheus(&snapshot);
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}
