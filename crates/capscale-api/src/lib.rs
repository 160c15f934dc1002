//! capscale-api — REST API for capscale.
//!
//! Provides axum route handlers for declaring managed resources, reading
//! the status the reconciliation engine writes back, and feeding it
//! utilization samples.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/resources` | List all resource specs |
//! | GET | `/api/v1/resources/:id` | Get a resource spec |
//! | PUT | `/api/v1/resources/:id` | Create or replace a resource spec |
//! | DELETE | `/api/v1/resources/:id` | Delete a resource and its data |
//! | GET | `/api/v1/resources/:id/status` | Latest reconciliation status |
//! | POST | `/api/v1/resources/:id/samples` | Ingest a utilization sample |
//! | POST | `/api/v1/resources/:id/reconcile` | Request an immediate pass |
//! | GET | `/healthz` | Liveness probe |
//! | GET | `/metrics` | Prometheus exposition |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use capscale_metrics::EngineMetrics;
use capscale_state::StateStore;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
    pub metrics: Arc<EngineMetrics>,
}

/// Build the complete API router (REST + health + metrics).
pub fn build_router(store: StateStore, metrics: Arc<EngineMetrics>) -> Router {
    let api_state = ApiState { store, metrics };

    let api_routes = Router::new()
        .route("/resources", get(handlers::list_resources))
        .route(
            "/resources/{id}",
            get(handlers::get_resource)
                .put(handlers::put_resource)
                .delete(handlers::delete_resource),
        )
        .route("/resources/{id}/status", get(handlers::get_status))
        .route("/resources/{id}/samples", post(handlers::post_sample))
        .route("/resources/{id}/reconcile", post(handlers::request_reconcile))
        .with_state(api_state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/healthz", get(handlers::healthz))
        .route("/metrics", get(handlers::prometheus_metrics).with_state(api_state))
}
