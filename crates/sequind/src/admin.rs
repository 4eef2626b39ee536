//! Admin HTTP API.
//!
//! - `GET /healthz` — liveness probe.
//! - `GET /metrics` — Prometheus text exposition.
//! - `GET /v1/epochs/latest` — the most recent epoch summary.
//! - `POST /v1/mutations` — enqueue a signed mutation. Development
//!   convenience: a production deployment feeds the mutation source from
//!   the directory front-end instead.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use prometheus::{Encoder, Registry, TextEncoder};
use sequin_queue::MemoryQueue;
use sequin_types::{EpochSummary, SignedKv};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::info;

/// Shared state for the admin handlers.
#[derive(Clone)]
pub struct AdminState {
    /// Metrics registry backing `/metrics`.
    pub registry: Registry,
    /// Most recent epoch summary, updated by the subscriber task.
    pub latest: Arc<RwLock<Option<EpochSummary>>>,
    /// The in-process mutation queue.
    pub queue: MemoryQueue,
}

/// Build the admin router.
pub fn router(state: AdminState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/v1/epochs/latest", get(latest_epoch))
        .route("/v1/mutations", post(submit_mutation))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn metrics(State(state): State<AdminState>) -> impl IntoResponse {
    let families = state.registry.gather();
    let mut buffer = Vec::new();
    match TextEncoder::new().encode(&families, &mut buffer) {
        Ok(()) => (StatusCode::OK, buffer).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("metrics encoding failed: {e}"),
        )
            .into_response(),
    }
}

async fn latest_epoch(State(state): State<AdminState>) -> impl IntoResponse {
    match state.latest.read().await.clone() {
        Some(summary) => Json(summary).into_response(),
        None => (StatusCode::NOT_FOUND, "no epoch yet").into_response(),
    }
}

/// Response body for `POST /v1/mutations`.
#[derive(Serialize)]
struct SubmitResponse {
    sequence: u64,
}

async fn submit_mutation(
    State(state): State<AdminState>,
    Json(update): Json<SignedKv>,
) -> impl IntoResponse {
    let sequence = state.queue.push(update);
    info!(sequence, "mutation accepted via admin API");
    (StatusCode::ACCEPTED, Json(SubmitResponse { sequence }))
}
