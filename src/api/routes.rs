//! API Routes
//!
//! HTTP endpoints for record provisioning, health checks and metrics

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::api::Metrics;
use crate::election::CampaignState;
use crate::records::{RecordError, RecordStore};
use crate::store::Health;
use crate::types::{Record, RecordSpec};

/// Shared API state
pub struct ApiState {
    /// Zone served over DNS, reported by /status
    pub zone: String,
    pub records: Arc<RecordStore>,
    pub metrics: Arc<Metrics>,
    pub health: Health,

    /// Campaign state when elections are enabled; writes require `Leading`
    pub leader: Option<watch::Receiver<CampaignState>>,
}

impl ApiState {
    fn is_leader(&self) -> bool {
        self.leader
            .as_ref()
            .map_or(true, |state| *state.borrow() == CampaignState::Leading)
    }
}

/// Build the API router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        // Health & Status
        .route("/health", get(health_check))
        .route("/status", get(get_status))

        // Provisioning
        .route("/zones/:zone/records", post(append_records).delete(delete_records))

        // Metrics
        .route("/metrics", get(get_metrics_prometheus))
        .route("/metrics/json", get(get_metrics_json))

        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the HTTP API server
pub async fn run_api_server(port: u16, state: Arc<ApiState>) -> anyhow::Result<()> {
    let app = router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!("📊 HTTP API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// GET /health - OK until the store connection is lost
async fn health_check(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    if state.health.is_healthy() {
        (StatusCode::OK, "OK")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "UNHEALTHY")
    }
}

/// GET /status - Detailed status
async fn get_status(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    let election = state.leader.as_ref().map(|s| format!("{:?}", *s.borrow()));

    Json(serde_json::json!({
        "status": if state.health.is_healthy() { "healthy" } else { "unhealthy" },
        "version": env!("CARGO_PKG_VERSION"),
        "zone": state.zone,
        "uptime_secs": state.metrics.uptime_secs(),
        "leader": state.is_leader(),
        "election": election,
    }))
}

/// POST /zones/:zone/records - Write a batch of records
async fn append_records(
    State(state): State<Arc<ApiState>>,
    Path(zone): Path<String>,
    Json(specs): Json<Vec<RecordSpec>>,
) -> Response {
    if !state.is_leader() {
        return not_leader();
    }

    match state.records.append(&zone, &specs).await {
        Ok(records) => {
            state.metrics.add_records_appended(records.len() as u64);
            accepted(&records)
        }
        Err(e) => record_error(e),
    }
}

/// DELETE /zones/:zone/records - Delete a batch of records
async fn delete_records(
    State(state): State<Arc<ApiState>>,
    Path(zone): Path<String>,
    Json(specs): Json<Vec<RecordSpec>>,
) -> Response {
    if !state.is_leader() {
        return not_leader();
    }

    match state.records.delete(&zone, &specs).await {
        Ok(records) => {
            state.metrics.add_records_deleted(records.len() as u64);
            accepted(&records)
        }
        Err(e) => record_error(e),
    }
}

/// GET /metrics - Prometheus format metrics
async fn get_metrics_prometheus(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.to_prometheus(),
    )
}

/// GET /metrics/json - JSON format metrics
async fn get_metrics_json(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    Json(state.metrics.to_json())
}

fn accepted(records: &[Record]) -> Response {
    let specs: Vec<RecordSpec> = records.iter().map(Record::to_spec).collect();
    (StatusCode::OK, Json(specs)).into_response()
}

fn not_leader() -> Response {
    let body = serde_json::json!({ "error": "not the leader", "index": null });
    (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
}

fn record_error(e: RecordError) -> Response {
    let status = match e {
        RecordError::Malformed { .. } => StatusCode::BAD_REQUEST,
        RecordError::Lease { .. } | RecordError::StoreWrite { .. } | RecordError::StoreDelete { .. } => {
            warn!("record batch failed: {}", e);
            StatusCode::BAD_GATEWAY
        }
    };

    let body = serde_json::json!({ "error": e.to_string(), "index": e.index() });
    (status, Json(body)).into_response()
}
