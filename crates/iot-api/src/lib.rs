//! Internet of Trash HTTP API
//!
//! HTTP endpoints for:
//! - Forced refresh of a bin's fill level over MQTT
//! - Bulk measurement upload
//! - Health and bridge counters

use std::sync::Arc;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tracing::{error, info, warn};

use iot_bridge::{Bridge, RpcError};
use iot_common::{BridgeStats, ConnectionState, Measurement};

/// Error body shared by every endpoint
#[derive(Debug, Serialize)]
pub struct ApiError {
    #[serde(skip)]
    pub status: StatusCode,
    pub error: String,
}

impl ApiError {
    pub fn new(status: StatusCode, error: impl Into<String>) -> Self {
        Self { status, error: error.into() }
    }

    pub fn invalid_request() -> Self {
        Self::new(StatusCode::BAD_REQUEST, "Invalid request.")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

impl From<RpcError> for ApiError {
    fn from(err: RpcError) -> Self {
        let status = match &err {
            RpcError::InvalidTarget(_) => StatusCode::BAD_REQUEST,
            RpcError::Device(_) | RpcError::InvalidResponse(_) => StatusCode::BAD_GATEWAY,
            RpcError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            RpcError::Publish(_) | RpcError::Disconnected | RpcError::Cancelled => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        };
        Self::new(status, err.to_string())
    }
}

#[derive(Debug, Serialize)]
pub struct UpdateValueResponse {
    pub value: f64,
}

#[derive(Debug, Serialize)]
pub struct BulkInsertResponse {
    pub success: bool,
    pub inserted: usize,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// UP when the broker session is connected, DEGRADED otherwise
    pub status: String,
    pub version: String,
    pub bridge: BridgeStats,
}

/// Create the router with all endpoints
pub fn create_router(bridge: Arc<Bridge>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/bins/:id/update", post(request_update_handler))
        .route("/api/bulkmeasurements", post(bulk_measurements_handler))
        .with_state(bridge)
}

async fn health_handler(State(bridge): State<Arc<Bridge>>) -> Json<HealthResponse> {
    let stats = bridge.stats();
    let status = match stats.connection_state {
        ConnectionState::Connected => "UP",
        _ => "DEGRADED",
    };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        bridge: stats,
    })
}

async fn request_update_handler(
    State(bridge): State<Arc<Bridge>>,
    Path(bin_id): Path<String>,
) -> Result<Json<UpdateValueResponse>, ApiError> {
    match bridge.request_update(&bin_id).await {
        Ok(value) => {
            info!(bin_id = %bin_id, value = value, "Forced update completed");
            Ok(Json(UpdateValueResponse { value }))
        }
        Err(e) => {
            warn!(bin_id = %bin_id, error = %e, "Forced update failed");
            Err(e.into())
        }
    }
}

async fn bulk_measurements_handler(
    State(bridge): State<Arc<Bridge>>,
    body: Bytes,
) -> Result<Json<BulkInsertResponse>, ApiError> {
    let measurements: Vec<Measurement> =
        serde_json::from_slice(&body).map_err(|_| ApiError::invalid_request())?;

    if measurements.iter().any(|m| m.validate().is_err()) {
        return Err(ApiError::invalid_request());
    }

    let inserted = bridge
        .repository()
        .record_many(&measurements)
        .await
        .map_err(|e| {
            error!(count = measurements.len(), error = %e, "Failed to store measurement batch");
            ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "Failed to store measurements")
        })?;

    info!(count = inserted, "Bulk measurements stored");
    Ok(Json(BulkInsertResponse { success: true, inserted }))
}
