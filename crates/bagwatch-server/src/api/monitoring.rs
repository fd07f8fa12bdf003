//! Proximity monitoring API endpoints.

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use bagwatch_core::{CycleReport, MonitoringStatus};

use crate::api::error::{ApiResult, ErrorResponse};
use crate::state::SharedState;

/// Creates the monitoring router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route(
            "/",
            get(get_monitoring)
                .post(start_monitoring)
                .delete(stop_monitoring),
        )
        .route("/cycle", post(run_cycle))
}

/// Monitoring status.
#[utoipa::path(
    get,
    path = "/api/monitoring",
    tag = "monitoring",
    operation_id = "getMonitoring",
    summary = "Get monitoring status",
    responses(
        (status = 200, description = "Current status", body = MonitoringStatus)
    )
)]
pub async fn get_monitoring(State(state): State<SharedState>) -> Json<MonitoringStatus> {
    Json(state.coordinator().status().await)
}

/// Start monitoring.
#[utoipa::path(
    post,
    path = "/api/monitoring",
    tag = "monitoring",
    operation_id = "startMonitoring",
    summary = "Start proximity monitoring",
    description = "Starts the periodic scan loop for the signed-in owner. \
        Calling it while already running does nothing.",
    responses(
        (status = 200, description = "Monitoring running", body = MonitoringStatus),
        (status = 401, description = "Not signed in", body = ErrorResponse)
    )
)]
pub async fn start_monitoring(
    State(state): State<SharedState>,
) -> ApiResult<Json<MonitoringStatus>> {
    let coordinator = state.coordinator();
    coordinator.start_proximity_monitoring().await?;
    Ok(Json(coordinator.status().await))
}

/// Stop monitoring.
#[utoipa::path(
    delete,
    path = "/api/monitoring",
    tag = "monitoring",
    operation_id = "stopMonitoring",
    summary = "Stop proximity monitoring",
    description = "Stops the loop and releases the radio. Safe to call when stopped.",
    responses(
        (status = 200, description = "Monitoring stopped", body = MonitoringStatus)
    )
)]
pub async fn stop_monitoring(State(state): State<SharedState>) -> Json<MonitoringStatus> {
    let coordinator = state.coordinator();
    coordinator.stop_all_monitoring().await;
    Json(coordinator.status().await)
}

/// Run one cycle now.
#[utoipa::path(
    post,
    path = "/api/monitoring/cycle",
    tag = "monitoring",
    operation_id = "runCycle",
    summary = "Run one monitoring cycle now",
    description = "Scans once for every linked item, updates statuses and \
        raises alerts. Reports `skipped: true` if another scan holds the radio.",
    responses(
        (status = 200, description = "Cycle finished", body = CycleReport),
        (status = 401, description = "Not signed in", body = ErrorResponse),
        (status = 503, description = "Bluetooth unavailable", body = ErrorResponse)
    )
)]
pub async fn run_cycle(State(state): State<SharedState>) -> ApiResult<Json<CycleReport>> {
    Ok(Json(state.coordinator().run_cycle().await?))
}
