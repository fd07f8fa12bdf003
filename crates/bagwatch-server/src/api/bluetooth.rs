//! Bluetooth API endpoints.
//!
//! Provides a one-off device scan, used to pick the beacon to link.

use std::time::Duration;

use axum::extract::{Query, State};
use axum::Json;
use bagwatch_core::DiscoveredDevice;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::api::error::{ApiResult, ErrorResponse};
use crate::state::SharedState;

/// Default scan duration in seconds.
const DEFAULT_SCAN_DURATION_SECS: u64 = 10;

/// Longest scan a client may request.
const MAX_SCAN_DURATION_SECS: u64 = 30;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Query parameters for the device scan.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct ScanDevicesQuery {
    /// Scan duration in seconds (1-30, default 10).
    #[param(example = 5)]
    pub duration_secs: Option<u64>,
}

/// Device scan response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "devices": [
        {
            "id": "AA:BB:CC:DD:EE:FF",
            "name": "Tile Mate",
            "signal_strength": -45,
            "is_connectable": true,
            "discovered_at": "2025-01-15T03:30:00Z"
        }
    ],
    "scan_duration_secs": 10,
    "scanned_at": "2025-01-15T03:30:10Z",
    "error": null
}))]
pub struct ScanDevicesResponse {
    /// Distinct peripherals heard, first seen first.
    pub devices: Vec<DiscoveredDevice>,

    /// Requested scan window.
    #[schema(example = 10)]
    pub scan_duration_secs: u64,

    /// When the window closed.
    pub scanned_at: DateTime<Utc>,

    /// Radio failure that ended the scan early; `devices` is then partial.
    pub error: Option<String>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Scan for nearby Bluetooth devices.
#[utoipa::path(
    get,
    path = "/api/devices",
    tag = "devices",
    operation_id = "scanDevices",
    summary = "Scan for Bluetooth devices",
    description = "Runs one discovery window and returns every peripheral heard. \
        Use this to find the beacon to link to a bag. Fails with 409 while \
        another scan (for example a monitoring cycle) holds the radio.",
    params(ScanDevicesQuery),
    responses(
        (status = 200, description = "Scan completed", body = ScanDevicesResponse),
        (status = 409, description = "Another scan is running", body = ErrorResponse),
        (status = 503, description = "Bluetooth unavailable", body = ErrorResponse)
    )
)]
pub async fn scan_devices(
    State(state): State<SharedState>,
    Query(query): Query<ScanDevicesQuery>,
) -> ApiResult<Json<ScanDevicesResponse>> {
    let duration_secs = query
        .duration_secs
        .unwrap_or(DEFAULT_SCAN_DURATION_SECS)
        .clamp(1, MAX_SCAN_DURATION_SECS);

    let report = state
        .coordinator()
        .scanner()
        .scan(Duration::from_secs(duration_secs))
        .await?
        .collect()
        .await;

    tracing::info!(devices = report.devices.len(), duration_secs, "device scan finished");

    Ok(Json(ScanDevicesResponse {
        devices: report.devices,
        scan_duration_secs: duration_secs,
        scanned_at: report.finished_at,
        error: report.error.map(|err| err.to_string()),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_response_serialization() {
        let response = ScanDevicesResponse {
            devices: vec![DiscoveredDevice {
                id: "AA:BB:CC:DD:EE:FF".to_string(),
                name: Some("Tile".to_string()),
                signal_strength: Some(-45),
                is_connectable: Some(true),
                discovered_at: Utc::now(),
            }],
            scan_duration_secs: 5,
            scanned_at: Utc::now(),
            error: None,
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"signal_strength\":-45"));
    }
}
