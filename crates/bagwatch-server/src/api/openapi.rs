//! OpenAPI specification generation for the bagwatch API.
//!
//! The generated document is served at `/api/openapi.json`, browsable at
//! `/swagger-ui` and written to disk by the `gen-openapi` binary for client
//! generation.

use bagwatch_core::{
    CycleReport, DiscoveredDevice, HealthResponse, ItemId, MonitoringStatus, OwnerId,
    ProximityConfig, ProximityConfigPatch, ProximityStatus, RadioState, TrackedItem,
    TrackingState,
};
use utoipa::OpenApi;

use super::bluetooth::ScanDevicesResponse;
use super::error::ErrorResponse;
use super::items::{
    ItemListResponse, LinkDeviceRequest, RegisterItemRequest, TrackingStateResponse,
};
use super::session::{SessionResponse, SignInRequest};

/// Returns the OpenAPI specification as a pretty JSON string.
///
/// # Errors
///
/// Returns an error if the document cannot be serialized.
pub fn get_openapi_json() -> Result<String, serde_json::Error> {
    ApiDoc::openapi().to_pretty_json()
}

/// Main OpenAPI document structure for bagwatch.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "bagwatch API",
        version = "0.1.0",
        description = r"
# bagwatch API

bagwatch keeps an eye on your checked luggage while you wait at the carousel.

## Overview

1. **Register** each bag by scanning the code on its tag
2. **Link** the BLE beacon packed inside the bag
3. **Monitor**: the server scans periodically, classifies each beacon's
   signal as `nearby` or `far` and raises an alert when that changes

## Proximity classification

- RSSI at or above `near_threshold` (default -50 dBm): `nearby`
- RSSI at or below `far_threshold` (default -80 dBm): `far`
- In between: the previous status is kept, so a bag does not flap at the edge

Every endpoint under `/api/items` and `/api/monitoring` requires a session
(`POST /api/session`).
",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "/", description = "Local bagwatch server")
    ),
    tags(
        (name = "system", description = "Health checks"),
        (name = "session", description = "Anonymous sign-in for the local owner"),
        (name = "items", description = "Luggage registration and beacon linking"),
        (name = "monitoring", description = "Periodic proximity scanning and alerts"),
        (name = "devices", description = "One-off Bluetooth scans for picking a beacon"),
        (name = "config", description = "Proximity thresholds and timings")
    ),
    paths(
        // Health
        super::health::health_check,
        // Session
        super::session::get_session,
        super::session::sign_in,
        super::session::sign_out,
        // Items
        super::items::list_items,
        super::items::register_item,
        super::items::stream_items,
        super::items::get_item,
        super::items::remove_item,
        super::items::link_device,
        super::items::unlink_device,
        super::items::get_tracking_state,
        // Monitoring
        super::monitoring::get_monitoring,
        super::monitoring::start_monitoring,
        super::monitoring::stop_monitoring,
        super::monitoring::run_cycle,
        // Devices
        super::bluetooth::scan_devices,
        // Config
        super::config::get_proximity,
        super::config::update_proximity,
    ),
    components(
        schemas(
            ErrorResponse,
            HealthResponse,
            SessionResponse,
            SignInRequest,
            ItemId,
            OwnerId,
            ProximityStatus,
            TrackedItem,
            ItemListResponse,
            RegisterItemRequest,
            LinkDeviceRequest,
            TrackingState,
            TrackingStateResponse,
            MonitoringStatus,
            CycleReport,
            RadioState,
            DiscoveredDevice,
            ScanDevicesResponse,
            ProximityConfig,
            ProximityConfigPatch,
        )
    )
)]
pub struct ApiDoc;
