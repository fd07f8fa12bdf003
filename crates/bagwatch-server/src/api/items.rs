//! Tracked item API endpoints.
//!
//! Registration of scanned codes, beacon linking and removal, plus a
//! server-sent event stream that mirrors the registry subscription.

use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, put};
use axum::{Json, Router};
use bagwatch_core::{ItemId, TrackedItem, TrackingState};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use utoipa::ToSchema;

use crate::api::error::{ApiResult, ErrorResponse};
use crate::state::SharedState;

/// Creates the items router with all endpoints.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(list_items).post(register_item))
        .route("/stream", get(stream_items))
        .route("/{id}", get(get_item).delete(remove_item))
        .route("/{id}/device", put(link_device).delete(unlink_device))
        .route("/{id}/tracking", get(get_tracking_state))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// The owner's items.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ItemListResponse {
    /// Items, newest first.
    pub items: Vec<TrackedItem>,

    /// Number of items.
    #[schema(example = 1)]
    pub count: usize,
}

impl From<Vec<TrackedItem>> for ItemListResponse {
    fn from(items: Vec<TrackedItem>) -> Self {
        Self {
            count: items.len(),
            items,
        }
    }
}

/// Register a scanned luggage code.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({ "external_code": "bag:1001" }))]
pub struct RegisterItemRequest {
    /// Value read from the QR code.
    #[schema(example = "bag:1001")]
    pub external_code: String,
}

/// Link a beacon to an item.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({ "device_id": "AA:BB:CC:DD:EE:FF" }))]
pub struct LinkDeviceRequest {
    /// Peripheral id as reported by a scan.
    #[schema(example = "AA:BB:CC:DD:EE:FF")]
    pub device_id: String,
}

/// Where an item is in the monitoring cycle.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TrackingStateResponse {
    /// The item.
    pub item_id: ItemId,

    /// Its state.
    pub state: TrackingState,
}

// ============================================================================
// Handlers
// ============================================================================

/// List the signed-in owner's items.
#[utoipa::path(
    get,
    path = "/api/items",
    tag = "items",
    operation_id = "listItems",
    summary = "List tracked luggage",
    responses(
        (status = 200, description = "Items, newest first", body = ItemListResponse),
        (status = 401, description = "Not signed in", body = ErrorResponse)
    )
)]
pub async fn list_items(State(state): State<SharedState>) -> ApiResult<Json<ItemListResponse>> {
    let items = state.registry().list().await?;
    Ok(Json(items.into()))
}

/// Register a scanned code.
#[utoipa::path(
    post,
    path = "/api/items",
    tag = "items",
    operation_id = "registerItem",
    summary = "Register luggage from a scanned code",
    description = "Creates a tracked item with status `unknown` and no beacon.",
    request_body = RegisterItemRequest,
    responses(
        (status = 201, description = "Item registered", body = TrackedItem),
        (status = 400, description = "Empty or oversized code", body = ErrorResponse),
        (status = 401, description = "Not signed in", body = ErrorResponse)
    )
)]
pub async fn register_item(
    State(state): State<SharedState>,
    Json(request): Json<RegisterItemRequest>,
) -> ApiResult<(StatusCode, Json<TrackedItem>)> {
    let registry = state.registry();
    let id = registry.register(&request.external_code).await?;
    let item = registry.get(id).await?;
    Ok((StatusCode::CREATED, Json(item)))
}

/// Get one item.
#[utoipa::path(
    get,
    path = "/api/items/{id}",
    tag = "items",
    operation_id = "getItem",
    summary = "Get a tracked item",
    params(("id" = String, Path, description = "Item id")),
    responses(
        (status = 200, description = "The item", body = TrackedItem),
        (status = 404, description = "No such item", body = ErrorResponse)
    )
)]
pub async fn get_item(
    State(state): State<SharedState>,
    Path(id): Path<ItemId>,
) -> ApiResult<Json<TrackedItem>> {
    Ok(Json(state.registry().get(id).await?))
}

/// Delete an item.
#[utoipa::path(
    delete,
    path = "/api/items/{id}",
    tag = "items",
    operation_id = "removeItem",
    summary = "Remove a tracked item",
    params(("id" = String, Path, description = "Item id")),
    responses(
        (status = 204, description = "Removed"),
        (status = 404, description = "No such item", body = ErrorResponse)
    )
)]
pub async fn remove_item(
    State(state): State<SharedState>,
    Path(id): Path<ItemId>,
) -> ApiResult<StatusCode> {
    state.registry().remove(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Link a beacon.
#[utoipa::path(
    put,
    path = "/api/items/{id}/device",
    tag = "items",
    operation_id = "linkDevice",
    summary = "Link a BLE beacon to an item",
    description = "Linking the same beacon again is a no-op. A different beacon \
        is rejected until the current one is unlinked.",
    params(("id" = String, Path, description = "Item id")),
    request_body = LinkDeviceRequest,
    responses(
        (status = 200, description = "Linked", body = TrackedItem),
        (status = 400, description = "Malformed device id", body = ErrorResponse),
        (status = 404, description = "No such item", body = ErrorResponse),
        (status = 409, description = "Another beacon is linked", body = ErrorResponse)
    )
)]
pub async fn link_device(
    State(state): State<SharedState>,
    Path(id): Path<ItemId>,
    Json(request): Json<LinkDeviceRequest>,
) -> ApiResult<Json<TrackedItem>> {
    Ok(Json(state.registry().link_device(id, &request.device_id).await?))
}

/// Unlink the beacon.
#[utoipa::path(
    delete,
    path = "/api/items/{id}/device",
    tag = "items",
    operation_id = "unlinkDevice",
    summary = "Unlink an item's beacon",
    params(("id" = String, Path, description = "Item id")),
    responses(
        (status = 200, description = "Unlinked, status reset to unknown", body = TrackedItem),
        (status = 404, description = "No such item", body = ErrorResponse)
    )
)]
pub async fn unlink_device(
    State(state): State<SharedState>,
    Path(id): Path<ItemId>,
) -> ApiResult<Json<TrackedItem>> {
    Ok(Json(state.registry().unlink_device(id).await?))
}

/// Monitoring state of one item.
#[utoipa::path(
    get,
    path = "/api/items/{id}/tracking",
    tag = "items",
    operation_id = "getTrackingState",
    summary = "Get an item's monitoring state",
    params(("id" = String, Path, description = "Item id")),
    responses(
        (status = 200, description = "Tracking state", body = TrackingStateResponse),
        (status = 404, description = "No such item", body = ErrorResponse)
    )
)]
pub async fn get_tracking_state(
    State(state): State<SharedState>,
    Path(id): Path<ItemId>,
) -> ApiResult<Json<TrackingStateResponse>> {
    let tracking = state.coordinator().tracking_state(id).await?;
    Ok(Json(TrackingStateResponse {
        item_id: id,
        state: tracking,
    }))
}

/// Stream the owner's items.
///
/// Sends an `items` event with the full list on connect and after every
/// change. Slow clients only ever see the latest list.
#[utoipa::path(
    get,
    path = "/api/items/stream",
    tag = "items",
    operation_id = "streamItems",
    summary = "Subscribe to item changes (server-sent events)",
    responses(
        (
            status = 200,
            description = "Event stream of `ItemListResponse` payloads",
            content_type = "text/event-stream"
        ),
        (status = 401, description = "Not signed in", body = ErrorResponse)
    )
)]
pub async fn stream_items(
    State(state): State<SharedState>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let (tx, rx) = watch::channel(None::<Vec<TrackedItem>>);
    let subscription = state
        .registry()
        .subscribe(move |items| {
            tx.send_replace(Some(items));
        })
        .await?;

    // The subscription lives as long as the stream.
    let events = stream::unfold((rx, subscription), |(mut rx, subscription)| async move {
        rx.changed().await.ok()?;
        let items = rx.borrow_and_update().clone().unwrap_or_default();
        let event = Event::default()
            .event("items")
            .json_data(ItemListResponse::from(items))
            .unwrap_or_else(|err| Event::default().event("error").data(err.to_string()));
        Some((Ok(event), (rx, subscription)))
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_request_deserialization() {
        let request: RegisterItemRequest =
            serde_json::from_str(r#"{"external_code": "bag:1001"}"#).unwrap();
        assert_eq!(request.external_code, "bag:1001");
    }

    #[test]
    fn test_list_response_counts_items() {
        let response = ItemListResponse::from(Vec::new());
        assert_eq!(response.count, 0);
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"items\":[]"));
    }
}
