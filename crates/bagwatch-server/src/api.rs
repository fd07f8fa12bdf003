//! HTTP API routes and handlers.
//!
//! This module contains all HTTP endpoint implementations organized by domain:
//! - `health` - Service health checks
//! - `session` - Anonymous sign-in for the local owner
//! - `items` - Luggage registration, beacon linking, change stream
//! - `monitoring` - Start/stop the proximity loop, run a cycle now
//! - `bluetooth` - One-off device scans
//! - `config` - Proximity configuration
//! - `error` - API error types
//! - `openapi` - OpenAPI specification generation

use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::state::SharedState;

pub mod bluetooth;
pub mod config;
pub mod error;
pub mod health;
pub mod items;
pub mod monitoring;
pub mod openapi;
pub mod session;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use openapi::get_openapi_json;

/// Creates the combined API router with all endpoints.
///
/// # Route Structure
///
/// ```text
/// /health                    - Health check
/// /swagger-ui                - Interactive API docs
/// /api
/// ├── /session               - Sign in / out
/// ├── /items                 - Registered luggage (+ /stream, /{id}, /{id}/device)
/// ├── /monitoring            - Proximity loop (+ /cycle)
/// ├── /devices               - Bluetooth device scanning
/// ├── /config/proximity      - Thresholds and timings
/// └── /openapi.json          - OpenAPI specification
/// ```
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .nest("/health", health::router())
        .nest(
            "/api",
            Router::new()
                .nest("/session", session::router())
                .nest("/items", items::router())
                .nest("/monitoring", monitoring::router())
                .route("/devices", get(bluetooth::scan_devices))
                .nest("/config", config::router()),
        )
        .merge(SwaggerUi::new("/swagger-ui").url("/api/openapi.json", openapi::ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request, StatusCode};
    use bagwatch_core::{AlertEmitter, Config, MemoryStore, MockRadio, Radio, TrackedItem};
    use futures::StreamExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::state::AppState;

    fn app() -> (Router, Arc<MockRadio>) {
        let radio = Arc::new(MockRadio::new());
        let state = AppState::from_parts(
            Config::default(),
            Arc::new(MemoryStore::new()),
            Arc::clone(&radio) as Arc<dyn Radio>,
            AlertEmitter::logging(),
        );
        (create_router(Arc::new(state)), radio)
    }

    async fn call(
        app: &Router,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn signed_in_app() -> (Router, Arc<MockRadio>) {
        let (app, radio) = app();
        let (status, _) = call(&app, Method::POST, "/api/session", Some(json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        (app, radio)
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _) = app();
        let (status, body) = call(&app, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_items_require_session() {
        let (app, _) = app();
        let (status, body) = call(&app, Method::GET, "/api/items", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "AUTH_REQUIRED");
    }

    #[tokio::test]
    async fn test_anonymous_session_is_reused() {
        let (app, _) = app();
        let (_, first) = call(&app, Method::POST, "/api/session", Some(json!({}))).await;
        let (_, second) = call(&app, Method::POST, "/api/session", Some(json!({}))).await;
        assert_eq!(first["owner_id"], second["owner_id"]);

        let (status, _) = call(&app, Method::DELETE, "/api/session", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (_, session) = call(&app, Method::GET, "/api/session", None).await;
        assert_eq!(session["signed_in"], false);
    }

    #[tokio::test]
    async fn test_register_link_and_remove() {
        let (app, _) = signed_in_app().await;

        let (status, created) = call(
            &app,
            Method::POST,
            "/api/items",
            Some(json!({ "external_code": "bag:1001" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let item: TrackedItem = serde_json::from_value(created).unwrap();
        let uri = format!("/api/items/{}", item.id);

        let (status, linked) = call(
            &app,
            Method::PUT,
            &format!("{uri}/device"),
            Some(json!({ "device_id": "AA:BB:CC" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(linked["linked_device_id"], "AA:BB:CC");

        let (status, conflict) = call(
            &app,
            Method::PUT,
            &format!("{uri}/device"),
            Some(json!({ "device_id": "11:22:33" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(conflict["error"], "ALREADY_LINKED");

        let (_, list) = call(&app, Method::GET, "/api/items", None).await;
        assert_eq!(list["count"], 1);

        let (status, _) = call(&app, Method::DELETE, &uri, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = call(&app, Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_empty_code_is_rejected() {
        let (app, _) = signed_in_app().await;
        let (status, body) = call(
            &app,
            Method::POST,
            "/api/items",
            Some(json!({ "external_code": "" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "INVALID_INPUT");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_updates_status() {
        let (app, radio) = signed_in_app().await;
        let (_, created) = call(
            &app,
            Method::POST,
            "/api/items",
            Some(json!({ "external_code": "bag:1001" })),
        )
        .await;
        let id = created["id"].as_str().unwrap().to_string();
        call(
            &app,
            Method::PUT,
            &format!("/api/items/{id}/device"),
            Some(json!({ "device_id": "AA:BB:CC" })),
        )
        .await;
        radio.push_scan(vec![MockRadio::advert("AA:BB:CC", -42)]);

        let (status, report) = call(&app, Method::POST, "/api/monitoring/cycle", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["alerts"], 1);

        let (_, item) = call(&app, Method::GET, &format!("/api/items/{id}"), None).await;
        assert_eq!(item["proximity_status"], "nearby");
        assert_eq!(item["last_signal_strength"], -42);
    }

    #[tokio::test]
    async fn test_monitoring_start_and_stop() {
        let (app, _) = signed_in_app().await;

        let (status, started) = call(&app, Method::POST, "/api/monitoring", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(started["active"], true);

        let (_, stopped) = call(&app, Method::DELETE, "/api/monitoring", None).await;
        assert_eq!(stopped["active"], false);
        assert_eq!(stopped["scanning"], false);
    }

    #[tokio::test]
    async fn test_invalid_proximity_patch_is_rejected() {
        let (app, _) = app();
        let (status, body) = call(
            &app,
            Method::PATCH,
            "/api/config/proximity",
            Some(json!({ "near_threshold": -95 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "INVALID_CONFIG");

        let (status, body) = call(
            &app,
            Method::PATCH,
            "/api/config/proximity",
            Some(json!({ "near_threshold": -55 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["near_threshold"], -55);
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_scan_lists_peripherals() {
        let (app, radio) = app();
        radio.push_scan(vec![
            MockRadio::advert("AA:BB:CC", -50),
            MockRadio::advert("11:22:33", -70),
        ]);

        let (status, body) = call(&app, Method::GET, "/api/devices?duration_secs=2", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["devices"].as_array().unwrap().len(), 2);
        assert_eq!(body["scan_duration_secs"], 2);
    }

    #[tokio::test]
    async fn test_item_stream_sends_current_list() {
        let (app, _) = signed_in_app().await;
        call(
            &app,
            Method::POST,
            "/api/items",
            Some(json!({ "external_code": "bag:1001" })),
        )
        .await;

        let request = Request::builder()
            .uri("/api/items/stream")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "text/event-stream");

        let mut frames = response.into_body().into_data_stream();
        let first = tokio::time::timeout(Duration::from_secs(5), frames.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let text = String::from_utf8(first.to_vec()).unwrap();
        assert!(text.starts_with("event: items\n"), "{text}");
        let data = text
            .lines()
            .find_map(|line| line.strip_prefix("data: "))
            .unwrap();
        let list: Value = serde_json::from_str(data).unwrap();
        assert_eq!(list["count"], 1);
        assert_eq!(list["items"][0]["external_code"], "bag:1001");
    }

    #[tokio::test]
    async fn test_item_stream_requires_session() {
        let (app, _) = app();
        let (status, body) = call(&app, Method::GET, "/api/items/stream", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "AUTH_REQUIRED");
    }

    #[tokio::test]
    async fn test_openapi_is_served() {
        let (app, _) = app();
        let (status, body) = call(&app, Method::GET, "/api/openapi.json", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["info"]["title"], "bagwatch API");
    }
}
