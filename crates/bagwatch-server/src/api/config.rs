//! Configuration API endpoints.
//!
//! Proximity thresholds and timings can be changed at runtime; changes apply
//! to the next classification and are written back to the config file when
//! the server was started from one.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use bagwatch_core::{ProximityConfig, ProximityConfigPatch};

use crate::api::error::{ApiError, ApiResult, ErrorResponse};
use crate::state::SharedState;

/// Creates the config router with all endpoints.
pub fn router() -> Router<SharedState> {
    Router::new().route("/proximity", get(get_proximity).patch(update_proximity))
}

/// Get the proximity configuration.
#[utoipa::path(
    get,
    path = "/api/config/proximity",
    tag = "config",
    operation_id = "getProximityConfig",
    summary = "Get proximity thresholds and timings",
    responses(
        (status = 200, description = "Current configuration", body = ProximityConfig)
    )
)]
pub async fn get_proximity(State(state): State<SharedState>) -> Json<ProximityConfig> {
    Json(state.coordinator().proximity_config())
}

/// Update the proximity configuration.
#[utoipa::path(
    patch,
    path = "/api/config/proximity",
    tag = "config",
    operation_id = "updateProximityConfig",
    summary = "Update proximity thresholds and timings",
    description = "Fields left out keep their value. The near threshold must \
        not be below the far threshold and both timings must be positive.",
    request_body = ProximityConfigPatch,
    responses(
        (status = 200, description = "Configuration applied", body = ProximityConfig),
        (status = 400, description = "Invalid configuration", body = ErrorResponse),
        (status = 500, description = "Applied but not saved", body = ErrorResponse)
    )
)]
pub async fn update_proximity(
    State(state): State<SharedState>,
    Json(patch): Json<ProximityConfigPatch>,
) -> ApiResult<Json<ProximityConfig>> {
    // Held across apply and save so the file never lags the coordinator.
    let mut config = state.config_mut().await;
    let updated = state.coordinator().update_proximity_config(&patch)?;
    config.proximity = updated;
    if let Some(path) = state.config_path() {
        config.save(path).map_err(|e| ApiError::InternalError {
            error_code: "CONFIG_SAVE_FAILED".to_string(),
            message: "Configuration applied but could not be saved".to_string(),
            details: Some(e.to_string()),
        })?;
    }

    Ok(Json(updated))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use bagwatch_core::{AlertEmitter, Config, MemoryStore, MockRadio};
    use tower::ServiceExt;

    use super::*;
    use crate::state::AppState;

    #[test]
    fn test_patch_deserializes_partial_body() {
        let patch: ProximityConfigPatch =
            serde_json::from_str(r#"{"near_threshold": -55}"#).unwrap();
        assert_eq!(patch.near_threshold, Some(-55));
        assert!(patch.far_threshold.is_none());
    }

    #[tokio::test]
    async fn test_patch_is_saved_to_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let state = AppState::from_parts(
            Config::default(),
            Arc::new(MemoryStore::new()),
            Arc::new(MockRadio::new()),
            AlertEmitter::logging(),
        )
        .with_config_path(Some(path.clone()));
        let app = crate::api::create_router(Arc::new(state));

        let request = Request::builder()
            .method(Method::PATCH)
            .uri("/api/config/proximity")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"far_threshold": -85, "scan_interval_ms": 5000}"#))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let saved = tokio_test::assert_ok!(Config::load(Some(&path)));
        assert_eq!(saved.proximity.far_threshold, -85);
        assert_eq!(saved.proximity.scan_interval_ms, 5000);
        assert_eq!(saved.proximity.near_threshold, Config::default().proximity.near_threshold);
    }

    #[tokio::test]
    async fn test_concurrent_patches_leave_file_matching_coordinator() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let state = Arc::new(
            AppState::from_parts(
                Config::default(),
                Arc::new(MemoryStore::new()),
                Arc::new(MockRadio::new()),
                AlertEmitter::logging(),
            )
            .with_config_path(Some(path.clone())),
        );
        let app = crate::api::create_router(Arc::clone(&state));

        let patch = |body: &'static str| {
            Request::builder()
                .method(Method::PATCH)
                .uri("/api/config/proximity")
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap()
        };
        let (first, second) = tokio::join!(
            app.clone().oneshot(patch(r#"{"far_threshold": -85}"#)),
            app.clone().oneshot(patch(r#"{"far_threshold": -90}"#)),
        );
        assert_eq!(first.unwrap().status(), StatusCode::OK);
        assert_eq!(second.unwrap().status(), StatusCode::OK);

        let saved = tokio_test::assert_ok!(Config::load(Some(&path)));
        assert_eq!(saved.proximity, state.coordinator().proximity_config());
        assert_eq!(state.config_mut().await.proximity, saved.proximity);
    }
}
