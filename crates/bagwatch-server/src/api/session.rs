//! Session API endpoints.
//!
//! The server keeps one local session. Clients sign in anonymously (a fresh
//! owner id is minted) or resume with an owner id they stored earlier.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use bagwatch_core::{AuthProvider, OwnerId};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::error::ApiResult;
use crate::state::SharedState;

/// Creates the session router.
pub fn router() -> Router<SharedState> {
    Router::new().route("/", get(get_session).post(sign_in).delete(sign_out))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Current session.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "signed_in": true,
    "owner_id": "4f1c2a9e8d7b4c3a9f0e1d2c3b4a5968"
}))]
pub struct SessionResponse {
    /// Whether an owner is signed in.
    pub signed_in: bool,

    /// The signed-in owner.
    pub owner_id: Option<OwnerId>,
}

impl From<Option<OwnerId>> for SessionResponse {
    fn from(owner_id: Option<OwnerId>) -> Self {
        Self {
            signed_in: owner_id.is_some(),
            owner_id,
        }
    }
}

/// Sign-in request. An empty body signs in anonymously.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct SignInRequest {
    /// Resume as this owner instead of minting a new one.
    #[schema(example = "4f1c2a9e8d7b4c3a9f0e1d2c3b4a5968")]
    pub owner_id: Option<String>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Get the current session.
#[utoipa::path(
    get,
    path = "/api/session",
    tag = "session",
    operation_id = "getSession",
    summary = "Get the current session",
    responses(
        (status = 200, description = "Session state", body = SessionResponse)
    )
)]
pub async fn get_session(State(state): State<SharedState>) -> Json<SessionResponse> {
    Json(state.auth().current_owner().await.into())
}

/// Sign in.
///
/// Without an owner id the cached anonymous owner is reused, or a new one is
/// created. A running monitoring loop follows the new owner.
#[utoipa::path(
    post,
    path = "/api/session",
    tag = "session",
    operation_id = "signIn",
    summary = "Sign in anonymously or resume an owner",
    request_body = SignInRequest,
    responses(
        (status = 200, description = "Signed in", body = SessionResponse),
        (status = 400, description = "Malformed owner id", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn sign_in(
    State(state): State<SharedState>,
    Json(request): Json<SignInRequest>,
) -> ApiResult<Json<SessionResponse>> {
    let owner = match request.owner_id.as_deref() {
        Some(owner_id) => state.auth().sign_in(owner_id)?,
        None => state.auth().sign_in_anonymously(),
    };
    tracing::info!(owner_id = %owner, "signed in");

    let coordinator = state.coordinator();
    if coordinator.is_monitoring() {
        coordinator.start_proximity_monitoring().await?;
    }

    Ok(Json(Some(owner).into()))
}

/// Sign out. Stops monitoring first.
#[utoipa::path(
    delete,
    path = "/api/session",
    tag = "session",
    operation_id = "signOut",
    summary = "Sign out",
    responses(
        (status = 204, description = "Signed out")
    )
)]
pub async fn sign_out(State(state): State<SharedState>) -> StatusCode {
    state.coordinator().stop_all_monitoring().await;
    state.auth().sign_out();
    tracing::info!("signed out");
    StatusCode::NO_CONTENT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_body_means_anonymous() {
        let request: SignInRequest = serde_json::from_str("{}").unwrap();
        assert!(request.owner_id.is_none());
    }

    #[test]
    fn test_session_response_from_owner() {
        let response = SessionResponse::from(Some(OwnerId::new("alice")));
        assert!(response.signed_in);
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"owner_id\":\"alice\""));
    }
}
