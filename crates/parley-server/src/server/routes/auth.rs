//! Registration and sign-in over HTTP.
//!
//! Both endpoints use the same identity store as the session handshake.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use parley_core::protocol::SUCCESS_REGISTERED;
use parley_core::{metrics, IdentityError, IdentityId, IdentityStore, Profile};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use super::ErrorResponse;
use crate::server::AppState;

/// Create the auth router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/register", post(register_handler))
        .route("/sign-in", post(sign_in_handler))
        .with_state(state)
}

/// Request body for sign-in
#[derive(Debug, Deserialize)]
pub struct SignInRequest {
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// Successful register / sign-in response
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResponse {
    pub message: String,
    #[serde(rename = "userID")]
    pub user_id: IdentityId,
}

/// Convert IdentityError to HTTP response
fn identity_error_to_response(err: IdentityError) -> (StatusCode, Json<ErrorResponse>) {
    let (status, error_code) = match &err {
        IdentityError::AuthenticationFailed => (StatusCode::UNAUTHORIZED, "invalid_credentials"),
        IdentityError::DuplicateUsername(_) => (StatusCode::CONFLICT, "username_taken"),
        IdentityError::InvalidUsername(_) => (StatusCode::BAD_REQUEST, "invalid_username"),
        IdentityError::NotFound(_) => (StatusCode::NOT_FOUND, "user_not_found"),
        IdentityError::Backend(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
    };

    (status, Json(ErrorResponse::new(error_code, &err.to_string())))
}

fn rejection_to_response(rejection: JsonRejection) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse::new("invalid_request", &rejection.body_text())),
    )
        .into_response()
}

/// POST /register
///
/// Create an identity from `{ name?, username, password, deviceID? }`.
#[instrument(skip_all)]
pub async fn register_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<Profile>, JsonRejection>,
) -> Response {
    let Json(profile) = match body {
        Ok(body) => body,
        Err(rejection) => return rejection_to_response(rejection),
    };

    match state.users.register(&profile).await {
        Ok(user_id) => {
            metrics::record_auth_attempt("http_register", true);
            info!(username = %profile.username, user_id = %user_id, "User registered");
            (
                StatusCode::OK,
                Json(AuthResponse {
                    message: SUCCESS_REGISTERED.to_string(),
                    user_id,
                }),
            )
                .into_response()
        }
        Err(e) => {
            metrics::record_auth_attempt("http_register", false);
            warn!(username = %profile.username, error = %e, "Registration failed");
            identity_error_to_response(e).into_response()
        }
    }
}

/// POST /sign-in
///
/// Verify `{ username, password }`.
#[instrument(skip_all)]
pub async fn sign_in_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<SignInRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => return rejection_to_response(rejection),
    };

    match state.users.verify(&request.username, &request.password).await {
        Ok(user_id) => {
            metrics::record_auth_attempt("http_sign_in", true);
            info!(username = %request.username, "User signed in");
            (
                StatusCode::OK,
                Json(AuthResponse {
                    message: "User login successfully!".to_string(),
                    user_id,
                }),
            )
                .into_response()
        }
        Err(e) => {
            metrics::record_auth_attempt("http_sign_in", false);
            warn!(username = %request.username, error = %e, "Sign-in failed");
            identity_error_to_response(e).into_response()
        }
    }
}
