//! Conversation history.

use std::sync::Arc;

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use parley_core::{IdentityError, IdentityId, IdentityStore};
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use super::ErrorResponse;
use crate::messages::{StoredMessage, DEFAULT_HISTORY_LIMIT};
use crate::server::AppState;

/// Create the messages router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/messages", get(history_handler))
        .with_state(state)
}

/// Query parameters for the history endpoint
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub user: String,
    pub peer: String,
    pub limit: Option<u32>,
}

/// History response body
#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub messages: Vec<StoredMessage>,
}

fn error(status: StatusCode, code: &str, message: &str) -> Response {
    (status, Json(ErrorResponse::new(code, message))).into_response()
}

async fn resolve(state: &AppState, username: &str) -> Result<IdentityId, Response> {
    state.users.resolve(username).await.map_err(|e| match e {
        IdentityError::NotFound(_) => error(StatusCode::NOT_FOUND, "user_not_found", &e.to_string()),
        other => {
            warn!(error = %other, "User lookup failed");
            error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                &other.to_string(),
            )
        }
    })
}

/// GET /api/v1/messages?user=a&peer=b&limit=n
///
/// Messages between two users, newest first.
#[instrument(skip_all)]
pub async fn history_handler(
    State(state): State<Arc<AppState>>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> Response {
    let Query(query) = match query {
        Ok(query) => query,
        Err(rejection) => {
            return error(
                StatusCode::BAD_REQUEST,
                "invalid_request",
                &rejection.body_text(),
            )
        }
    };

    let user = match resolve(&state, &query.user).await {
        Ok(id) => id,
        Err(response) => return response,
    };
    let peer = match resolve(&state, &query.peer).await {
        Ok(id) => id,
        Err(response) => return response,
    };

    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    match state.messages.conversation(user, peer, limit).await {
        Ok(messages) => (StatusCode::OK, Json(HistoryResponse { messages })).into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to load conversation");
            error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                &e.to_string(),
            )
        }
    }
}
