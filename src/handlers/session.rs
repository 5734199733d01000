use crate::{models::{ErrorResponse, SessionInfoResponse}, state::AppState};
use axum::{extract::{Path, State}, http::StatusCode, Json};
use std::sync::Arc;
use tracing::debug;

/// Look up a live session by id
pub async fn session_info(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionInfoResponse>, (StatusCode, Json<ErrorResponse>)> {

    // Read a snapshot; this never touches the write path
    match state.store.get_session(&session_id).await {
        Ok(session) => Ok(Json(SessionInfoResponse::from(&session))),
        Err(e) => {
            debug!("Session lookup for '{}' failed: {}", session_id, e);
            Err(ErrorResponse::reply(StatusCode::NOT_FOUND, e.to_string()))
        }
    }
}
