//! Session handlers

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::AppState;
use folio_common::errors::{AppError, Result};

/// Stop response
#[derive(Serialize)]
pub struct StopResponse {
    pub session_id: Uuid,
    /// Whether a generation was running and has been cancelled
    pub stopped: bool,
}

/// Stop the generation in flight for a session
pub async fn stop_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<StopResponse>> {
    let session = state
        .sessions
        .read()
        .await
        .get(&session_id)
        .cloned()
        .ok_or_else(|| AppError::SessionNotFound {
            id: session_id.to_string(),
        })?;

    let stopped = session.stop();

    tracing::info!(session_id = %session_id, stopped, "Stop requested");

    Ok(Json(StopResponse { session_id, stopped }))
}
