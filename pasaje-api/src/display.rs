use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use pasaje_core::models::DisplaySession;

use crate::{error::AppError, state::AppState};

#[derive(Debug, Deserialize)]
struct DisplaySessionRequest {
    trip_id: Uuid,
    seat_id: String,
}

// Kiosk screens are unauthenticated; they only ever see seat and expiry.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/display-sessions", post(create_display_session))
        .route("/v1/display-sessions/{id}", get(get_display_session))
}

async fn create_display_session(
    State(state): State<AppState>,
    Json(req): Json<DisplaySessionRequest>,
) -> Result<(StatusCode, Json<DisplaySession>), AppError> {
    let session = state.display.create_display_session(req.trip_id, &req.seat_id).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

async fn get_display_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<DisplaySession>, AppError> {
    Ok(Json(state.display.get_session(id).await?))
}
