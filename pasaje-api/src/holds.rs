use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{delete, get, post},
    Json, Router,
};
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use std::convert::Infallible;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use pasaje_core::models::SeatHold;

use crate::{error::AppError, middleware::AuthActor, state::AppState};

#[derive(Debug, Deserialize)]
struct SeatHoldRequest {
    trip_id: Uuid,
    seat_id: String,
    #[serde(default)]
    ttl_seconds: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ExtendHoldRequest {
    ttl_seconds: u64,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/holds", post(create_seat_hold))
        .route("/v1/holds/{session_id}", delete(release_seat_hold))
        .route("/v1/holds/{session_id}/extend", post(extend_seat_hold))
        .route("/v1/trips/{trip_id}/seats/stream", get(seat_stream))
}

async fn create_seat_hold(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Json(req): Json<SeatHoldRequest>,
) -> Result<(StatusCode, Json<SeatHold>), AppError> {
    let hold = state
        .holds
        .acquire(req.trip_id, &req.seat_id, &actor.user_id, req.ttl_seconds)
        .await?;
    Ok((StatusCode::CREATED, Json(hold)))
}

async fn extend_seat_hold(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Path(session_id): Path<Uuid>,
    Json(req): Json<ExtendHoldRequest>,
) -> Result<Json<SeatHold>, AppError> {
    let hold = state.holds.extend_as(session_id, req.ttl_seconds, &actor).await?;
    Ok(Json(hold))
}

async fn release_seat_hold(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Path(session_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.holds.release_as(session_id, &actor).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Seat events for one trip, for kiosk screens.
async fn seat_stream(
    State(state): State<AppState>,
    Path(trip_id): Path<Uuid>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.seat_feed.subscribe();

    // Lagged receivers skip what they missed
    let stream = BroadcastStream::new(rx).filter_map(move |result| async move {
        let event = result.ok().filter(|e| e.trip_id() == trip_id)?;
        let data = serde_json::to_string(&event).ok()?;
        Some(Ok(Event::default().event(event.name()).data(data)))
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
