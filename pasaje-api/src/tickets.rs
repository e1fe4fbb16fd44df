use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use uuid::Uuid;

use pasaje_ticket::{ReserveRequest, TicketView};

use crate::{
    error::AppError,
    middleware::{AuthActor, MaybeActor},
    state::AppState,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/tickets", post(reserve_ticket))
        .route("/v1/tickets/{id}", get(get_ticket))
        .route("/v1/tickets/{id}/cancel", post(cancel_ticket))
        .route("/v1/tickets/{id}/board", post(board_ticket))
}

/// POST /v1/tickets
/// Turns a live hold into a `reserved` ticket
async fn reserve_ticket(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Json(req): Json<ReserveRequest>,
) -> Result<(StatusCode, Json<TicketView>), AppError> {
    let ticket = state.lifecycle.reserve(req, &actor).await?;
    Ok((StatusCode::CREATED, Json(TicketView::for_viewer(&ticket, Some(&actor)))))
}

/// GET /v1/tickets/{id}
/// Owner and staff see passenger details, everyone else gets them redacted
async fn get_ticket(
    State(state): State<AppState>,
    MaybeActor(viewer): MaybeActor,
    Path(id): Path<Uuid>,
) -> Result<Json<TicketView>, AppError> {
    let view = state.lifecycle.get_ticket_by_id(id, viewer.as_ref()).await?;
    Ok(Json(view))
}

async fn cancel_ticket(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Path(id): Path<Uuid>,
) -> Result<Json<TicketView>, AppError> {
    let ticket = state.lifecycle.cancel_ticket(id, &actor).await?;
    Ok(Json(TicketView::for_viewer(&ticket, Some(&actor))))
}

async fn board_ticket(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Path(id): Path<Uuid>,
) -> Result<Json<TicketView>, AppError> {
    let ticket = state.lifecycle.board(id, &actor).await?;
    Ok(Json(TicketView::for_viewer(&ticket, Some(&actor))))
}
