use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use pasaje_ticket::{CheckoutOrder, CheckoutRequest};

use crate::{error::AppError, middleware::AuthActor, state::AppState};

#[derive(Debug, Deserialize)]
struct CreateOrderBody {
    ticket_id: Uuid,
    #[serde(default)]
    order_id: Option<String>,
    description: String,
    callback_url: String,
    #[serde(default)]
    provider_opts: serde_json::Value,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/checkout/{provider}/orders", post(create_payment_order))
}

/// POST /v1/checkout/{provider}/orders
/// The amount charged is always the ticket's total
async fn create_payment_order(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Path(provider): Path<String>,
    Json(body): Json<CreateOrderBody>,
) -> Result<(StatusCode, Json<CheckoutOrder>), AppError> {
    let request = CheckoutRequest {
        order_id: body.order_id,
        description: body.description,
        callback_url: body.callback_url,
        provider_opts: body.provider_opts,
    };

    let order = state
        .checkout
        .create_payment_order(body.ticket_id, &provider, request, &actor)
        .await?;
    Ok((StatusCode::CREATED, Json(order)))
}
