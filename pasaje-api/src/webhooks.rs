use axum::{
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
    routing::post,
    Json, Router,
};
use serde::Serialize;

use pasaje_core::models::PaymentRecord;
use pasaje_core::payment::RawCallback;

use crate::{error::AppError, state::AppState};

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub success: bool,
    pub payment: PaymentRecord,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/webhooks/{provider}", post(handle_provider_webhook))
}

/// POST /v1/webhooks/{provider}
/// Gateway callbacks. The body is passed through untouched so the provider
/// can check its signature over the exact bytes.
async fn handle_provider_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, AppError> {
    let raw = headers
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v)))
        .fold(RawCallback::new(body.to_vec()), |raw, (name, value)| raw.with_header(name, value));

    tracing::info!(%provider, bytes = raw.body.len(), "Received payment callback");

    let payment = state
        .settlement
        .process_callback(&provider, &raw)
        .await
        .map_err(AppError::webhook)?;

    Ok(Json(WebhookResponse {
        success: true,
        payment,
    }))
}
