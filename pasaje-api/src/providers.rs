use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};

use pasaje_core::payment::{MerchantValidation, ProviderSession, SessionStatus};
use pasaje_core::ReservationError;

use crate::{error::AppError, middleware::AuthActor, state::AppState};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/providers", get(list_providers))
        .route("/v1/providers/{provider}/session", get(session_status))
        .route("/v1/providers/{provider}/session/open", post(open_session))
        .route("/v1/providers/{provider}/session/close", post(close_session))
        .route("/v1/providers/{provider}/merchant/validate", post(validate_merchant))
}

async fn list_providers(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.providers.names())
}

async fn session_status(
    State(state): State<AppState>,
    Path(provider): Path<String>,
) -> Result<Json<SessionStatus>, AppError> {
    let provider = state.providers.get(&provider)?;
    Ok(Json(provider.session_status()))
}

async fn open_session(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Path(provider): Path<String>,
) -> Result<Json<ProviderSession>, AppError> {
    let provider = state.providers.get(&provider)?;
    let session = provider.open_session().await?;
    tracing::info!(provider = provider.name(), by = %actor.user_id, "provider session opened");
    Ok(Json(session))
}

/// Staff only: closing a session blocks every buyer's checkout on it.
async fn close_session(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Path(provider): Path<String>,
) -> Result<StatusCode, AppError> {
    if !actor.is_staff() {
        return Err(ReservationError::Forbidden("closing a provider session requires staff".to_string()).into());
    }
    let provider = state.providers.get(&provider)?;
    provider.close_session().await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn validate_merchant(
    State(state): State<AppState>,
    AuthActor(_actor): AuthActor,
    Path(provider): Path<String>,
) -> Result<Json<MerchantValidation>, AppError> {
    let provider = state.providers.get(&provider)?;
    Ok(Json(provider.validate_merchant().await?))
}
