use axum::{extract::State, routing::post, Json, Router};
use serde::Serialize;
use uuid::Uuid;

use pasaje_core::identity::{Actor, Role};

use crate::{error::AppError, middleware::issue_token, state::AppState};

#[derive(Debug, Serialize)]
struct AuthResponse {
    token: String,
    user_id: String,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/auth/guest", post(login_guest))
}

async fn login_guest(State(state): State<AppState>) -> Result<Json<AuthResponse>, AppError> {
    let actor = Actor::new(format!("guest-{}", Uuid::new_v4()), Role::Guest);
    let token = issue_token(&state.auth, &actor)?;

    Ok(Json(AuthResponse {
        token,
        user_id: actor.user_id,
    }))
}
