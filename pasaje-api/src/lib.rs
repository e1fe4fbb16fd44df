use axum::{http::Method, routing::get, Json, Router};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod auth;
pub mod checkout;
pub mod display;
pub mod error;
pub mod holds;
pub mod middleware;
pub mod providers;
pub mod state;
pub mod tickets;
pub mod webhooks;
pub mod worker;

pub use error::AppError;
pub use state::{AppState, AuthConfig, Backends};

pub fn app(state: AppState) -> Router {
    // CORS Middleware
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            axum::http::header::USER_AGENT,
        ]);

    let router = Router::new()
        .route("/health", get(health))
        .merge(auth::routes())
        .merge(holds::routes())
        .merge(tickets::routes())
        .merge(checkout::routes())
        .merge(providers::routes())
        .merge(webhooks::routes())
        .merge(display::routes())
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let router = if state.redis.is_some() {
        router.layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::rate_limit_middleware,
        ))
    } else {
        router
    };

    router.with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
