use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

use pasaje_api::{app, middleware::issue_token, AppState, AuthConfig, Backends};
use pasaje_core::identity::{Actor, Role};
use pasaje_core::SystemClock;
use pasaje_store::app_config::{BusinessRules, CircuitBreakerConfig};
use pasaje_ticket::providers::{MockProvider, ProviderRegistry};

const MOCK_SECRET: &str = "integration-secret";

fn auth() -> AuthConfig {
    AuthConfig {
        secret: "integration-jwt".to_string(),
        expiration: 3600,
    }
}

fn router() -> Router {
    let rules = BusinessRules {
        seat_hold_seconds: 300,
        max_hold_seconds: 900,
        itbms_rate: "0.07".to_string(),
        cancellation_cutoff_minutes: 60,
        allow_passenger_refunds: false,
        decline_releases_seat: false,
        settlement_lease_seconds: 30,
        sweep_interval_seconds: 15,
    };
    let providers = ProviderRegistry::new().with(Arc::new(MockProvider::new(MOCK_SECRET)));

    let state = AppState::assemble(
        Backends::in_memory(Arc::new(SystemClock)),
        providers,
        &rules,
        &CircuitBreakerConfig::default(),
        auth(),
    )
    .unwrap();
    app(state)
}

fn token_for(user_id: &str, role: Role) -> String {
    issue_token(&auth(), &Actor::new(user_id, role)).unwrap()
}

async fn send(app: &Router, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(t) = token {
        builder = builder.header("authorization", format!("Bearer {}", t));
    }
    let body = body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty);

    let resp = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn post_callback(app: &Router, provider: &str, body: Vec<u8>) -> (StatusCode, Value) {
    let req = Request::builder()
        .method("POST")
        .uri(format!("/v1/webhooks/{}", provider))
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap();

    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

/// Holds a seat and reserves a ticket on it. Returns (hold session, ticket id).
async fn reserve(app: &Router, token: &str, trip_id: Uuid, seat_id: &str) -> (String, String) {
    let (status, hold) = send(
        app,
        "POST",
        "/v1/holds",
        Some(token),
        Some(json!({ "trip_id": trip_id, "seat_id": seat_id })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let session_id = hold["session_id"].as_str().unwrap().to_string();

    let (status, ticket) = send(
        app,
        "POST",
        "/v1/tickets",
        Some(token),
        Some(json!({
            "session_id": session_id,
            "passenger_name": "Ana Gomez",
            "passenger_document": "8-123-4567",
            "price_amount": "10.00",
            "departure_at": (Utc::now() + Duration::hours(6)).to_rfc3339(),
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(ticket["status"], "reserved");
    assert_eq!(ticket["total_amount"], "10.70");

    (session_id, ticket["id"].as_str().unwrap().to_string())
}

#[tokio::test]
async fn test_health() {
    let app = router();
    let (status, body) = send(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_guest_token_can_hold_a_seat() {
    let app = router();

    let (status, body) = send(&app, "POST", "/v1/auth/guest", None, None).await;
    assert_eq!(status, StatusCode::OK);
    let token = body["token"].as_str().unwrap().to_string();

    let (status, hold) = send(
        &app,
        "POST",
        "/v1/holds",
        Some(&token),
        Some(json!({ "trip_id": Uuid::new_v4(), "seat_id": "12", "ttl_seconds": 300 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(hold["holder_ref"], body["user_id"]);
}

#[tokio::test]
async fn test_hold_requires_auth_and_is_exclusive() {
    let app = router();
    let trip_id = Uuid::new_v4();
    let request = json!({ "trip_id": trip_id, "seat_id": "12" });

    let (status, _) = send(&app, "POST", "/v1/holds", None, Some(request.clone())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let a = token_for("user-a", Role::Customer);
    let b = token_for("user-b", Role::Customer);

    let (status, hold) = send(&app, "POST", "/v1/holds", Some(&a), Some(request.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    let session_id = hold["session_id"].as_str().unwrap().to_string();

    let (status, body) = send(&app, "POST", "/v1/holds", Some(&b), Some(request.clone())).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "CONFLICT");

    // Someone else's hold cannot be released
    let uri = format!("/v1/holds/{}", session_id);
    let (status, _) = send(&app, "DELETE", &uri, Some(&b), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(&app, "DELETE", &uri, Some(&a), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(&app, "DELETE", &uri, Some(&a), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(&app, "POST", "/v1/holds", Some(&b), Some(request)).await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_extend_released_hold_is_not_found() {
    let app = router();
    let token = token_for("user-a", Role::Customer);

    let (_, hold) = send(
        &app,
        "POST",
        "/v1/holds",
        Some(&token),
        Some(json!({ "trip_id": Uuid::new_v4(), "seat_id": "3" })),
    )
    .await;
    let session_id = hold["session_id"].as_str().unwrap();

    let extend = format!("/v1/holds/{}/extend", session_id);
    let (status, _) = send(&app, "POST", &extend, Some(&token), Some(json!({ "ttl_seconds": 600 }))).await;
    assert_eq!(status, StatusCode::OK);

    send(&app, "DELETE", &format!("/v1/holds/{}", session_id), Some(&token), None).await;
    let (status, _) = send(&app, "POST", &extend, Some(&token), Some(json!({ "ttl_seconds": 600 }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_checkout_and_settlement_flow() {
    let app = router();
    let token = token_for("user-a", Role::Customer);
    let (_, ticket_id) = reserve(&app, &token, Uuid::new_v4(), "12").await;

    let (status, order) = send(
        &app,
        "POST",
        "/v1/checkout/mock/orders",
        Some(&token),
        Some(json!({
            "ticket_id": ticket_id,
            "order_id": "X123",
            "description": "Panama - David, seat 12",
            "callback_url": "http://localhost:8080/v1/webhooks/mock",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(order["provider_order_ref"], "mock_X123");
    assert_eq!(order["status"], "created");

    let mock = MockProvider::new(MOCK_SECRET);
    let body = mock.callback_body("mock_X123", Decimal::from_str("10.70").unwrap(), "succeeded");

    let (status, first) = post_callback(&app, "mock", body.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["success"], true);
    assert_eq!(first["payment"]["status"], "confirmed");

    // Replays return the same record
    let (status, second) = post_callback(&app, "mock", body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["payment"]["id"], first["payment"]["id"]);

    let (status, view) = send(&app, "GET", &format!("/v1/tickets/{}", ticket_id), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["status"], "paid");
    assert_eq!(view["redacted"], true);
    assert_eq!(view["passenger_name"], "A*** G***");

    let (_, own) = send(&app, "GET", &format!("/v1/tickets/{}", ticket_id), Some(&token), None).await;
    assert_eq!(own["passenger_name"], "Ana Gomez");
}

#[tokio::test]
async fn test_amount_mismatch_leaves_ticket_reserved() {
    let app = router();
    let token = token_for("user-a", Role::Customer);
    let (_, ticket_id) = reserve(&app, &token, Uuid::new_v4(), "7").await;

    let (status, _) = send(
        &app,
        "POST",
        "/v1/checkout/mock/orders",
        Some(&token),
        Some(json!({
            "ticket_id": ticket_id,
            "order_id": "M-1",
            "description": "seat 7",
            "callback_url": "http://localhost:8080/v1/webhooks/mock",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let body = MockProvider::new(MOCK_SECRET).callback_body("mock_M-1", Decimal::from_str("9.99").unwrap(), "succeeded");
    let (status, resp) = post_callback(&app, "mock", body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(resp["success"], false);
    assert!(resp["error"].as_str().unwrap().starts_with("Amount mismatch"));
    assert!(resp.get("code").is_none());

    let (_, view) = send(&app, "GET", &format!("/v1/tickets/{}", ticket_id), Some(&token), None).await;
    assert_eq!(view["status"], "reserved");
}

#[tokio::test]
async fn test_forged_callback_is_rejected() {
    let app = router();

    let body = MockProvider::new("guessed").callback_body("mock_X1", Decimal::ONE, "succeeded");
    let (status, resp) = post_callback(&app, "mock", body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(resp["success"], false);
    assert_eq!(resp, json!({ "success": false, "error": "invalid callback" }));

    let (status, resp) = post_callback(&app, "paypal", b"{}".to_vec()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(resp["success"], false);
    assert!(resp.get("code").is_none());
}

#[tokio::test]
async fn test_cancel_and_board_rights() {
    let app = router();
    let owner = token_for("user-a", Role::Customer);
    let stranger = token_for("user-b", Role::Customer);
    let agent = token_for("agent-1", Role::Agent);
    let (_, ticket_id) = reserve(&app, &owner, Uuid::new_v4(), "20").await;

    let cancel = format!("/v1/tickets/{}/cancel", ticket_id);
    let (status, _) = send(&app, "POST", &cancel, Some(&stranger), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Boarding needs a paid ticket, and staff
    let board = format!("/v1/tickets/{}/board", ticket_id);
    let (status, _) = send(&app, "POST", &board, Some(&owner), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, body) = send(&app, "POST", &board, Some(&agent), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "INVALID_STATE");

    let (status, cancelled) = send(&app, "POST", &cancel, Some(&owner), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["status"], "cancelled");

    let (status, _) = send(&app, "POST", &cancel, Some(&owner), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_display_session_follows_hold() {
    let app = router();
    let token = token_for("user-a", Role::Customer);
    let trip_id = Uuid::new_v4();

    let request = json!({ "trip_id": trip_id, "seat_id": "9" });
    let (status, _) = send(&app, "POST", "/v1/display-sessions", None, Some(request.clone())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, hold) = send(&app, "POST", "/v1/holds", Some(&token), Some(request.clone())).await;
    let (status, session) = send(&app, "POST", "/v1/display-sessions", None, Some(request)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(session["session_id"], hold["session_id"]);

    let uri = format!("/v1/display-sessions/{}", hold["session_id"].as_str().unwrap());
    let (status, _) = send(&app, "GET", &uri, None, None).await;
    assert_eq!(status, StatusCode::OK);

    send(
        &app,
        "DELETE",
        &format!("/v1/holds/{}", hold["session_id"].as_str().unwrap()),
        Some(&token),
        None,
    )
    .await;
    let (status, _) = send(&app, "GET", &uri, None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_mock_provider_has_no_session() {
    let app = router();
    let token = token_for("user-a", Role::Customer);

    let (status, body) = send(&app, "GET", "/v1/providers/mock/session", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "not_required");

    let (status, body) = send(&app, "POST", "/v1/providers/mock/session/open", Some(&token), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_REQUEST");

    let (_, names) = send(&app, "GET", "/v1/providers", None, None).await;
    assert_eq!(names, json!(["mock"]));
}
