use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use pasaje_core::ReservationError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    AuthenticationError(String),
    #[error("{0}")]
    ValidationError(String),
    #[error(transparent)]
    Domain(#[from] ReservationError),
    /// Failure on a gateway callback route; always a 400.
    #[error("{0}")]
    Webhook(ReservationError),
    #[error("{0}")]
    InternalServerError(String),
}

impl AppError {
    pub fn webhook(err: ReservationError) -> Self {
        AppError::Webhook(err)
    }
}

fn domain_status(err: &ReservationError) -> StatusCode {
    match err {
        ReservationError::Conflict(_)
        | ReservationError::InvalidState { .. }
        | ReservationError::CancellationClosed { .. }
        | ReservationError::SeatNoLongerReserved(_)
        | ReservationError::AmountMismatch { .. } => StatusCode::CONFLICT,
        ReservationError::NotFound(_)
        | ReservationError::TicketNotFound(_)
        | ReservationError::UnknownProvider(_) => StatusCode::NOT_FOUND,
        ReservationError::Forbidden(_) => StatusCode::FORBIDDEN,
        ReservationError::InvalidSignature
        | ReservationError::InvalidAmount(_)
        | ReservationError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        ReservationError::ProviderUnavailable(_) | ReservationError::SessionExpired(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        ReservationError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Message safe to show a caller.
fn public_message(err: &ReservationError) -> String {
    match err {
        ReservationError::InvalidSignature => "invalid callback".to_string(),
        ReservationError::Storage(msg) => {
            tracing::error!("Storage failure: {}", msg);
            "Internal Server Error".to_string()
        }
        ReservationError::AmountMismatch { expected, received } => {
            tracing::error!(%expected, %received, "amount mismatch needs reconciliation");
            err.to_string()
        }
        other => other.to_string(),
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::AuthenticationError(msg) => {
                (StatusCode::UNAUTHORIZED, json!({ "error": msg, "code": "UNAUTHORIZED" }))
            }
            AppError::ValidationError(msg) => {
                (StatusCode::BAD_REQUEST, json!({ "error": msg, "code": "INVALID_REQUEST" }))
            }
            AppError::Domain(err) => (
                domain_status(&err),
                json!({ "error": public_message(&err), "code": err.code() }),
            ),
            AppError::Webhook(err) => {
                if err == ReservationError::InvalidSignature {
                    tracing::warn!("Discarding callback with invalid signature");
                }
                (
                    StatusCode::BAD_REQUEST,
                    json!({ "success": false, "error": public_message(&err) }),
                )
            }
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Internal Server Error", "code": "INTERNAL" }),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}
