pub mod clock;
pub mod events;
pub mod identity;
pub mod models;
pub mod money;
pub mod payment;
pub mod repository;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

pub use clock::{Clock, ManualClock, SystemClock};
pub use repository::StoreError;

/// Failures of the reservation and settlement core.
///
/// `Conflict`, `NotFound`, `Forbidden` and the state errors are expected,
/// user-facing outcomes. Provider faults are transient. `AmountMismatch`
/// needs manual reconciliation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReservationError {
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Callback signature is invalid")]
    InvalidSignature,
    #[error("Invalid state transition from {from} to {to}")]
    InvalidState { from: String, to: String },
    #[error("Cancellation window closed: departure at {departure_at}")]
    CancellationClosed { departure_at: DateTime<Utc> },
    #[error("Amount mismatch: expected {expected}, received {received}")]
    AmountMismatch { expected: Decimal, received: Decimal },
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Payment provider unavailable: {0}")]
    ProviderUnavailable(String),
    #[error("Payment provider session expired: {0}")]
    SessionExpired(String),
    #[error("Unknown payment provider: {0}")]
    UnknownProvider(String),
    #[error("No ticket is bound to provider order {0}")]
    TicketNotFound(String),
    #[error("Seat is no longer reserved for ticket {0}")]
    SeatNoLongerReserved(Uuid),
    #[error("Storage error: {0}")]
    Storage(String),
}

impl ReservationError {
    /// Transient upstream faults; callers may retry with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ReservationError::ProviderUnavailable(_) | ReservationError::SessionExpired(_)
        )
    }

    pub fn code(&self) -> &'static str {
        match self {
            ReservationError::Conflict(_) => "CONFLICT",
            ReservationError::NotFound(_) => "NOT_FOUND",
            ReservationError::Forbidden(_) => "FORBIDDEN",
            ReservationError::InvalidSignature => "INVALID_SIGNATURE",
            ReservationError::InvalidState { .. } => "INVALID_STATE",
            ReservationError::CancellationClosed { .. } => "CANCELLATION_CLOSED",
            ReservationError::AmountMismatch { .. } => "AMOUNT_MISMATCH",
            ReservationError::InvalidAmount(_) => "INVALID_AMOUNT",
            ReservationError::InvalidRequest(_) => "INVALID_REQUEST",
            ReservationError::ProviderUnavailable(_) => "PROVIDER_UNAVAILABLE",
            ReservationError::SessionExpired(_) => "SESSION_EXPIRED",
            ReservationError::UnknownProvider(_) => "UNKNOWN_PROVIDER",
            ReservationError::TicketNotFound(_) => "TICKET_NOT_FOUND",
            ReservationError::SeatNoLongerReserved(_) => "SEAT_NO_LONGER_RESERVED",
            ReservationError::Storage(_) => "STORAGE",
        }
    }
}

impl From<StoreError> for ReservationError {
    fn from(err: StoreError) -> Self {
        ReservationError::Storage(err.to_string())
    }
}

pub type CoreResult<T> = Result<T, ReservationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors() {
        assert!(ReservationError::ProviderUnavailable("timeout".into()).is_transient());
        assert!(ReservationError::SessionExpired("wallet".into()).is_transient());
        assert!(!ReservationError::InvalidSignature.is_transient());
        assert!(!ReservationError::Conflict("seat".into()).is_transient());
    }

    #[test]
    fn test_store_error_becomes_storage() {
        let err: ReservationError = StoreError::Backend("connection reset".into()).into();
        assert_eq!(err.code(), "STORAGE");
    }
}
