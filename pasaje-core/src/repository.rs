use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    CallbackAttempt, PaymentRecord, PaymentRecordStatus, SeatHold, SeatKey, SeatSlot, Ticket,
    TicketStatus,
};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("Backend error: {0}")]
    Backend(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, PartialEq)]
pub enum AcquireOutcome {
    Acquired(SeatHold),
    /// Someone else holds or owns the seat
    Occupied(SeatSlot),
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttachOutcome {
    Attached(SeatHold),
    /// Hold expired, released or never existed
    Missing,
    AlreadyAttached(Uuid),
}

#[derive(Debug, Clone)]
pub enum TransitionOutcome {
    Applied(Ticket),
    /// Current status was not in the allowed `from` set; carries the ticket as it is
    Rejected(Ticket),
    Missing,
}

#[derive(Debug, Clone)]
pub enum BindOutcome {
    Bound(Ticket),
    NotReserved(Ticket),
    /// The ticket's current order is not the one the caller meant to replace
    AlreadyBound(Ticket),
    /// Another ticket already carries this provider order
    RefTaken,
    Missing,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// The caller now owns the idempotency key
    Claimed(PaymentRecord),
    Existing(PaymentRecord),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Finalization {
    pub status: PaymentRecordStatus,
    pub ticket_ref: Option<Uuid>,
    pub failure_reason: Option<String>,
    pub processed_at: DateTime<Utc>,
}

/// The seat-occupancy namespace. Every method is one atomic conditional
/// write per `(trip_id, seat_id)`; expired holds count as vacant.
#[async_trait]
pub trait SeatInventory: Send + Sync {
    async fn try_hold(&self, hold: SeatHold, now: DateTime<Utc>) -> StoreResult<AcquireOutcome>;

    /// Live holds only.
    async fn get_hold(&self, session_id: Uuid, now: DateTime<Utc>) -> StoreResult<Option<SeatHold>>;

    /// Whatever currently occupies the seat, if anything.
    async fn slot(&self, key: &SeatKey, now: DateTime<Utc>) -> StoreResult<Option<SeatSlot>>;

    /// Moves the expiry of a live hold. `None` when the hold is not live.
    async fn extend_hold(
        &self,
        session_id: Uuid,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<SeatHold>>;

    /// Returns the hold that was released, `None` if there was nothing live.
    async fn release_hold(&self, session_id: Uuid, now: DateTime<Utc>) -> StoreResult<Option<SeatHold>>;

    async fn attach_ticket(
        &self,
        session_id: Uuid,
        ticket_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<AttachOutcome>;

    /// Held (live, same session, same ticket) -> Sold. `false` when any of
    /// those no longer holds.
    async fn consume_hold(
        &self,
        session_id: Uuid,
        ticket_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Frees the seat if, and only if, it still belongs to `ticket_id`.
    async fn vacate(&self, key: &SeatKey, ticket_id: Uuid) -> StoreResult<bool>;
}

#[async_trait]
pub trait TicketRepository: Send + Sync {
    async fn insert(&self, ticket: &Ticket) -> StoreResult<()>;

    async fn get(&self, id: Uuid) -> StoreResult<Option<Ticket>>;

    async fn find_by_payment_ref(
        &self,
        provider_name: &str,
        order_ref: &str,
    ) -> StoreResult<Option<Ticket>>;

    /// Sets the provider order on a ticket that is still `reserved` and
    /// whose current order ref is exactly `replacing` (`None`: unbound).
    async fn bind_payment_ref(
        &self,
        id: Uuid,
        provider_name: &str,
        order_ref: &str,
        replacing: Option<&str>,
    ) -> StoreResult<BindOutcome>;

    /// Compare-and-set on status.
    async fn transition(
        &self,
        id: Uuid,
        from: &[TicketStatus],
        to: TicketStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<TransitionOutcome>;

    async fn list_by_status(&self, status: TicketStatus) -> StoreResult<Vec<Ticket>>;
}

/// The payment-record namespace, keyed by `(provider_name, provider_order_ref)`.
#[async_trait]
pub trait PaymentRecordRepository: Send + Sync {
    /// Insert-if-absent on the idempotency key.
    async fn claim(&self, record: PaymentRecord) -> StoreResult<ClaimOutcome>;

    /// Re-claims a `pending` record whose claim predates `stale_before`.
    async fn take_over(
        &self,
        id: Uuid,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<PaymentRecord>>;

    /// `pending` -> final status, fenced on the caller's claim: `None` if the
    /// record is no longer pending or was taken over since `claimed_at`.
    async fn finalize(
        &self,
        id: Uuid,
        claimed_at: DateTime<Utc>,
        outcome: Finalization,
    ) -> StoreResult<Option<PaymentRecord>>;

    async fn find(&self, provider_name: &str, order_ref: &str) -> StoreResult<Option<PaymentRecord>>;

    async fn record_attempt(&self, attempt: &CallbackAttempt) -> StoreResult<()>;

    async fn attempts_for(
        &self,
        provider_name: &str,
        order_ref: &str,
    ) -> StoreResult<Vec<CallbackAttempt>>;
}
