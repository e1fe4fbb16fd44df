use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use pasaje_shared::Masked;

use crate::money;

/// Identifies one seat on one trip. The unit of seat exclusivity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SeatKey {
    pub trip_id: Uuid,
    pub seat_id: String,
}

impl SeatKey {
    pub fn new(trip_id: Uuid, seat_id: impl Into<String>) -> Self {
        Self {
            trip_id,
            seat_id: seat_id.into(),
        }
    }
}

impl std::fmt::Display for SeatKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.trip_id, self.seat_id)
    }
}

/// Short-lived exclusive claim on a seat while the buyer checks out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeatHold {
    pub session_id: Uuid,
    pub trip_id: Uuid,
    pub seat_id: String,
    pub holder_ref: String,
    /// Set once a ticket has been reserved against this hold.
    pub ticket_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SeatHold {
    pub fn new(
        trip_id: Uuid,
        seat_id: impl Into<String>,
        holder_ref: impl Into<String>,
        now: DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            trip_id,
            seat_id: seat_id.into(),
            holder_ref: holder_ref.into(),
            ticket_id: None,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn key(&self) -> SeatKey {
        SeatKey::new(self.trip_id, self.seat_id.clone())
    }

    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// What occupies a seat in the shared seat namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SeatSlot {
    Held(SeatHold),
    Sold { ticket_id: Uuid },
}

impl SeatSlot {
    /// An expired hold leaves the seat vacant.
    pub fn occupies(&self, now: DateTime<Utc>) -> bool {
        match self {
            SeatSlot::Held(hold) => hold.is_live(now),
            SeatSlot::Sold { .. } => true,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Reserved,
    Paid,
    Boarded,
    Cancelled,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Reserved => "reserved",
            TicketStatus::Paid => "paid",
            TicketStatus::Boarded => "boarded",
            TicketStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "reserved" => Some(TicketStatus::Reserved),
            "paid" => Some(TicketStatus::Paid),
            "boarded" => Some(TicketStatus::Boarded),
            "cancelled" => Some(TicketStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TicketStatus::Boarded | TicketStatus::Cancelled)
    }

    pub fn can_transition_to(&self, next: TicketStatus) -> bool {
        matches!(
            (self, next),
            (TicketStatus::Reserved, TicketStatus::Paid)
                | (TicketStatus::Reserved, TicketStatus::Cancelled)
                | (TicketStatus::Paid, TicketStatus::Boarded)
                | (TicketStatus::Paid, TicketStatus::Cancelled)
        )
    }
}

impl std::fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fare components. `total` is always `price + itbms` to the cent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fare {
    pub price_amount: Decimal,
    pub itbms_amount: Decimal,
}

impl Fare {
    pub fn new(price_amount: Decimal, itbms_amount: Decimal) -> Self {
        Self {
            price_amount: money::round2(price_amount),
            itbms_amount: money::round2(itbms_amount),
        }
    }

    pub fn with_rate(price_amount: Decimal, rate: Decimal) -> Self {
        Self::new(price_amount, money::itbms_for(price_amount, rate))
    }

    pub fn total(&self) -> Decimal {
        money::round2(self.price_amount + self.itbms_amount)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Passenger {
    pub passenger_ref: String,
    pub name: Masked<String>,
    pub document: Option<Masked<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: Uuid,
    pub trip_id: Uuid,
    pub seat_id: String,
    pub passenger_ref: String,
    pub passenger_name: Masked<String>,
    pub passenger_document: Option<Masked<String>>,
    pub status: TicketStatus,
    pub price_amount: Decimal,
    pub itbms_amount: Decimal,
    pub total_amount: Decimal,
    pub payment_provider: Option<String>,
    pub payment_ref: Option<String>,
    pub hold_session_id: Uuid,
    pub departure_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub boarded_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Ticket {
    pub fn reserve(
        hold: &SeatHold,
        passenger: Passenger,
        fare: Fare,
        departure_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            trip_id: hold.trip_id,
            seat_id: hold.seat_id.clone(),
            passenger_ref: passenger.passenger_ref,
            passenger_name: passenger.name,
            passenger_document: passenger.document,
            status: TicketStatus::Reserved,
            price_amount: fare.price_amount,
            itbms_amount: fare.itbms_amount,
            total_amount: fare.total(),
            payment_provider: None,
            payment_ref: None,
            hold_session_id: hold.session_id,
            departure_at,
            created_at: now,
            paid_at: None,
            boarded_at: None,
            cancelled_at: None,
        }
    }

    pub fn seat_key(&self) -> SeatKey {
        SeatKey::new(self.trip_id, self.seat_id.clone())
    }

    /// Applies a status change and stamps the matching timestamp.
    pub fn apply_status(&mut self, status: TicketStatus, at: DateTime<Utc>) {
        self.status = status;
        match status {
            TicketStatus::Paid => self.paid_at = Some(at),
            TicketStatus::Boarded => self.boarded_at = Some(at),
            TicketStatus::Cancelled => self.cancelled_at = Some(at),
            TicketStatus::Reserved => {}
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentRecordStatus {
    Pending,
    Confirmed,
    Failed,
    Duplicate,
}

impl PaymentRecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentRecordStatus::Pending => "pending",
            PaymentRecordStatus::Confirmed => "confirmed",
            PaymentRecordStatus::Failed => "failed",
            PaymentRecordStatus::Duplicate => "duplicate",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(PaymentRecordStatus::Pending),
            "confirmed" => Some(PaymentRecordStatus::Confirmed),
            "failed" => Some(PaymentRecordStatus::Failed),
            "duplicate" => Some(PaymentRecordStatus::Duplicate),
            _ => None,
        }
    }
}

/// Outcome of one gateway order. Unique per `(provider_name, provider_order_ref)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub id: Uuid,
    pub provider_name: String,
    pub provider_order_ref: String,
    pub ticket_ref: Option<Uuid>,
    pub amount: Decimal,
    pub status: PaymentRecordStatus,
    pub raw_callback_hash: String,
    pub failure_reason: Option<String>,
    pub claimed_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl PaymentRecord {
    pub fn pending(
        provider_name: &str,
        provider_order_ref: &str,
        amount: Decimal,
        raw_callback_hash: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            provider_name: provider_name.to_string(),
            provider_order_ref: provider_order_ref.to_string(),
            ticket_ref: None,
            amount,
            status: PaymentRecordStatus::Pending,
            raw_callback_hash,
            failure_reason: None,
            claimed_at: now,
            processed_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttemptDisposition {
    Applied,
    Duplicate,
    Rejected,
}

impl AttemptDisposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptDisposition::Applied => "applied",
            AttemptDisposition::Duplicate => "duplicate",
            AttemptDisposition::Rejected => "rejected",
        }
    }
}

/// One delivery of a gateway callback, kept for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackAttempt {
    pub id: Uuid,
    pub provider_name: String,
    pub provider_order_ref: Option<String>,
    pub raw_callback_hash: String,
    pub disposition: AttemptDisposition,
    pub received_at: DateTime<Utc>,
}

/// Kiosk-facing view of a live hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplaySession {
    pub session_id: Uuid,
    pub trip_id: Uuid,
    pub seat_id: String,
    pub expires_at: DateTime<Utc>,
}

impl From<&SeatHold> for DisplaySession {
    fn from(hold: &SeatHold) -> Self {
        Self {
            session_id: hold.session_id,
            trip_id: hold.trip_id,
            seat_id: hold.seat_id.clone(),
            expires_at: hold.expires_at,
        }
    }
}
