use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use pasaje_core::events::EventPublisher;
use pasaje_core::identity::Actor;
use pasaje_core::models::{Fare, Passenger, SeatSlot, Ticket, TicketStatus};
use pasaje_core::repository::{AttachOutcome, SeatInventory, TicketRepository, TransitionOutcome};
use pasaje_core::{money, Clock, CoreResult, ReservationError};
use pasaje_shared::models::events::{SeatEvent, TicketEvent};
use pasaje_shared::pii::{redact_document, redact_name};
use pasaje_shared::Masked;

#[derive(Debug, Clone, Copy)]
pub struct CancellationPolicy {
    /// Paid tickets may be cancelled only this long before departure
    pub cutoff: Duration,
    /// Passengers (not only staff) may cancel paid tickets
    pub allow_passenger_refunds: bool,
}

/// What the buyer submits to turn a hold into a ticket.
#[derive(Debug, Clone, Deserialize)]
pub struct ReserveRequest {
    pub session_id: Uuid,
    pub passenger_name: String,
    #[serde(default)]
    pub passenger_document: Option<String>,
    pub price_amount: Decimal,
    /// Computed from the configured ITBMS rate when absent
    #[serde(default)]
    pub itbms_amount: Option<Decimal>,
    pub departure_at: DateTime<Utc>,
}

/// Ticket as shown to a particular viewer.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TicketView {
    pub id: Uuid,
    pub trip_id: Uuid,
    pub seat_id: String,
    pub status: TicketStatus,
    pub passenger_name: String,
    pub passenger_document: Option<String>,
    pub price_amount: String,
    pub itbms_amount: String,
    pub total_amount: String,
    pub payment_provider: Option<String>,
    pub departure_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub boarded_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub redacted: bool,
}

impl TicketView {
    pub fn for_viewer(ticket: &Ticket, viewer: Option<&Actor>) -> Self {
        let full = viewer.map(|a| a.may_manage(&ticket.passenger_ref)).unwrap_or(false);
        let name = ticket.passenger_name.expose();
        let document = ticket.passenger_document.as_ref().map(|d| d.expose());

        Self {
            id: ticket.id,
            trip_id: ticket.trip_id,
            seat_id: ticket.seat_id.clone(),
            status: ticket.status,
            passenger_name: if full { name.clone() } else { redact_name(name) },
            passenger_document: document.map(|d| if full { d.clone() } else { redact_document(d) }),
            price_amount: money::to_wire(ticket.price_amount),
            itbms_amount: money::to_wire(ticket.itbms_amount),
            total_amount: money::to_wire(ticket.total_amount),
            payment_provider: ticket.payment_provider.clone(),
            departure_at: ticket.departure_at,
            created_at: ticket.created_at,
            paid_at: ticket.paid_at,
            boarded_at: ticket.boarded_at,
            cancelled_at: ticket.cancelled_at,
            redacted: !full,
        }
    }
}

/// Ticket state machine. Every transition is a compare-and-set on the stored
/// status, and every seat effect goes through the seat inventory's
/// conditional writes.
pub struct TicketLifecycle {
    tickets: Arc<dyn TicketRepository>,
    inventory: Arc<dyn SeatInventory>,
    events: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
    itbms_rate: Decimal,
    policy: CancellationPolicy,
}

impl TicketLifecycle {
    pub fn new(
        tickets: Arc<dyn TicketRepository>,
        inventory: Arc<dyn SeatInventory>,
        events: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
        itbms_rate: Decimal,
        policy: CancellationPolicy,
    ) -> Self {
        Self {
            tickets,
            inventory,
            events,
            clock,
            itbms_rate,
            policy,
        }
    }

    pub async fn reserve(&self, request: ReserveRequest, actor: &Actor) -> CoreResult<Ticket> {
        let now = self.clock.now();

        let hold = self
            .inventory
            .get_hold(request.session_id, now)
            .await?
            .ok_or_else(|| ReservationError::NotFound(format!("hold {}", request.session_id)))?;

        if !actor.may_manage(&hold.holder_ref) {
            return Err(ReservationError::Forbidden("hold belongs to another buyer".to_string()));
        }
        if let Some(existing) = hold.ticket_id {
            return Err(ReservationError::Conflict(format!(
                "hold {} already reserved ticket {}",
                hold.session_id, existing
            )));
        }

        let name = request.passenger_name.trim();
        if name.is_empty() {
            return Err(ReservationError::InvalidRequest("passenger_name is required".to_string()));
        }
        if request.departure_at <= now {
            return Err(ReservationError::InvalidRequest("departure_at is in the past".to_string()));
        }

        let price = money::validate_amount(request.price_amount)?;
        let fare = match request.itbms_amount {
            Some(itbms) if itbms < Decimal::ZERO => {
                return Err(ReservationError::InvalidAmount(format!("negative itbms {}", itbms)));
            }
            Some(itbms) => Fare::new(price, money::round2(itbms)),
            None => Fare::with_rate(price, self.itbms_rate),
        };

        let passenger = Passenger {
            passenger_ref: hold.holder_ref.clone(),
            name: Masked::new(name.to_string()),
            document: request
                .passenger_document
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty())
                .map(Masked::new),
        };

        let ticket = Ticket::reserve(&hold, passenger, fare, request.departure_at, now);
        self.tickets.insert(&ticket).await?;

        match self.inventory.attach_ticket(hold.session_id, ticket.id, now).await? {
            AttachOutcome::Attached(_) => {
                info!(
                    ticket_id = %ticket.id,
                    session_id = %hold.session_id,
                    total = %ticket.total_amount,
                    "ticket reserved"
                );
                Ok(ticket)
            }
            outcome => {
                // Lost the hold between the read and the attach
                self.tickets
                    .transition(ticket.id, &[TicketStatus::Reserved], TicketStatus::Cancelled, now)
                    .await?;
                match outcome {
                    AttachOutcome::AlreadyAttached(existing) => Err(ReservationError::Conflict(format!(
                        "hold {} already reserved ticket {}",
                        hold.session_id, existing
                    ))),
                    _ => Err(ReservationError::NotFound(format!("hold {}", hold.session_id))),
                }
            }
        }
    }

    pub async fn cancel_ticket(&self, ticket_id: Uuid, actor: &Actor) -> CoreResult<Ticket> {
        let now = self.clock.now();
        let ticket = self.load(ticket_id).await?;

        if !actor.may_manage(&ticket.passenger_ref) {
            return Err(ReservationError::Forbidden("ticket belongs to another passenger".to_string()));
        }

        match ticket.status {
            TicketStatus::Boarded | TicketStatus::Cancelled => {
                return Err(invalid_state(ticket.status, TicketStatus::Cancelled));
            }
            TicketStatus::Paid => {
                if !actor.is_staff() && !self.policy.allow_passenger_refunds {
                    return Err(ReservationError::Forbidden(
                        "paid tickets are cancelled at the ticket office".to_string(),
                    ));
                }
                if ticket.departure_at - now <= self.policy.cutoff {
                    return Err(ReservationError::CancellationClosed {
                        departure_at: ticket.departure_at,
                    });
                }
            }
            TicketStatus::Reserved => {}
        }

        let was_paid = ticket.status == TicketStatus::Paid;
        match self
            .tickets
            .transition(ticket_id, &[ticket.status], TicketStatus::Cancelled, now)
            .await?
        {
            TransitionOutcome::Applied(cancelled) => {
                info!(%ticket_id, by = %actor.user_id, was_paid, "ticket cancelled");
                self.free_seat(&cancelled).await?;
                self.events
                    .publish_ticket(&TicketEvent::Cancelled {
                        ticket_id,
                        trip_id: cancelled.trip_id,
                        seat_id: cancelled.seat_id.clone(),
                        was_paid,
                        cancelled_at: now.timestamp(),
                    })
                    .await;
                Ok(cancelled)
            }
            TransitionOutcome::Rejected(current) => Err(invalid_state(current.status, TicketStatus::Cancelled)),
            TransitionOutcome::Missing => Err(ReservationError::NotFound(format!("ticket {}", ticket_id))),
        }
    }

    /// Boarding scan. Staff only.
    pub async fn board(&self, ticket_id: Uuid, actor: &Actor) -> CoreResult<Ticket> {
        if !actor.is_staff() {
            return Err(ReservationError::Forbidden("boarding requires staff".to_string()));
        }

        let now = self.clock.now();
        match self
            .tickets
            .transition(ticket_id, &[TicketStatus::Paid], TicketStatus::Boarded, now)
            .await?
        {
            TransitionOutcome::Applied(boarded) => {
                info!(%ticket_id, by = %actor.user_id, "passenger boarded");
                self.events
                    .publish_ticket(&TicketEvent::Boarded {
                        ticket_id,
                        trip_id: boarded.trip_id,
                        seat_id: boarded.seat_id.clone(),
                        boarded_at: now.timestamp(),
                    })
                    .await;
                Ok(boarded)
            }
            TransitionOutcome::Rejected(current) => Err(invalid_state(current.status, TicketStatus::Boarded)),
            TransitionOutcome::Missing => Err(ReservationError::NotFound(format!("ticket {}", ticket_id))),
        }
    }

    /// Read-only. Anyone holding the ID may look; PII is redacted unless the
    /// viewer owns the ticket or is staff.
    pub async fn get_ticket_by_id(&self, ticket_id: Uuid, viewer: Option<&Actor>) -> CoreResult<TicketView> {
        let ticket = self.load(ticket_id).await?;
        Ok(TicketView::for_viewer(&ticket, viewer))
    }

    pub async fn get(&self, ticket_id: Uuid) -> CoreResult<Ticket> {
        self.load(ticket_id).await
    }

    /// Cancels `reserved` tickets whose hold is gone. Returns how many.
    pub async fn expire_stale(&self) -> CoreResult<usize> {
        let now = self.clock.now();
        let mut expired = 0;

        for ticket in self.tickets.list_by_status(TicketStatus::Reserved).await? {
            let slot = self.inventory.slot(&ticket.seat_key(), now).await?;
            let still_held = match slot {
                Some(SeatSlot::Held(hold)) => {
                    hold.session_id == ticket.hold_session_id || hold.ticket_id == Some(ticket.id)
                }
                // Mid-settlement: the seat is already sold to this ticket
                Some(SeatSlot::Sold { ticket_id }) => ticket_id == ticket.id,
                None => false,
            };
            if still_held {
                continue;
            }

            if self.expire_reservation(&ticket).await? {
                expired += 1;
            }
        }

        if expired > 0 {
            info!(expired, "expired stale reservations");
        }
        Ok(expired)
    }

    /// `reserved -> cancelled` without an actor: hold expiry, declined
    /// payment, or a settlement that lost its seat. `false` if the ticket had
    /// already moved on.
    pub async fn expire_reservation(&self, ticket: &Ticket) -> CoreResult<bool> {
        let now = self.clock.now();
        match self
            .tickets
            .transition(ticket.id, &[TicketStatus::Reserved], TicketStatus::Cancelled, now)
            .await?
        {
            TransitionOutcome::Applied(cancelled) => {
                debug!(ticket_id = %ticket.id, "reservation expired");
                self.free_seat(&cancelled).await?;
                self.events
                    .publish_ticket(&TicketEvent::Cancelled {
                        ticket_id: cancelled.id,
                        trip_id: cancelled.trip_id,
                        seat_id: cancelled.seat_id.clone(),
                        was_paid: false,
                        cancelled_at: now.timestamp(),
                    })
                    .await;
                Ok(true)
            }
            TransitionOutcome::Rejected(_) | TransitionOutcome::Missing => Ok(false),
        }
    }

    /// Converts the ticket's hold into a sale and marks the ticket paid.
    ///
    /// The hold must still be live and carry this ticket; otherwise the
    /// reservation is cancelled and `SeatNoLongerReserved` returned.
    pub async fn settle(&self, ticket: &Ticket) -> CoreResult<Ticket> {
        let now = self.clock.now();

        if ticket.status != TicketStatus::Reserved {
            return Err(ReservationError::SeatNoLongerReserved(ticket.id));
        }

        if !self
            .inventory
            .consume_hold(ticket.hold_session_id, ticket.id, now)
            .await?
            && !self.already_sold_to(ticket, now).await?
        {
            warn!(ticket_id = %ticket.id, "hold lapsed before payment settled");
            self.expire_reservation(ticket).await?;
            return Err(ReservationError::SeatNoLongerReserved(ticket.id));
        }

        match self
            .tickets
            .transition(ticket.id, &[TicketStatus::Reserved], TicketStatus::Paid, now)
            .await?
        {
            TransitionOutcome::Applied(paid) => {
                self.events
                    .publish_seat(&SeatEvent::Sold {
                        trip_id: paid.trip_id,
                        seat_id: paid.seat_id.clone(),
                        ticket_id: paid.id,
                    })
                    .await;
                self.events
                    .publish_ticket(&TicketEvent::Paid {
                        ticket_id: paid.id,
                        trip_id: paid.trip_id,
                        seat_id: paid.seat_id.clone(),
                        passenger_ref: paid.passenger_ref.clone(),
                        price_amount: money::to_wire(paid.price_amount),
                        itbms_amount: money::to_wire(paid.itbms_amount),
                        total_amount: money::to_wire(paid.total_amount),
                        provider_name: paid.payment_provider.clone().unwrap_or_default(),
                        provider_order_ref: paid.payment_ref.clone().unwrap_or_default(),
                        paid_at: now.timestamp(),
                    })
                    .await;
                Ok(paid)
            }
            // A concurrent delivery of the same payment got there first
            TransitionOutcome::Rejected(current) if current.status == TicketStatus::Paid => Ok(current),
            _ => {
                // Cancelled underneath us after the seat was sold: give the seat back
                warn!(ticket_id = %ticket.id, "ticket left reserved during settlement");
                self.free_seat(ticket).await?;
                Err(ReservationError::SeatNoLongerReserved(ticket.id))
            }
        }
    }

    /// A previous settlement attempt sold the seat but never marked the ticket paid.
    async fn already_sold_to(&self, ticket: &Ticket, now: DateTime<Utc>) -> CoreResult<bool> {
        let sold = matches!(
            self.inventory.slot(&ticket.seat_key(), now).await?,
            Some(SeatSlot::Sold { ticket_id }) if ticket_id == ticket.id
        );
        if sold {
            debug!(ticket_id = %ticket.id, "seat already sold to ticket, resuming settlement");
        }
        Ok(sold)
    }

    async fn free_seat(&self, ticket: &Ticket) -> CoreResult<()> {
        if self.inventory.vacate(&ticket.seat_key(), ticket.id).await? {
            self.events
                .publish_seat(&SeatEvent::Freed {
                    trip_id: ticket.trip_id,
                    seat_id: ticket.seat_id.clone(),
                    ticket_id: ticket.id,
                })
                .await;
        }
        Ok(())
    }

    async fn load(&self, ticket_id: Uuid) -> CoreResult<Ticket> {
        self.tickets
            .get(ticket_id)
            .await?
            .ok_or_else(|| ReservationError::NotFound(format!("ticket {}", ticket_id)))
    }
}

fn invalid_state(from: TicketStatus, to: TicketStatus) -> ReservationError {
    ReservationError::InvalidState {
        from: from.to_string(),
        to: to.to_string(),
    }
}
