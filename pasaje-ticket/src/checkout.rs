use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use pasaje_core::identity::Actor;
use pasaje_core::models::{PaymentRecordStatus, Ticket, TicketStatus};
use pasaje_core::payment::CreateOrderRequest;
use pasaje_core::repository::{BindOutcome, PaymentRecordRepository, TicketRepository};
use pasaje_core::{money, CoreResult, ReservationError};

use crate::breaker::CircuitBreaker;
use crate::providers::ProviderRegistry;

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutRequest {
    /// Our reference for the order; defaults to the ticket ID
    #[serde(default)]
    pub order_id: Option<String>,
    pub description: String,
    pub callback_url: String,
    #[serde(default)]
    pub provider_opts: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CheckoutOrder {
    pub order_id: String,
    pub status: String,
    pub provider: String,
    pub provider_order_ref: String,
    pub checkout_url: Option<String>,
    pub amount: String,
}

#[derive(Debug, Clone, Copy)]
pub struct BreakerSettings {
    pub failure_threshold: usize,
    pub reset_timeout: Duration,
}

/// Opens a gateway order for a reserved ticket and binds the gateway's
/// reference to it, which is what later lets callbacks find the ticket.
pub struct CheckoutService {
    tickets: Arc<dyn TicketRepository>,
    records: Arc<dyn PaymentRecordRepository>,
    providers: Arc<ProviderRegistry>,
    breakers: HashMap<String, CircuitBreaker>,
}

impl CheckoutService {
    pub fn new(
        tickets: Arc<dyn TicketRepository>,
        records: Arc<dyn PaymentRecordRepository>,
        providers: Arc<ProviderRegistry>,
        breaker: BreakerSettings,
    ) -> Self {
        let breakers = providers
            .names()
            .into_iter()
            .map(|name| {
                let cb = CircuitBreaker::new(&name, breaker.failure_threshold, breaker.reset_timeout);
                (name, cb)
            })
            .collect();

        Self {
            tickets,
            records,
            providers,
            breakers,
        }
    }

    pub fn breaker(&self, provider_name: &str) -> Option<&CircuitBreaker> {
        self.breakers.get(provider_name)
    }

    pub async fn create_payment_order(
        &self,
        ticket_id: Uuid,
        provider_name: &str,
        request: CheckoutRequest,
        actor: &Actor,
    ) -> CoreResult<CheckoutOrder> {
        let provider = self.providers.get(provider_name)?;

        let ticket = self
            .tickets
            .get(ticket_id)
            .await?
            .ok_or_else(|| ReservationError::NotFound(format!("ticket {}", ticket_id)))?;

        if !actor.may_manage(&ticket.passenger_ref) {
            return Err(ReservationError::Forbidden("ticket belongs to another passenger".to_string()));
        }
        if ticket.status != TicketStatus::Reserved {
            return Err(ReservationError::InvalidState {
                from: ticket.status.to_string(),
                to: TicketStatus::Paid.to_string(),
            });
        }
        let replacing = self.replaceable_order(&ticket).await?;

        provider.ensure_session()?;

        if let Some(cb) = self.breakers.get(provider_name) {
            cb.check()
                .await
                .map_err(|e| ReservationError::ProviderUnavailable(e.to_string()))?;
        }

        let order_id = request.order_id.unwrap_or_else(|| ticket.id.to_string());
        let order_request = CreateOrderRequest {
            order_id: order_id.clone(),
            amount: ticket.total_amount,
            description: request.description,
            callback_url: request.callback_url,
            opts: request.provider_opts,
        };

        // No lock is held across the gateway call
        let created = provider.create_order(&order_request).await;
        if let Some(cb) = self.breakers.get(provider_name) {
            match &created {
                Ok(_) => cb.record_success().await,
                Err(ReservationError::ProviderUnavailable(reason)) => {
                    warn!(provider = provider_name, %reason, "gateway call failed");
                    cb.record_failure().await;
                }
                Err(_) => {}
            }
        }
        let created = created?;

        match self
            .tickets
            .bind_payment_ref(ticket_id, provider_name, &created.order_ref, replacing.as_deref())
            .await?
        {
            BindOutcome::Bound(bound) => {
                info!(
                    %ticket_id,
                    provider = provider_name,
                    order_ref = %created.order_ref,
                    "payment order created"
                );
                Ok(CheckoutOrder {
                    order_id,
                    status: "created".to_string(),
                    provider: provider_name.to_string(),
                    provider_order_ref: created.order_ref,
                    checkout_url: created.checkout_url,
                    amount: money::to_wire(bound.total_amount),
                })
            }
            BindOutcome::NotReserved(_) => Err(ReservationError::SeatNoLongerReserved(ticket_id)),
            BindOutcome::AlreadyBound(current) => Err(already_bound(&current)),
            BindOutcome::RefTaken => Err(ReservationError::Conflict(format!(
                "provider order {} is bound to another ticket",
                created.order_ref
            ))),
            BindOutcome::Missing => Err(ReservationError::NotFound(format!("ticket {}", ticket_id))),
        }
    }

    /// The order a new checkout may replace: only one the gateway already
    /// declined. A live or settling order blocks a second checkout.
    async fn replaceable_order(&self, ticket: &Ticket) -> CoreResult<Option<String>> {
        let (Some(provider_name), Some(order_ref)) = (&ticket.payment_provider, &ticket.payment_ref) else {
            return Ok(None);
        };

        match self.records.find(provider_name, order_ref).await? {
            Some(record) if record.status == PaymentRecordStatus::Failed => {
                info!(ticket_id = %ticket.id, %order_ref, "replacing failed payment order");
                Ok(Some(order_ref.clone()))
            }
            _ => Err(already_bound(ticket)),
        }
    }
}

fn already_bound(ticket: &Ticket) -> ReservationError {
    ReservationError::Conflict(format!(
        "ticket {} already has payment order {}",
        ticket.id,
        ticket.payment_ref.as_deref().unwrap_or_default()
    ))
}
