use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use pasaje_core::models::{AttemptDisposition, CallbackAttempt, PaymentRecord, PaymentRecordStatus, Ticket};
use pasaje_core::payment::{CallbackStatus, NormalizedCallback, RawCallback};
use pasaje_core::repository::{ClaimOutcome, Finalization, PaymentRecordRepository, TicketRepository};
use pasaje_core::{money, Clock, CoreResult, ReservationError};

use crate::lifecycle::TicketLifecycle;
use crate::providers::{callback_hash, ProviderRegistry};

#[derive(Debug, Clone, Copy)]
pub struct SettlementPolicy {
    /// How long a `pending` claim belongs to the delivery that made it
    pub lease: Duration,
    /// Cancel the reservation on a declined payment instead of letting the
    /// buyer retry until the hold lapses
    pub decline_releases_seat: bool,
}

/// Turns gateway callbacks into at most one `reserved -> paid` per
/// `(provider_name, provider_order_ref)`.
pub struct SettlementCoordinator {
    providers: Arc<ProviderRegistry>,
    records: Arc<dyn PaymentRecordRepository>,
    tickets: Arc<dyn TicketRepository>,
    lifecycle: Arc<TicketLifecycle>,
    clock: Arc<dyn Clock>,
    policy: SettlementPolicy,
}

impl SettlementCoordinator {
    pub fn new(
        providers: Arc<ProviderRegistry>,
        records: Arc<dyn PaymentRecordRepository>,
        tickets: Arc<dyn TicketRepository>,
        lifecycle: Arc<TicketLifecycle>,
        clock: Arc<dyn Clock>,
        policy: SettlementPolicy,
    ) -> Self {
        Self {
            providers,
            records,
            tickets,
            lifecycle,
            clock,
            policy,
        }
    }

    #[instrument(skip(self, raw), fields(body_len = raw.body.len()))]
    pub async fn process_callback(&self, provider_name: &str, raw: &RawCallback) -> CoreResult<PaymentRecord> {
        let provider = self.providers.get(provider_name)?;
        provider.ensure_session()?;

        let now = self.clock.now();
        let hash = callback_hash(&raw.body);
        let callback = provider.validate_callback(raw).await;

        if !callback.signature_valid {
            warn!(provider = provider_name, "callback failed authentication, discarded");
            self.audit(provider_name, None, &hash, AttemptDisposition::Rejected, now).await;
            return Err(ReservationError::InvalidSignature);
        }

        if callback.status == CallbackStatus::Pending {
            info!(provider = provider_name, order_ref = %callback.provider_order_ref, "gateway still processing");
            return Ok(PaymentRecord::pending(
                provider_name,
                &callback.provider_order_ref,
                callback.amount,
                hash,
                now,
            ));
        }

        let Some(record) = self.claim(provider_name, &callback, &hash, now).await? else {
            // Replay of a settled order
            return self
                .records
                .find(provider_name, &callback.provider_order_ref)
                .await?
                .ok_or_else(|| ReservationError::Conflict("payment record vanished".to_string()));
        };
        self.audit(
            provider_name,
            Some(&callback.provider_order_ref),
            &hash,
            AttemptDisposition::Applied,
            now,
        )
        .await;

        let Some(ticket) = self
            .tickets
            .find_by_payment_ref(provider_name, &callback.provider_order_ref)
            .await?
        else {
            warn!(provider = provider_name, order_ref = %callback.provider_order_ref, "callback for unknown order");
            self.finish(&record, PaymentRecordStatus::Failed, None, Some("no ticket bound to order"))
                .await?;
            return Err(ReservationError::TicketNotFound(callback.provider_order_ref));
        };

        match callback.status {
            CallbackStatus::Succeeded => self.confirm(record, &callback, ticket).await,
            _ => self.decline(record, ticket).await,
        }
    }

    /// Insert-if-absent on the idempotency key. `None` means the order was
    /// already settled and this delivery is a duplicate.
    async fn claim(
        &self,
        provider_name: &str,
        callback: &NormalizedCallback,
        hash: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<Option<PaymentRecord>> {
        let candidate = PaymentRecord::pending(
            provider_name,
            &callback.provider_order_ref,
            callback.amount,
            hash.to_string(),
            now,
        );

        let existing = match self.records.claim(candidate).await? {
            ClaimOutcome::Claimed(record) => return Ok(Some(record)),
            ClaimOutcome::Existing(existing) => existing,
        };

        if existing.status != PaymentRecordStatus::Pending {
            info!(
                provider = provider_name,
                order_ref = %callback.provider_order_ref,
                status = existing.status.as_str(),
                "duplicate callback, returning recorded outcome"
            );
            self.audit(
                provider_name,
                Some(&callback.provider_order_ref),
                hash,
                AttemptDisposition::Duplicate,
                now,
            )
            .await;
            return Ok(None);
        }

        let stale_before = now - self.policy.lease;
        if existing.claimed_at >= stale_before {
            return Err(ReservationError::Conflict(format!(
                "order {} is being settled by another delivery",
                callback.provider_order_ref
            )));
        }

        match self.records.take_over(existing.id, stale_before, now).await? {
            Some(record) => {
                warn!(record_id = %record.id, "took over stale settlement claim");
                Ok(Some(record))
            }
            None => Err(ReservationError::Conflict(format!(
                "order {} is being settled by another delivery",
                callback.provider_order_ref
            ))),
        }
    }

    async fn confirm(
        &self,
        record: PaymentRecord,
        callback: &NormalizedCallback,
        ticket: Ticket,
    ) -> CoreResult<PaymentRecord> {
        if !money::amounts_match(ticket.total_amount, callback.amount) {
            error!(
                ticket_id = %ticket.id,
                order_ref = %callback.provider_order_ref,
                expected = %ticket.total_amount,
                received = %callback.amount,
                "payment amount mismatch, needs reconciliation"
            );
            self.finish(&record, PaymentRecordStatus::Failed, Some(ticket.id), Some("amount mismatch"))
                .await?;
            return Err(ReservationError::AmountMismatch {
                expected: ticket.total_amount,
                received: callback.amount,
            });
        }

        match self.lifecycle.settle(&ticket).await {
            Ok(paid) => {
                let confirmed = self
                    .finish(&record, PaymentRecordStatus::Confirmed, Some(paid.id), None)
                    .await?;
                info!(ticket_id = %paid.id, order_ref = %confirmed.provider_order_ref, "payment confirmed");
                Ok(confirmed)
            }
            Err(err @ ReservationError::SeatNoLongerReserved(_)) => {
                warn!(ticket_id = %ticket.id, "payment arrived for a seat that is no longer reserved");
                self.finish(&record, PaymentRecordStatus::Failed, Some(ticket.id), Some("seat no longer reserved"))
                    .await?;
                Err(err)
            }
            // Storage faults leave the claim pending; a redelivery takes it over after the lease
            Err(err) => Err(err),
        }
    }

    async fn decline(&self, record: PaymentRecord, ticket: Ticket) -> CoreResult<PaymentRecord> {
        let failed = self
            .finish(&record, PaymentRecordStatus::Failed, Some(ticket.id), Some("declined by provider"))
            .await?;
        info!(ticket_id = %ticket.id, "payment declined");

        if self.policy.decline_releases_seat {
            self.lifecycle.expire_reservation(&ticket).await?;
        }
        Ok(failed)
    }

    async fn finish(
        &self,
        record: &PaymentRecord,
        status: PaymentRecordStatus,
        ticket_ref: Option<Uuid>,
        failure_reason: Option<&str>,
    ) -> CoreResult<PaymentRecord> {
        let outcome = Finalization {
            status,
            ticket_ref,
            failure_reason: failure_reason.map(str::to_string),
            processed_at: self.clock.now(),
        };

        if let Some(done) = self.records.finalize(record.id, record.claimed_at, outcome).await? {
            return Ok(done);
        }

        // Our claim was taken over after the lease; report what the new owner left
        let current = self
            .records
            .find(&record.provider_name, &record.provider_order_ref)
            .await?
            .ok_or_else(|| ReservationError::Conflict("payment record vanished".to_string()))?;
        if current.status == PaymentRecordStatus::Pending {
            warn!(record_id = %record.id, "settlement claim lost to a takeover");
            return Err(ReservationError::Conflict(format!(
                "order {} is being settled by another delivery",
                record.provider_order_ref
            )));
        }
        Ok(current)
    }

    async fn audit(
        &self,
        provider_name: &str,
        order_ref: Option<&str>,
        hash: &str,
        disposition: AttemptDisposition,
        now: DateTime<Utc>,
    ) {
        let attempt = CallbackAttempt {
            id: Uuid::new_v4(),
            provider_name: provider_name.to_string(),
            provider_order_ref: order_ref.map(str::to_string),
            raw_callback_hash: hash.to_string(),
            disposition,
            received_at: now,
        };
        if let Err(e) = self.records.record_attempt(&attempt).await {
            warn!(error = %e, "failed to record callback attempt");
        }
    }
}
