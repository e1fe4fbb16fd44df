//! In-process backends. Each store serialises its writes through one tokio
//! mutex, which makes every conditional write trivially atomic. Used by the
//! test suites and by `storage.backend = "memory"`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use pasaje_core::models::{
    CallbackAttempt, PaymentRecord, PaymentRecordStatus, SeatHold, SeatKey, SeatSlot, Ticket,
    TicketStatus,
};
use pasaje_core::repository::{
    AcquireOutcome, AttachOutcome, BindOutcome, ClaimOutcome, Finalization,
    PaymentRecordRepository, SeatInventory, StoreResult, TicketRepository, TransitionOutcome,
};

#[derive(Default)]
struct SeatTable {
    slots: HashMap<SeatKey, SeatSlot>,
    sessions: HashMap<Uuid, SeatKey>,
}

impl SeatTable {
    fn held_mut(&mut self, session_id: Uuid) -> Option<&mut SeatHold> {
        let key = self.sessions.get(&session_id)?;
        match self.slots.get_mut(key) {
            Some(SeatSlot::Held(hold)) if hold.session_id == session_id => Some(hold),
            _ => None,
        }
    }

    fn remove_session(&mut self, session_id: Uuid) -> Option<SeatHold> {
        let key = self.sessions.remove(&session_id)?;
        let owned = matches!(
            self.slots.get(&key),
            Some(SeatSlot::Held(hold)) if hold.session_id == session_id
        );
        if !owned {
            return None;
        }
        match self.slots.remove(&key) {
            Some(SeatSlot::Held(hold)) => Some(hold),
            _ => None,
        }
    }
}

#[derive(Default)]
pub struct MemorySeatInventory {
    table: Mutex<SeatTable>,
}

impl MemorySeatInventory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SeatInventory for MemorySeatInventory {
    async fn try_hold(&self, hold: SeatHold, now: DateTime<Utc>) -> StoreResult<AcquireOutcome> {
        let mut guard = self.table.lock().await;
        let table = &mut *guard;
        let key = hold.key();

        if let Some(slot) = table.slots.get(&key) {
            if slot.occupies(now) {
                return Ok(AcquireOutcome::Occupied(slot.clone()));
            }
            if let SeatSlot::Held(stale) = slot {
                table.sessions.remove(&stale.session_id);
            }
        }

        table.sessions.insert(hold.session_id, key.clone());
        table.slots.insert(key, SeatSlot::Held(hold.clone()));
        Ok(AcquireOutcome::Acquired(hold))
    }

    async fn get_hold(&self, session_id: Uuid, now: DateTime<Utc>) -> StoreResult<Option<SeatHold>> {
        let mut table = self.table.lock().await;
        Ok(table
            .held_mut(session_id)
            .filter(|hold| hold.is_live(now))
            .map(|hold| hold.clone()))
    }

    async fn slot(&self, key: &SeatKey, now: DateTime<Utc>) -> StoreResult<Option<SeatSlot>> {
        let table = self.table.lock().await;
        Ok(table.slots.get(key).filter(|slot| slot.occupies(now)).cloned())
    }

    async fn extend_hold(
        &self,
        session_id: Uuid,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<SeatHold>> {
        let mut table = self.table.lock().await;
        match table.held_mut(session_id) {
            Some(hold) if hold.is_live(now) => {
                hold.expires_at = expires_at;
                Ok(Some(hold.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn release_hold(&self, session_id: Uuid, now: DateTime<Utc>) -> StoreResult<Option<SeatHold>> {
        let mut table = self.table.lock().await;
        Ok(table
            .remove_session(session_id)
            .filter(|hold| hold.is_live(now)))
    }

    async fn attach_ticket(
        &self,
        session_id: Uuid,
        ticket_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<AttachOutcome> {
        let mut table = self.table.lock().await;
        let hold = match table.held_mut(session_id) {
            Some(hold) if hold.is_live(now) => hold,
            _ => return Ok(AttachOutcome::Missing),
        };

        match hold.ticket_id {
            Some(existing) if existing != ticket_id => Ok(AttachOutcome::AlreadyAttached(existing)),
            _ => {
                hold.ticket_id = Some(ticket_id);
                Ok(AttachOutcome::Attached(hold.clone()))
            }
        }
    }

    async fn consume_hold(
        &self,
        session_id: Uuid,
        ticket_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut table = self.table.lock().await;
        let key = match table.held_mut(session_id) {
            Some(hold) if hold.is_live(now) && hold.ticket_id == Some(ticket_id) => hold.key(),
            _ => return Ok(false),
        };

        table.sessions.remove(&session_id);
        table.slots.insert(key, SeatSlot::Sold { ticket_id });
        Ok(true)
    }

    async fn vacate(&self, key: &SeatKey, ticket_id: Uuid) -> StoreResult<bool> {
        let mut table = self.table.lock().await;
        let owned = match table.slots.get(key) {
            Some(SeatSlot::Sold { ticket_id: owner }) => *owner == ticket_id,
            Some(SeatSlot::Held(hold)) => hold.ticket_id == Some(ticket_id),
            None => false,
        };
        if !owned {
            return Ok(false);
        }

        if let Some(SeatSlot::Held(hold)) = table.slots.remove(key) {
            table.sessions.remove(&hold.session_id);
        }
        Ok(true)
    }
}

#[derive(Default)]
pub struct MemoryTicketRepository {
    tickets: Mutex<HashMap<Uuid, Ticket>>,
}

impl MemoryTicketRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TicketRepository for MemoryTicketRepository {
    async fn insert(&self, ticket: &Ticket) -> StoreResult<()> {
        self.tickets.lock().await.insert(ticket.id, ticket.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<Ticket>> {
        Ok(self.tickets.lock().await.get(&id).cloned())
    }

    async fn find_by_payment_ref(
        &self,
        provider_name: &str,
        order_ref: &str,
    ) -> StoreResult<Option<Ticket>> {
        let tickets = self.tickets.lock().await;
        Ok(tickets
            .values()
            .find(|t| {
                t.payment_provider.as_deref() == Some(provider_name)
                    && t.payment_ref.as_deref() == Some(order_ref)
            })
            .cloned())
    }

    async fn bind_payment_ref(
        &self,
        id: Uuid,
        provider_name: &str,
        order_ref: &str,
        replacing: Option<&str>,
    ) -> StoreResult<BindOutcome> {
        let mut tickets = self.tickets.lock().await;

        let taken = tickets.values().any(|t| {
            t.id != id
                && t.payment_provider.as_deref() == Some(provider_name)
                && t.payment_ref.as_deref() == Some(order_ref)
        });
        if taken {
            return Ok(BindOutcome::RefTaken);
        }

        match tickets.get_mut(&id) {
            None => Ok(BindOutcome::Missing),
            Some(ticket) if ticket.status != TicketStatus::Reserved => {
                Ok(BindOutcome::NotReserved(ticket.clone()))
            }
            Some(ticket) if ticket.payment_ref.as_deref() != replacing => {
                Ok(BindOutcome::AlreadyBound(ticket.clone()))
            }
            Some(ticket) => {
                ticket.payment_provider = Some(provider_name.to_string());
                ticket.payment_ref = Some(order_ref.to_string());
                Ok(BindOutcome::Bound(ticket.clone()))
            }
        }
    }

    async fn transition(
        &self,
        id: Uuid,
        from: &[TicketStatus],
        to: TicketStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<TransitionOutcome> {
        let mut tickets = self.tickets.lock().await;
        match tickets.get_mut(&id) {
            None => Ok(TransitionOutcome::Missing),
            Some(ticket) if !from.contains(&ticket.status) => {
                Ok(TransitionOutcome::Rejected(ticket.clone()))
            }
            Some(ticket) => {
                ticket.apply_status(to, at);
                Ok(TransitionOutcome::Applied(ticket.clone()))
            }
        }
    }

    async fn list_by_status(&self, status: TicketStatus) -> StoreResult<Vec<Ticket>> {
        let tickets = self.tickets.lock().await;
        Ok(tickets.values().filter(|t| t.status == status).cloned().collect())
    }
}

#[derive(Default)]
struct PaymentTable {
    records: HashMap<(String, String), PaymentRecord>,
    attempts: Vec<CallbackAttempt>,
}

impl PaymentTable {
    fn by_id_mut(&mut self, id: Uuid) -> Option<&mut PaymentRecord> {
        self.records.values_mut().find(|r| r.id == id)
    }
}

#[derive(Default)]
pub struct MemoryPaymentRecordRepository {
    table: Mutex<PaymentTable>,
}

impl MemoryPaymentRecordRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentRecordRepository for MemoryPaymentRecordRepository {
    async fn claim(&self, record: PaymentRecord) -> StoreResult<ClaimOutcome> {
        let mut table = self.table.lock().await;
        let key = (record.provider_name.clone(), record.provider_order_ref.clone());

        if let Some(existing) = table.records.get(&key) {
            return Ok(ClaimOutcome::Existing(existing.clone()));
        }
        table.records.insert(key, record.clone());
        Ok(ClaimOutcome::Claimed(record))
    }

    async fn take_over(
        &self,
        id: Uuid,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<PaymentRecord>> {
        let mut table = self.table.lock().await;
        match table.by_id_mut(id) {
            Some(record)
                if record.status == PaymentRecordStatus::Pending
                    && record.claimed_at < stale_before =>
            {
                record.claimed_at = now;
                Ok(Some(record.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn finalize(
        &self,
        id: Uuid,
        claimed_at: DateTime<Utc>,
        outcome: Finalization,
    ) -> StoreResult<Option<PaymentRecord>> {
        let mut table = self.table.lock().await;
        match table.by_id_mut(id) {
            Some(record)
                if record.status == PaymentRecordStatus::Pending && record.claimed_at == claimed_at =>
            {
                record.status = outcome.status;
                record.ticket_ref = outcome.ticket_ref.or(record.ticket_ref);
                record.failure_reason = outcome.failure_reason;
                record.processed_at = Some(outcome.processed_at);
                Ok(Some(record.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn find(&self, provider_name: &str, order_ref: &str) -> StoreResult<Option<PaymentRecord>> {
        let table = self.table.lock().await;
        Ok(table
            .records
            .get(&(provider_name.to_string(), order_ref.to_string()))
            .cloned())
    }

    async fn record_attempt(&self, attempt: &CallbackAttempt) -> StoreResult<()> {
        self.table.lock().await.attempts.push(attempt.clone());
        Ok(())
    }

    async fn attempts_for(
        &self,
        provider_name: &str,
        order_ref: &str,
    ) -> StoreResult<Vec<CallbackAttempt>> {
        let table = self.table.lock().await;
        Ok(table
            .attempts
            .iter()
            .filter(|a| {
                a.provider_name == provider_name
                    && a.provider_order_ref.as_deref() == Some(order_ref)
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal::Decimal;
    use std::sync::Arc;

    fn hold_at(trip_id: Uuid, seat: &str, holder: &str, now: DateTime<Utc>, ttl: i64) -> SeatHold {
        SeatHold::new(trip_id, seat, holder, now, Duration::seconds(ttl))
    }

    #[tokio::test]
    async fn test_hold_blocks_until_expiry() {
        let inventory = MemorySeatInventory::new();
        let trip_id = Uuid::new_v4();
        let now = Utc::now();

        let first = inventory.try_hold(hold_at(trip_id, "12", "a", now, 300), now).await.unwrap();
        assert!(matches!(first, AcquireOutcome::Acquired(_)));

        let second = inventory.try_hold(hold_at(trip_id, "12", "b", now, 300), now).await.unwrap();
        assert!(matches!(second, AcquireOutcome::Occupied(_)));

        let later = now + Duration::seconds(300);
        let third = inventory.try_hold(hold_at(trip_id, "12", "b", later, 300), later).await.unwrap();
        assert!(matches!(third, AcquireOutcome::Acquired(_)));
    }

    #[tokio::test]
    async fn test_expired_hold_cannot_be_extended_or_consumed() {
        let inventory = MemorySeatInventory::new();
        let now = Utc::now();
        let hold = hold_at(Uuid::new_v4(), "3", "a", now, 60);
        let session_id = hold.session_id;
        let ticket_id = Uuid::new_v4();
        inventory.try_hold(hold, now).await.unwrap();
        inventory.attach_ticket(session_id, ticket_id, now).await.unwrap();

        let later = now + Duration::seconds(61);
        assert!(inventory
            .extend_hold(session_id, later + Duration::seconds(60), later)
            .await
            .unwrap()
            .is_none());
        assert!(!inventory.consume_hold(session_id, ticket_id, later).await.unwrap());
        assert!(inventory.get_hold(session_id, later).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_consume_then_vacate() {
        let inventory = MemorySeatInventory::new();
        let now = Utc::now();
        let hold = hold_at(Uuid::new_v4(), "7", "a", now, 60);
        let key = hold.key();
        let session_id = hold.session_id;
        let ticket_id = Uuid::new_v4();
        inventory.try_hold(hold, now).await.unwrap();

        // Not attached yet
        assert!(!inventory.consume_hold(session_id, ticket_id, now).await.unwrap());

        inventory.attach_ticket(session_id, ticket_id, now).await.unwrap();
        assert!(inventory.consume_hold(session_id, ticket_id, now).await.unwrap());
        assert_eq!(
            inventory.slot(&key, now + Duration::days(1)).await.unwrap(),
            Some(SeatSlot::Sold { ticket_id })
        );

        assert!(!inventory.vacate(&key, Uuid::new_v4()).await.unwrap());
        assert!(inventory.vacate(&key, ticket_id).await.unwrap());
        assert!(inventory.slot(&key, now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_holds_single_winner() {
        let inventory = Arc::new(MemorySeatInventory::new());
        let trip_id = Uuid::new_v4();
        let now = Utc::now();

        let mut handles = Vec::new();
        for i in 0..32 {
            let inventory = inventory.clone();
            handles.push(tokio::spawn(async move {
                let hold = hold_at(trip_id, "1", &format!("buyer-{}", i), now, 300);
                inventory.try_hold(hold, now).await.unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), AcquireOutcome::Acquired(_)) {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_payment_claim_is_unique() {
        let repo = MemoryPaymentRecordRepository::new();
        let now = Utc::now();
        let first = PaymentRecord::pending("card", "X123", Decimal::new(1000, 2), "h1".into(), now);
        let second = PaymentRecord::pending("card", "X123", Decimal::new(1000, 2), "h2".into(), now);

        let claimed = repo.claim(first.clone()).await.unwrap();
        assert_eq!(claimed, ClaimOutcome::Claimed(first.clone()));
        assert_eq!(repo.claim(second).await.unwrap(), ClaimOutcome::Existing(first.clone()));

        let done = repo
            .finalize(first.id, first.claimed_at, Finalization {
                status: PaymentRecordStatus::Confirmed,
                ticket_ref: Some(Uuid::new_v4()),
                failure_reason: None,
                processed_at: now,
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(done.status, PaymentRecordStatus::Confirmed);

        // Only pending records can be finalized
        let again = repo
            .finalize(first.id, first.claimed_at, Finalization {
                status: PaymentRecordStatus::Failed,
                ticket_ref: None,
                failure_reason: Some("late".into()),
                processed_at: now,
            })
            .await
            .unwrap();
        assert!(again.is_none());
    }

    #[tokio::test]
    async fn test_take_over_only_stale_claims() {
        let repo = MemoryPaymentRecordRepository::new();
        let now = Utc::now();
        let record = PaymentRecord::pending("wallet", "W1", Decimal::new(500, 2), "h".into(), now);
        repo.claim(record.clone()).await.unwrap();

        assert!(repo.take_over(record.id, now, now).await.unwrap().is_none());

        let later = now + Duration::seconds(60);
        let taken = repo
            .take_over(record.id, later - Duration::seconds(30), later)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(taken.claimed_at, later);
    }

    #[tokio::test]
    async fn test_taken_over_claim_cannot_finalize() {
        let repo = MemoryPaymentRecordRepository::new();
        let now = Utc::now();
        let record = PaymentRecord::pending("wallet", "W2", Decimal::new(500, 2), "h".into(), now);
        repo.claim(record.clone()).await.unwrap();

        let later = now + Duration::seconds(60);
        let taken = repo.take_over(record.id, later, later).await.unwrap().unwrap();

        let outcome = |status| Finalization {
            status,
            ticket_ref: None,
            failure_reason: None,
            processed_at: later,
        };
        // The original claimant was fenced off by the takeover
        assert!(repo
            .finalize(record.id, record.claimed_at, outcome(PaymentRecordStatus::Failed))
            .await
            .unwrap()
            .is_none());

        let done = repo
            .finalize(record.id, taken.claimed_at, outcome(PaymentRecordStatus::Confirmed))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(done.status, PaymentRecordStatus::Confirmed);
    }
}
