use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use pasaje_core::models::{Ticket, TicketStatus};
use pasaje_core::repository::{
    BindOutcome, StoreError, StoreResult, TicketRepository, TransitionOutcome,
};
use pasaje_shared::Masked;

pub struct PgTicketRepository {
    pool: PgPool,
}

impl PgTicketRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch(&self, id: Uuid) -> StoreResult<Option<Ticket>> {
        let row: Option<TicketRow> = sqlx::query_as(&format!("SELECT {} FROM tickets WHERE id = $1", COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        row.map(Ticket::try_from).transpose()
    }
}

const COLUMNS: &str = "id, trip_id, seat_id, passenger_ref, passenger_name, passenger_document, status, \
    price_amount, itbms_amount, total_amount, payment_provider, payment_ref, hold_session_id, \
    departure_at, created_at, paid_at, boarded_at, cancelled_at";

pub(crate) fn backend(err: sqlx::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

#[derive(sqlx::FromRow)]
struct TicketRow {
    id: Uuid,
    trip_id: Uuid,
    seat_id: String,
    passenger_ref: String,
    passenger_name: String,
    passenger_document: Option<String>,
    status: String,
    price_amount: Decimal,
    itbms_amount: Decimal,
    total_amount: Decimal,
    payment_provider: Option<String>,
    payment_ref: Option<String>,
    hold_session_id: Uuid,
    departure_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    paid_at: Option<DateTime<Utc>>,
    boarded_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
}

impl TryFrom<TicketRow> for Ticket {
    type Error = StoreError;

    fn try_from(row: TicketRow) -> Result<Self, Self::Error> {
        let status = TicketStatus::parse(&row.status)
            .ok_or_else(|| StoreError::Serialization(format!("unknown ticket status {}", row.status)))?;

        Ok(Ticket {
            id: row.id,
            trip_id: row.trip_id,
            seat_id: row.seat_id,
            passenger_ref: row.passenger_ref,
            passenger_name: Masked::new(row.passenger_name),
            passenger_document: row.passenger_document.map(Masked::new),
            status,
            price_amount: row.price_amount,
            itbms_amount: row.itbms_amount,
            total_amount: row.total_amount,
            payment_provider: row.payment_provider,
            payment_ref: row.payment_ref,
            hold_session_id: row.hold_session_id,
            departure_at: row.departure_at,
            created_at: row.created_at,
            paid_at: row.paid_at,
            boarded_at: row.boarded_at,
            cancelled_at: row.cancelled_at,
        })
    }
}

#[async_trait]
impl TicketRepository for PgTicketRepository {
    async fn insert(&self, ticket: &Ticket) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO tickets (id, trip_id, seat_id, passenger_ref, passenger_name, passenger_document, status,
                                 price_amount, itbms_amount, total_amount, payment_provider, payment_ref,
                                 hold_session_id, departure_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(ticket.id)
        .bind(ticket.trip_id)
        .bind(&ticket.seat_id)
        .bind(&ticket.passenger_ref)
        .bind(ticket.passenger_name.expose())
        .bind(ticket.passenger_document.as_ref().map(|d| d.expose().clone()))
        .bind(ticket.status.as_str())
        .bind(ticket.price_amount)
        .bind(ticket.itbms_amount)
        .bind(ticket.total_amount)
        .bind(&ticket.payment_provider)
        .bind(&ticket.payment_ref)
        .bind(ticket.hold_session_id)
        .bind(ticket.departure_at)
        .bind(ticket.created_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<Ticket>> {
        self.fetch(id).await
    }

    async fn find_by_payment_ref(
        &self,
        provider_name: &str,
        order_ref: &str,
    ) -> StoreResult<Option<Ticket>> {
        let row: Option<TicketRow> = sqlx::query_as(&format!(
            "SELECT {} FROM tickets WHERE payment_provider = $1 AND payment_ref = $2",
            COLUMNS
        ))
        .bind(provider_name)
        .bind(order_ref)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.map(Ticket::try_from).transpose()
    }

    async fn bind_payment_ref(
        &self,
        id: Uuid,
        provider_name: &str,
        order_ref: &str,
        replacing: Option<&str>,
    ) -> StoreResult<BindOutcome> {
        let updated: Result<Option<TicketRow>, sqlx::Error> = sqlx::query_as(&format!(
            "UPDATE tickets SET payment_provider = $2, payment_ref = $3 \
             WHERE id = $1 AND status = 'reserved' AND payment_ref IS NOT DISTINCT FROM $4 \
             RETURNING {}",
            COLUMNS
        ))
        .bind(id)
        .bind(provider_name)
        .bind(order_ref)
        .bind(replacing)
        .fetch_optional(&self.pool)
        .await;

        match updated {
            Ok(Some(row)) => Ok(BindOutcome::Bound(row.try_into()?)),
            Ok(None) => match self.fetch(id).await? {
                Some(ticket) if ticket.status == TicketStatus::Reserved => Ok(BindOutcome::AlreadyBound(ticket)),
                Some(ticket) => Ok(BindOutcome::NotReserved(ticket)),
                None => Ok(BindOutcome::Missing),
            },
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Ok(BindOutcome::RefTaken),
            Err(e) => Err(backend(e)),
        }
    }

    async fn transition(
        &self,
        id: Uuid,
        from: &[TicketStatus],
        to: TicketStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<TransitionOutcome> {
        let allowed: Vec<String> = from.iter().map(|s| s.as_str().to_string()).collect();

        let row: Option<TicketRow> = sqlx::query_as(&format!(
            r#"
            UPDATE tickets SET
                status = $2,
                paid_at = CASE WHEN $2 = 'paid' THEN $3 ELSE paid_at END,
                boarded_at = CASE WHEN $2 = 'boarded' THEN $3 ELSE boarded_at END,
                cancelled_at = CASE WHEN $2 = 'cancelled' THEN $3 ELSE cancelled_at END
            WHERE id = $1 AND status = ANY($4)
            RETURNING {}
            "#,
            COLUMNS
        ))
        .bind(id)
        .bind(to.as_str())
        .bind(at)
        .bind(&allowed)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        match row {
            Some(row) => Ok(TransitionOutcome::Applied(row.try_into()?)),
            None => match self.fetch(id).await? {
                Some(ticket) => Ok(TransitionOutcome::Rejected(ticket)),
                None => Ok(TransitionOutcome::Missing),
            },
        }
    }

    async fn list_by_status(&self, status: TicketStatus) -> StoreResult<Vec<Ticket>> {
        let rows: Vec<TicketRow> = sqlx::query_as(&format!(
            "SELECT {} FROM tickets WHERE status = $1 ORDER BY created_at",
            COLUMNS
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter().map(Ticket::try_from).collect()
    }
}
