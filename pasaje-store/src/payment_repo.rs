use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use pasaje_core::models::{
    AttemptDisposition, CallbackAttempt, PaymentRecord, PaymentRecordStatus,
};
use pasaje_core::repository::{
    ClaimOutcome, Finalization, PaymentRecordRepository, StoreError, StoreResult,
};

use crate::ticket_repo::backend;

pub struct PgPaymentRecordRepository {
    pool: PgPool,
}

impl PgPaymentRecordRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const COLUMNS: &str = "id, provider_name, provider_order_ref, ticket_ref, amount, status, \
    raw_callback_hash, failure_reason, claimed_at, processed_at";

#[derive(sqlx::FromRow)]
struct PaymentRecordRow {
    id: Uuid,
    provider_name: String,
    provider_order_ref: String,
    ticket_ref: Option<Uuid>,
    amount: Decimal,
    status: String,
    raw_callback_hash: String,
    failure_reason: Option<String>,
    claimed_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
}

impl TryFrom<PaymentRecordRow> for PaymentRecord {
    type Error = StoreError;

    fn try_from(row: PaymentRecordRow) -> Result<Self, Self::Error> {
        let status = PaymentRecordStatus::parse(&row.status)
            .ok_or_else(|| StoreError::Serialization(format!("unknown payment status {}", row.status)))?;

        Ok(PaymentRecord {
            id: row.id,
            provider_name: row.provider_name,
            provider_order_ref: row.provider_order_ref,
            ticket_ref: row.ticket_ref,
            amount: row.amount,
            status,
            raw_callback_hash: row.raw_callback_hash,
            failure_reason: row.failure_reason,
            claimed_at: row.claimed_at,
            processed_at: row.processed_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AttemptRow {
    id: Uuid,
    provider_name: String,
    provider_order_ref: Option<String>,
    raw_callback_hash: String,
    disposition: String,
    received_at: DateTime<Utc>,
}

impl TryFrom<AttemptRow> for CallbackAttempt {
    type Error = StoreError;

    fn try_from(row: AttemptRow) -> Result<Self, Self::Error> {
        let disposition = match row.disposition.as_str() {
            "applied" => AttemptDisposition::Applied,
            "duplicate" => AttemptDisposition::Duplicate,
            "rejected" => AttemptDisposition::Rejected,
            other => {
                return Err(StoreError::Serialization(format!("unknown disposition {}", other)));
            }
        };

        Ok(CallbackAttempt {
            id: row.id,
            provider_name: row.provider_name,
            provider_order_ref: row.provider_order_ref,
            raw_callback_hash: row.raw_callback_hash,
            disposition,
            received_at: row.received_at,
        })
    }
}

#[async_trait]
impl PaymentRecordRepository for PgPaymentRecordRepository {
    async fn claim(&self, record: PaymentRecord) -> StoreResult<ClaimOutcome> {
        // The unique (provider_name, provider_order_ref) constraint is the lock
        let inserted: Option<PaymentRecordRow> = sqlx::query_as(&format!(
            r#"
            INSERT INTO payment_records (id, provider_name, provider_order_ref, ticket_ref, amount, status,
                                         raw_callback_hash, failure_reason, claimed_at, processed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (provider_name, provider_order_ref) DO NOTHING
            RETURNING {}
            "#,
            COLUMNS
        ))
        .bind(record.id)
        .bind(&record.provider_name)
        .bind(&record.provider_order_ref)
        .bind(record.ticket_ref)
        .bind(record.amount)
        .bind(record.status.as_str())
        .bind(&record.raw_callback_hash)
        .bind(&record.failure_reason)
        .bind(record.claimed_at)
        .bind(record.processed_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        if let Some(row) = inserted {
            return Ok(ClaimOutcome::Claimed(row.try_into()?));
        }

        match self.find(&record.provider_name, &record.provider_order_ref).await? {
            Some(existing) => Ok(ClaimOutcome::Existing(existing)),
            None => Err(StoreError::Backend(format!(
                "payment record {}/{} conflicted but is not readable",
                record.provider_name, record.provider_order_ref
            ))),
        }
    }

    async fn take_over(
        &self,
        id: Uuid,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<PaymentRecord>> {
        let row: Option<PaymentRecordRow> = sqlx::query_as(&format!(
            "UPDATE payment_records SET claimed_at = $3 \
             WHERE id = $1 AND status = 'pending' AND claimed_at < $2 RETURNING {}",
            COLUMNS
        ))
        .bind(id)
        .bind(stale_before)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.map(PaymentRecord::try_from).transpose()
    }

    async fn finalize(
        &self,
        id: Uuid,
        claimed_at: DateTime<Utc>,
        outcome: Finalization,
    ) -> StoreResult<Option<PaymentRecord>> {
        // claimed_at is the fencing token; a takeover rewrites it
        let row: Option<PaymentRecordRow> = sqlx::query_as(&format!(
            "UPDATE payment_records SET status = $2, ticket_ref = COALESCE($3, ticket_ref), \
             failure_reason = $4, processed_at = $5 \
             WHERE id = $1 AND status = 'pending' AND claimed_at = $6 RETURNING {}",
            COLUMNS
        ))
        .bind(id)
        .bind(outcome.status.as_str())
        .bind(outcome.ticket_ref)
        .bind(&outcome.failure_reason)
        .bind(outcome.processed_at)
        .bind(claimed_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.map(PaymentRecord::try_from).transpose()
    }

    async fn find(&self, provider_name: &str, order_ref: &str) -> StoreResult<Option<PaymentRecord>> {
        let row: Option<PaymentRecordRow> = sqlx::query_as(&format!(
            "SELECT {} FROM payment_records WHERE provider_name = $1 AND provider_order_ref = $2",
            COLUMNS
        ))
        .bind(provider_name)
        .bind(order_ref)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.map(PaymentRecord::try_from).transpose()
    }

    async fn record_attempt(&self, attempt: &CallbackAttempt) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO callback_attempts (id, provider_name, provider_order_ref, raw_callback_hash, disposition, received_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(attempt.id)
        .bind(&attempt.provider_name)
        .bind(&attempt.provider_order_ref)
        .bind(&attempt.raw_callback_hash)
        .bind(attempt.disposition.as_str())
        .bind(attempt.received_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }

    async fn attempts_for(
        &self,
        provider_name: &str,
        order_ref: &str,
    ) -> StoreResult<Vec<CallbackAttempt>> {
        let rows: Vec<AttemptRow> = sqlx::query_as(
            "SELECT id, provider_name, provider_order_ref, raw_callback_hash, disposition, received_at \
             FROM callback_attempts WHERE provider_name = $1 AND provider_order_ref = $2 \
             ORDER BY received_at",
        )
        .bind(provider_name)
        .bind(order_ref)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter().map(CallbackAttempt::try_from).collect()
    }
}
