use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, RedisResult};
use tracing::{debug, warn};
use uuid::Uuid;

use pasaje_core::models::{SeatHold, SeatKey, SeatSlot};
use pasaje_core::repository::{
    AcquireOutcome, AttachOutcome, SeatInventory, StoreError, StoreResult,
};

/// Thin wrapper over the connection used by the API layer for rate limiting.
#[derive(Clone)]
pub struct RedisClient {
    client: redis::Client,
}

impl RedisClient {
    pub async fn new(connection_string: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        Ok(Self { client })
    }

    pub async fn connection(&self) -> RedisResult<MultiplexedConnection> {
        self.client.get_multiplexed_async_connection().await
    }

    pub async fn check_rate_limit(&self, key: &str, limit: i64, window_seconds: i64) -> RedisResult<bool> {
        let mut conn = self.connection().await?;

        let (count,): (i64,) = redis::pipe()
            .atomic()
            .incr(key, 1)
            .expire(key, window_seconds)
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(count <= limit)
    }
}

// KEYS[1] seat key, KEYS[2] hold index key
// ARGV[1] expected slot ("" = absent), ARGV[2] new slot ("" = delete)
// ARGV[3] PXAT millis ("0" = persist), ARGV[4] index op: set | del | keep
const COMPARE_AND_SET: &str = r#"
local current = redis.call("GET", KEYS[1])
if (current or "") ~= ARGV[1] then
    return 0
end
if ARGV[2] == "" then
    redis.call("DEL", KEYS[1])
elseif ARGV[3] == "0" then
    redis.call("SET", KEYS[1], ARGV[2])
else
    redis.call("SET", KEYS[1], ARGV[2], "PXAT", ARGV[3])
end
if ARGV[4] == "set" then
    redis.call("SET", KEYS[2], KEYS[1], "PXAT", ARGV[3])
elseif ARGV[4] == "del" then
    redis.call("DEL", KEYS[2])
end
return 1
"#;

const MAX_CAS_ATTEMPTS: usize = 16;

enum HoldStep<T> {
    Write {
        next: Option<SeatSlot>,
        expires_at: Option<DateTime<Utc>>,
        index: IndexOp,
        result: T,
    },
    Stop(Option<T>),
}

#[derive(Clone, Copy)]
enum IndexOp {
    Set,
    Delete,
    Keep,
}

impl IndexOp {
    fn as_arg(&self) -> &'static str {
        match self {
            IndexOp::Set => "set",
            IndexOp::Delete => "del",
            IndexOp::Keep => "keep",
        }
    }
}

/// Seat namespace in Redis. The slot for `seat:{trip}:{seat}` is the unit of
/// exclusivity; every write is a compare-and-set against the raw value read
/// just before. Held slots carry a PXAT so an abandoned hold vanishes on its own.
#[derive(Clone)]
pub struct RedisSeatInventory {
    client: RedisClient,
    cas: redis::Script,
}

impl RedisSeatInventory {
    pub fn new(client: RedisClient) -> Self {
        Self {
            client,
            cas: redis::Script::new(COMPARE_AND_SET),
        }
    }

    fn seat_key(key: &SeatKey) -> String {
        format!("seat:{}:{}", key.trip_id, key.seat_id)
    }

    fn hold_key(session_id: Uuid) -> String {
        format!("hold:{}", session_id)
    }

    async fn conn(&self) -> StoreResult<MultiplexedConnection> {
        self.client.connection().await.map_err(redis_err)
    }

    async fn read(
        &self,
        conn: &mut MultiplexedConnection,
        seat_key: &str,
    ) -> StoreResult<Option<(String, SeatSlot)>> {
        let raw: Option<String> = conn.get(seat_key).await.map_err(redis_err)?;
        match raw {
            Some(raw) => {
                let slot = serde_json::from_str(&raw)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                Ok(Some((raw, slot)))
            }
            None => Ok(None),
        }
    }

    async fn locate(&self, conn: &mut MultiplexedConnection, session_id: Uuid) -> StoreResult<Option<String>> {
        conn.get(Self::hold_key(session_id)).await.map_err(redis_err)
    }

    #[allow(clippy::too_many_arguments)]
    async fn compare_and_set(
        &self,
        conn: &mut MultiplexedConnection,
        seat_key: &str,
        session_id: Uuid,
        expected: Option<&str>,
        next: Option<&SeatSlot>,
        expires_at: Option<DateTime<Utc>>,
        index: IndexOp,
    ) -> StoreResult<bool> {
        let next = match next {
            Some(slot) => serde_json::to_string(slot)
                .map_err(|e| StoreError::Serialization(e.to_string()))?,
            None => String::new(),
        };
        let pxat = expires_at.map(|t| t.timestamp_millis()).unwrap_or(0);

        let applied: i32 = self
            .cas
            .key(seat_key)
            .key(Self::hold_key(session_id))
            .arg(expected.unwrap_or(""))
            .arg(next)
            .arg(pxat.to_string())
            .arg(index.as_arg())
            .invoke_async(conn)
            .await
            .map_err(redis_err)?;

        Ok(applied == 1)
    }

    /// Re-reads the hold for `session_id` and applies `step` until the CAS
    /// lands or the step declines.
    async fn update_hold<T, F>(&self, session_id: Uuid, now: DateTime<Utc>, mut step: F) -> StoreResult<Option<T>>
    where
        F: FnMut(&SeatHold) -> HoldStep<T>,
    {
        let mut conn = self.conn().await?;
        let Some(seat_key) = self.locate(&mut conn, session_id).await? else {
            return Ok(None);
        };

        for _ in 0..MAX_CAS_ATTEMPTS {
            let (raw, hold) = match self.read(&mut conn, &seat_key).await? {
                Some((raw, SeatSlot::Held(hold))) if hold.session_id == session_id && hold.is_live(now) => {
                    (raw, hold)
                }
                _ => return Ok(None),
            };

            let (next, expires_at, index, result) = match step(&hold) {
                HoldStep::Write { next, expires_at, index, result } => (next, expires_at, index, result),
                HoldStep::Stop(result) => return Ok(result),
            };

            if self
                .compare_and_set(&mut conn, &seat_key, session_id, Some(&raw), next.as_ref(), expires_at, index)
                .await?
            {
                return Ok(Some(result));
            }
            debug!(%session_id, "seat slot changed under us, retrying");
        }

        warn!(%session_id, "giving up on contended seat slot");
        Err(StoreError::Backend(format!("seat slot for hold {} is contended", session_id)))
    }
}

fn redis_err(err: redis::RedisError) -> StoreError {
    StoreError::Backend(err.to_string())
}

#[async_trait]
impl SeatInventory for RedisSeatInventory {
    async fn try_hold(&self, hold: SeatHold, now: DateTime<Utc>) -> StoreResult<AcquireOutcome> {
        let mut conn = self.conn().await?;
        let seat_key = Self::seat_key(&hold.key());
        let next = SeatSlot::Held(hold.clone());

        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = self.read(&mut conn, &seat_key).await?;
            if let Some((_, slot)) = &current {
                if slot.occupies(now) {
                    return Ok(AcquireOutcome::Occupied(slot.clone()));
                }
            }

            let expected = current.as_ref().map(|(raw, _)| raw.as_str());
            if self
                .compare_and_set(
                    &mut conn,
                    &seat_key,
                    hold.session_id,
                    expected,
                    Some(&next),
                    Some(hold.expires_at),
                    IndexOp::Set,
                )
                .await?
            {
                return Ok(AcquireOutcome::Acquired(hold));
            }
        }

        Err(StoreError::Backend(format!("seat {} is contended", seat_key)))
    }

    async fn get_hold(&self, session_id: Uuid, now: DateTime<Utc>) -> StoreResult<Option<SeatHold>> {
        let mut conn = self.conn().await?;
        let Some(seat_key) = self.locate(&mut conn, session_id).await? else {
            return Ok(None);
        };

        match self.read(&mut conn, &seat_key).await? {
            Some((_, SeatSlot::Held(hold))) if hold.session_id == session_id && hold.is_live(now) => {
                Ok(Some(hold))
            }
            _ => Ok(None),
        }
    }

    async fn slot(&self, key: &SeatKey, now: DateTime<Utc>) -> StoreResult<Option<SeatSlot>> {
        let mut conn = self.conn().await?;
        Ok(self
            .read(&mut conn, &Self::seat_key(key))
            .await?
            .map(|(_, slot)| slot)
            .filter(|slot| slot.occupies(now)))
    }

    async fn extend_hold(
        &self,
        session_id: Uuid,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<SeatHold>> {
        self.update_hold(session_id, now, |hold| {
            let mut extended = hold.clone();
            extended.expires_at = expires_at;
            HoldStep::Write {
                next: Some(SeatSlot::Held(extended.clone())),
                expires_at: Some(expires_at),
                index: IndexOp::Set,
                result: extended,
            }
        })
        .await
    }

    async fn release_hold(&self, session_id: Uuid, now: DateTime<Utc>) -> StoreResult<Option<SeatHold>> {
        self.update_hold(session_id, now, |hold| HoldStep::Write {
            next: None,
            expires_at: None,
            index: IndexOp::Delete,
            result: hold.clone(),
        })
        .await
    }

    async fn attach_ticket(
        &self,
        session_id: Uuid,
        ticket_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<AttachOutcome> {
        let outcome = self
            .update_hold(session_id, now, |hold| match hold.ticket_id {
                Some(existing) if existing != ticket_id => {
                    HoldStep::Stop(Some(AttachOutcome::AlreadyAttached(existing)))
                }
                _ => {
                    let mut attached = hold.clone();
                    attached.ticket_id = Some(ticket_id);
                    HoldStep::Write {
                        next: Some(SeatSlot::Held(attached.clone())),
                        expires_at: Some(attached.expires_at),
                        index: IndexOp::Keep,
                        result: AttachOutcome::Attached(attached),
                    }
                }
            })
            .await?;

        Ok(outcome.unwrap_or(AttachOutcome::Missing))
    }

    async fn consume_hold(
        &self,
        session_id: Uuid,
        ticket_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let consumed = self
            .update_hold(session_id, now, |hold| {
                if hold.ticket_id != Some(ticket_id) {
                    return HoldStep::Stop(None);
                }
                HoldStep::Write {
                    next: Some(SeatSlot::Sold { ticket_id }),
                    expires_at: None,
                    index: IndexOp::Delete,
                    result: (),
                }
            })
            .await?;

        Ok(consumed.is_some())
    }

    async fn vacate(&self, key: &SeatKey, ticket_id: Uuid) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let seat_key = Self::seat_key(key);

        for _ in 0..MAX_CAS_ATTEMPTS {
            // Sold slots have no live index entry
            let (raw, session_id, index) = match self.read(&mut conn, &seat_key).await? {
                Some((raw, SeatSlot::Sold { ticket_id: owner })) if owner == ticket_id => {
                    (raw, Uuid::nil(), IndexOp::Keep)
                }
                Some((raw, SeatSlot::Held(hold))) if hold.ticket_id == Some(ticket_id) => {
                    (raw, hold.session_id, IndexOp::Delete)
                }
                _ => return Ok(false),
            };

            if self
                .compare_and_set(&mut conn, &seat_key, session_id, Some(&raw), None, None, index)
                .await?
            {
                return Ok(true);
            }
        }

        Err(StoreError::Backend(format!("seat {} is contended", seat_key)))
    }
}
