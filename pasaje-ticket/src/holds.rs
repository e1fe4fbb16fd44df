use chrono::Duration;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use pasaje_core::events::EventPublisher;
use pasaje_core::identity::Actor;
use pasaje_core::models::{SeatHold, SeatSlot};
use pasaje_core::repository::{AcquireOutcome, SeatInventory};
use pasaje_core::{Clock, CoreResult, ReservationError};
use pasaje_shared::models::events::SeatEvent;

/// TTL bounds for seat holds, in seconds.
#[derive(Debug, Clone, Copy)]
pub struct HoldPolicy {
    pub default_ttl_seconds: u64,
    pub max_ttl_seconds: u64,
}

impl HoldPolicy {
    /// Clamps a requested TTL into `[1s, max]`; `None` takes the default.
    pub fn ttl(&self, requested: Option<u64>) -> Duration {
        let max = self.max_ttl_seconds.max(1);
        let secs = requested.unwrap_or(self.default_ttl_seconds).clamp(1, max);
        Duration::seconds(secs as i64)
    }
}

/// Exclusive, time-boxed seat claims taken while a buyer pays.
pub struct SeatHoldManager {
    inventory: Arc<dyn SeatInventory>,
    events: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
    policy: HoldPolicy,
}

impl SeatHoldManager {
    pub fn new(
        inventory: Arc<dyn SeatInventory>,
        events: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
        policy: HoldPolicy,
    ) -> Self {
        Self {
            inventory,
            events,
            clock,
            policy,
        }
    }

    pub async fn acquire(
        &self,
        trip_id: Uuid,
        seat_id: &str,
        holder_ref: &str,
        ttl_seconds: Option<u64>,
    ) -> CoreResult<SeatHold> {
        let seat_id = seat_id.trim();
        if seat_id.is_empty() {
            return Err(ReservationError::InvalidRequest("seat_id is required".to_string()));
        }

        let now = self.clock.now();
        let hold = SeatHold::new(trip_id, seat_id, holder_ref, now, self.policy.ttl(ttl_seconds));

        match self.inventory.try_hold(hold, now).await? {
            AcquireOutcome::Acquired(hold) => {
                info!(
                    session_id = %hold.session_id,
                    trip_id = %hold.trip_id,
                    seat_id = %hold.seat_id,
                    expires_at = %hold.expires_at,
                    "seat held"
                );
                self.events
                    .publish_seat(&SeatEvent::Held {
                        trip_id: hold.trip_id,
                        seat_id: hold.seat_id.clone(),
                        session_id: hold.session_id,
                        expires_at: hold.expires_at,
                    })
                    .await;
                Ok(hold)
            }
            AcquireOutcome::Occupied(slot) => {
                let reason = match slot {
                    SeatSlot::Held(_) => "held",
                    SeatSlot::Sold { .. } => "sold",
                };
                debug!(%trip_id, seat_id, reason, "seat unavailable");
                Err(ReservationError::Conflict(format!(
                    "seat {} on trip {} is {}",
                    seat_id, trip_id, reason
                )))
            }
        }
    }

    /// Idempotent: unknown, expired and consumed holds are a no-op.
    pub async fn release(&self, session_id: Uuid) -> CoreResult<()> {
        let now = self.clock.now();
        if let Some(hold) = self.inventory.release_hold(session_id, now).await? {
            info!(%session_id, trip_id = %hold.trip_id, seat_id = %hold.seat_id, "hold released");
            self.events
                .publish_seat(&SeatEvent::Released {
                    trip_id: hold.trip_id,
                    seat_id: hold.seat_id,
                    session_id,
                })
                .await;
        }
        Ok(())
    }

    /// Release on behalf of a caller; only the holder or staff may do it.
    pub async fn release_as(&self, session_id: Uuid, actor: &Actor) -> CoreResult<()> {
        let now = self.clock.now();
        if let Some(hold) = self.inventory.get_hold(session_id, now).await? {
            if !actor.may_manage(&hold.holder_ref) {
                return Err(ReservationError::Forbidden("hold belongs to another buyer".to_string()));
            }
        }
        self.release(session_id).await
    }

    pub async fn extend(&self, session_id: Uuid, ttl_seconds: u64) -> CoreResult<SeatHold> {
        let now = self.clock.now();
        let expires_at = now + self.policy.ttl(Some(ttl_seconds));

        let hold = self
            .inventory
            .extend_hold(session_id, expires_at, now)
            .await?
            .ok_or_else(|| ReservationError::NotFound(format!("hold {}", session_id)))?;

        debug!(%session_id, expires_at = %hold.expires_at, "hold extended");
        self.events
            .publish_seat(&SeatEvent::Extended {
                trip_id: hold.trip_id,
                seat_id: hold.seat_id.clone(),
                session_id,
                expires_at: hold.expires_at,
            })
            .await;
        Ok(hold)
    }

    pub async fn extend_as(&self, session_id: Uuid, ttl_seconds: u64, actor: &Actor) -> CoreResult<SeatHold> {
        let hold = self.get(session_id).await?;
        if !actor.may_manage(&hold.holder_ref) {
            return Err(ReservationError::Forbidden("hold belongs to another buyer".to_string()));
        }
        self.extend(session_id, ttl_seconds).await
    }

    pub async fn get(&self, session_id: Uuid) -> CoreResult<SeatHold> {
        self.inventory
            .get_hold(session_id, self.clock.now())
            .await?
            .ok_or_else(|| ReservationError::NotFound(format!("hold {}", session_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pasaje_core::events::RecordingPublisher;
    use pasaje_core::identity::Role;
    use pasaje_core::ManualClock;
    use pasaje_store::memory::MemorySeatInventory;

    fn manager(clock: Arc<ManualClock>) -> (SeatHoldManager, Arc<RecordingPublisher>) {
        let events = Arc::new(RecordingPublisher::new());
        let manager = SeatHoldManager::new(
            Arc::new(MemorySeatInventory::new()),
            events.clone(),
            clock,
            HoldPolicy {
                default_ttl_seconds: 300,
                max_ttl_seconds: 1800,
            },
        );
        (manager, events)
    }

    #[test]
    fn test_ttl_is_clamped() {
        let policy = HoldPolicy {
            default_ttl_seconds: 300,
            max_ttl_seconds: 1800,
        };
        assert_eq!(policy.ttl(None), Duration::seconds(300));
        assert_eq!(policy.ttl(Some(0)), Duration::seconds(1));
        assert_eq!(policy.ttl(Some(86_400)), Duration::seconds(1800));
    }

    #[tokio::test]
    async fn test_hold_blocks_until_ttl_elapses() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let (manager, _) = manager(clock.clone());
        let trip = Uuid::new_v4();

        manager.acquire(trip, "12", "user-a", Some(300)).await.unwrap();

        let second = manager.acquire(trip, "12", "user-b", Some(300)).await;
        assert!(matches!(second, Err(ReservationError::Conflict(_))));

        clock.advance(Duration::seconds(301));
        let retry = manager.acquire(trip, "12", "user-b", Some(300)).await.unwrap();
        assert_eq!(retry.holder_ref, "user-b");
    }

    #[tokio::test]
    async fn test_concurrent_acquires_have_one_winner() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let (manager, _) = manager(clock);
        let manager = Arc::new(manager);
        let trip = Uuid::new_v4();

        let mut handles = Vec::new();
        for i in 0..16 {
            let m = manager.clone();
            handles.push(tokio::spawn(async move {
                m.acquire(trip, "7A", &format!("user-{}", i), None).await
            }));
        }

        let mut won = 0;
        let mut conflicts = 0;
        for h in handles {
            match h.await.unwrap() {
                Ok(_) => won += 1,
                Err(ReservationError::Conflict(_)) => conflicts += 1,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        assert_eq!(won, 1);
        assert_eq!(conflicts, 15);
    }

    #[tokio::test]
    async fn test_double_release_is_noop() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let (manager, events) = manager(clock);
        let hold = manager.acquire(Uuid::new_v4(), "3", "user-a", None).await.unwrap();

        manager.release(hold.session_id).await.unwrap();
        manager.release(hold.session_id).await.unwrap();
        manager.release(Uuid::new_v4()).await.unwrap();

        let released = events
            .seat_events()
            .into_iter()
            .filter(|e| matches!(e, SeatEvent::Released { .. }))
            .count();
        assert_eq!(released, 1);
        assert!(matches!(
            manager.get(hold.session_id).await,
            Err(ReservationError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_extend_expired_hold_is_not_found() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let (manager, _) = manager(clock.clone());
        let hold = manager.acquire(Uuid::new_v4(), "9", "user-a", Some(60)).await.unwrap();

        let extended = manager.extend(hold.session_id, 600).await.unwrap();
        assert_eq!(extended.expires_at, clock.now() + Duration::seconds(600));

        clock.advance(Duration::seconds(601));
        assert!(matches!(
            manager.extend(hold.session_id, 600).await,
            Err(ReservationError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_stranger_cannot_release() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let (manager, _) = manager(clock);
        let hold = manager.acquire(Uuid::new_v4(), "1", "user-a", None).await.unwrap();

        let stranger = Actor::new("user-b", Role::Customer);
        assert!(matches!(
            manager.release_as(hold.session_id, &stranger).await,
            Err(ReservationError::Forbidden(_))
        ));

        let agent = Actor::new("agent-1", Role::Agent);
        manager.release_as(hold.session_id, &agent).await.unwrap();
        assert!(manager.get(hold.session_id).await.is_err());
    }

    #[tokio::test]
    async fn test_blank_seat_is_rejected() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let (manager, _) = manager(clock);
        assert!(matches!(
            manager.acquire(Uuid::new_v4(), "  ", "user-a", None).await,
            Err(ReservationError::InvalidRequest(_))
        ));
    }
}
