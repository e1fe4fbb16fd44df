use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use pasaje_core::events::EventPublisher;
use pasaje_core::models::{DisplaySession, SeatKey, SeatSlot};
use pasaje_core::repository::SeatInventory;
use pasaje_core::{Clock, CoreResult, ReservationError};
use pasaje_shared::models::events::{SeatEvent, TicketEvent};

/// Kiosk view of holds. Holds nothing of its own: every read goes back to
/// the seat inventory, so a session disappears with its hold.
pub struct DisplaySessionService {
    inventory: Arc<dyn SeatInventory>,
    clock: Arc<dyn Clock>,
}

impl DisplaySessionService {
    pub fn new(inventory: Arc<dyn SeatInventory>, clock: Arc<dyn Clock>) -> Self {
        Self { inventory, clock }
    }

    pub async fn create_display_session(&self, trip_id: Uuid, seat_id: &str) -> CoreResult<DisplaySession> {
        let key = SeatKey::new(trip_id, seat_id);
        match self.inventory.slot(&key, self.clock.now()).await? {
            Some(SeatSlot::Held(hold)) => Ok(DisplaySession::from(&hold)),
            _ => Err(ReservationError::NotFound(format!("no live hold on seat {}", key))),
        }
    }

    pub async fn get_session(&self, session_id: Uuid) -> CoreResult<DisplaySession> {
        self.inventory
            .get_hold(session_id, self.clock.now())
            .await?
            .map(|hold| DisplaySession::from(&hold))
            .ok_or_else(|| ReservationError::NotFound(format!("display session {}", session_id)))
    }
}

/// Fans seat events out to SSE subscribers.
#[derive(Clone)]
pub struct SeatFeed {
    tx: broadcast::Sender<SeatEvent>,
}

impl SeatFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SeatEvent> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl EventPublisher for SeatFeed {
    async fn publish_seat(&self, event: &SeatEvent) {
        // No subscribers is fine
        let _ = self.tx.send(event.clone());
    }

    async fn publish_ticket(&self, _event: &TicketEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::holds::{HoldPolicy, SeatHoldManager};
    use chrono::{Duration, Utc};
    use pasaje_core::ManualClock;
    use pasaje_store::memory::MemorySeatInventory;

    fn services() -> (Arc<ManualClock>, SeatHoldManager, DisplaySessionService, SeatFeed) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let inventory = Arc::new(MemorySeatInventory::new());
        let feed = SeatFeed::new(16);
        let holds = SeatHoldManager::new(
            inventory.clone(),
            Arc::new(feed.clone()),
            clock.clone(),
            HoldPolicy {
                default_ttl_seconds: 120,
                max_ttl_seconds: 600,
            },
        );
        let display = DisplaySessionService::new(inventory, clock.clone());
        (clock, holds, display, feed)
    }

    #[tokio::test]
    async fn test_session_mirrors_hold() {
        let (clock, holds, display, _) = services();
        let trip = Uuid::new_v4();

        assert!(matches!(
            display.create_display_session(trip, "5").await,
            Err(ReservationError::NotFound(_))
        ));

        let hold = holds.acquire(trip, "5", "user-a", None).await.unwrap();
        let session = display.create_display_session(trip, "5").await.unwrap();
        assert_eq!(session.session_id, hold.session_id);
        assert_eq!(session.expires_at, hold.expires_at);

        let extended = holds.extend(hold.session_id, 600).await.unwrap();
        assert_eq!(display.get_session(hold.session_id).await.unwrap().expires_at, extended.expires_at);

        clock.advance(Duration::seconds(601));
        assert!(matches!(
            display.get_session(hold.session_id).await,
            Err(ReservationError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_session_gone_after_release() {
        let (_, holds, display, _) = services();
        let hold = holds.acquire(Uuid::new_v4(), "5", "user-a", None).await.unwrap();

        holds.release(hold.session_id).await.unwrap();
        assert!(display.get_session(hold.session_id).await.is_err());
    }

    #[tokio::test]
    async fn test_feed_receives_seat_events() {
        let (_, holds, _, feed) = services();
        let mut rx = feed.subscribe();
        let trip = Uuid::new_v4();

        let hold = holds.acquire(trip, "8", "user-a", None).await.unwrap();
        holds.release(hold.session_id).await.unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.name(), "seat_held");
        assert_eq!(first.trip_id(), trip);
        assert_eq!(rx.recv().await.unwrap().name(), "seat_released");
    }
}
