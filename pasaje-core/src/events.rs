use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use pasaje_shared::models::events::{SeatEvent, TicketEvent};

/// Outbound notifications: kiosk feeds, the printing/fiscal bridge.
///
/// Fire-and-forget. Implementations log their own failures; a failed publish
/// never undoes a reservation or a settlement.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish_seat(&self, event: &SeatEvent);

    async fn publish_ticket(&self, event: &TicketEvent);
}

pub struct NoopPublisher;

#[async_trait]
impl EventPublisher for NoopPublisher {
    async fn publish_seat(&self, _event: &SeatEvent) {}

    async fn publish_ticket(&self, _event: &TicketEvent) {}
}

/// Sends every event to each inner publisher in order.
#[derive(Clone, Default)]
pub struct FanoutPublisher {
    sinks: Vec<Arc<dyn EventPublisher>>,
}

impl FanoutPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventPublisher>) -> Self {
        self.sinks.push(sink);
        self
    }
}

#[async_trait]
impl EventPublisher for FanoutPublisher {
    async fn publish_seat(&self, event: &SeatEvent) {
        for sink in &self.sinks {
            sink.publish_seat(event).await;
        }
    }

    async fn publish_ticket(&self, event: &TicketEvent) {
        for sink in &self.sinks {
            sink.publish_ticket(event).await;
        }
    }
}

/// Keeps everything it is given. Used by tests and the dev server log.
#[derive(Default)]
pub struct RecordingPublisher {
    seats: Mutex<Vec<SeatEvent>>,
    tickets: Mutex<Vec<TicketEvent>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seat_events(&self) -> Vec<SeatEvent> {
        self.seats.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn ticket_events(&self) -> Vec<TicketEvent> {
        self.tickets.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish_seat(&self, event: &SeatEvent) {
        tracing::debug!(event = event.name(), trip_id = %event.trip_id(), "Seat event recorded");
        self.seats.lock().unwrap_or_else(|e| e.into_inner()).push(event.clone());
    }

    async fn publish_ticket(&self, event: &TicketEvent) {
        tracing::debug!(ticket_id = %event.ticket_id(), "Ticket event recorded");
        self.tickets.lock().unwrap_or_else(|e| e.into_inner()).push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_fanout_reaches_every_sink() {
        let first = Arc::new(RecordingPublisher::new());
        let second = Arc::new(RecordingPublisher::new());
        let fanout = FanoutPublisher::new()
            .with(first.clone())
            .with(second.clone());

        let event = SeatEvent::Sold {
            trip_id: Uuid::new_v4(),
            seat_id: "4".to_string(),
            ticket_id: Uuid::new_v4(),
        };
        fanout.publish_seat(&event).await;

        assert_eq!(first.seat_events(), vec![event.clone()]);
        assert_eq!(second.seat_events(), vec![event]);
        assert!(first.ticket_events().is_empty());
    }
}
