use uuid::Uuid;
use chrono::{DateTime, Utc};

/// Seat occupancy changes, fanned out to kiosk screens.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SeatEvent {
    Held {
        trip_id: Uuid,
        seat_id: String,
        session_id: Uuid,
        expires_at: DateTime<Utc>,
    },
    Extended {
        trip_id: Uuid,
        seat_id: String,
        session_id: Uuid,
        expires_at: DateTime<Utc>,
    },
    Released {
        trip_id: Uuid,
        seat_id: String,
        session_id: Uuid,
    },
    Sold {
        trip_id: Uuid,
        seat_id: String,
        ticket_id: Uuid,
    },
    Freed {
        trip_id: Uuid,
        seat_id: String,
        ticket_id: Uuid,
    },
}

impl SeatEvent {
    pub fn trip_id(&self) -> Uuid {
        match self {
            SeatEvent::Held { trip_id, .. }
            | SeatEvent::Extended { trip_id, .. }
            | SeatEvent::Released { trip_id, .. }
            | SeatEvent::Sold { trip_id, .. }
            | SeatEvent::Freed { trip_id, .. } => *trip_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SeatEvent::Held { .. } => "seat_held",
            SeatEvent::Extended { .. } => "seat_extended",
            SeatEvent::Released { .. } => "seat_released",
            SeatEvent::Sold { .. } => "seat_sold",
            SeatEvent::Freed { .. } => "seat_freed",
        }
    }
}

/// Ticket state changes consumed by the printing/fiscal bridge.
///
/// Amounts travel as two-decimal strings ("10.70"), the format fiscal
/// devices print.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TicketEvent {
    Paid {
        ticket_id: Uuid,
        trip_id: Uuid,
        seat_id: String,
        passenger_ref: String,
        price_amount: String,
        itbms_amount: String,
        total_amount: String,
        provider_name: String,
        provider_order_ref: String,
        paid_at: i64,
    },
    Cancelled {
        ticket_id: Uuid,
        trip_id: Uuid,
        seat_id: String,
        was_paid: bool,
        cancelled_at: i64,
    },
    Boarded {
        ticket_id: Uuid,
        trip_id: Uuid,
        seat_id: String,
        boarded_at: i64,
    },
}

impl TicketEvent {
    pub fn ticket_id(&self) -> Uuid {
        match self {
            TicketEvent::Paid { ticket_id, .. }
            | TicketEvent::Cancelled { ticket_id, .. }
            | TicketEvent::Boarded { ticket_id, .. } => *ticket_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seat_event_wire_format() {
        let trip_id = Uuid::new_v4();
        let event = SeatEvent::Released {
            trip_id,
            seat_id: "12".to_string(),
            session_id: Uuid::new_v4(),
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "released");
        assert_eq!(value["seat_id"], "12");
        assert_eq!(event.trip_id(), trip_id);
        assert_eq!(event.name(), "seat_released");
    }
}
