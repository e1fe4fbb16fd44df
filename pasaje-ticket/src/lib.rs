pub mod breaker;
pub mod checkout;
pub mod display;
pub mod holds;
pub mod lifecycle;
pub mod providers;
pub mod settlement;

pub use breaker::{CircuitBreaker, CircuitError, CircuitState};
pub use checkout::{BreakerSettings, CheckoutOrder, CheckoutRequest, CheckoutService};
pub use display::{DisplaySessionService, SeatFeed};
pub use holds::{HoldPolicy, SeatHoldManager};
pub use lifecycle::{CancellationPolicy, ReserveRequest, TicketLifecycle, TicketView};
pub use providers::ProviderRegistry;
pub use settlement::{SettlementCoordinator, SettlementPolicy};
