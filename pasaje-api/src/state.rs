use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use pasaje_core::events::{EventPublisher, FanoutPublisher};
use pasaje_core::repository::{PaymentRecordRepository, SeatInventory, TicketRepository};
use pasaje_core::Clock;
use pasaje_store::app_config::{BusinessRules, CircuitBreakerConfig};
use pasaje_store::{MemoryPaymentRecordRepository, MemorySeatInventory, MemoryTicketRepository, RedisClient};
use pasaje_ticket::{
    BreakerSettings, CancellationPolicy, CheckoutService, DisplaySessionService, HoldPolicy,
    ProviderRegistry, SeatFeed, SeatHoldManager, SettlementCoordinator, SettlementPolicy,
    TicketLifecycle,
};

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
    pub expiration: u64,
}

/// Storage and outbound sinks the services are built over.
pub struct Backends {
    pub inventory: Arc<dyn SeatInventory>,
    pub tickets: Arc<dyn TicketRepository>,
    pub records: Arc<dyn PaymentRecordRepository>,
    /// Extra event sinks besides the SSE feed (Kafka)
    pub sinks: Vec<Arc<dyn EventPublisher>>,
    pub clock: Arc<dyn Clock>,
}

impl Backends {
    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        Self {
            inventory: Arc::new(MemorySeatInventory::new()),
            tickets: Arc::new(MemoryTicketRepository::new()),
            records: Arc::new(MemoryPaymentRecordRepository::new()),
            sinks: Vec::new(),
            clock,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub holds: Arc<SeatHoldManager>,
    pub lifecycle: Arc<TicketLifecycle>,
    pub checkout: Arc<CheckoutService>,
    pub settlement: Arc<SettlementCoordinator>,
    pub display: Arc<DisplaySessionService>,
    pub providers: Arc<ProviderRegistry>,
    pub seat_feed: SeatFeed,
    /// Rate limiting is on only when Redis is configured
    pub redis: Option<Arc<RedisClient>>,
    pub rate_limit_per_minute: i64,
    pub auth: AuthConfig,
}

impl AppState {
    pub fn assemble(
        backends: Backends,
        providers: ProviderRegistry,
        rules: &BusinessRules,
        breaker: &CircuitBreakerConfig,
        auth: AuthConfig,
    ) -> Result<Self, rust_decimal::Error> {
        let itbms_rate = Decimal::from_str(&rules.itbms_rate)?;

        let seat_feed = SeatFeed::new(100);
        let events: Arc<dyn EventPublisher> = Arc::new(
            backends
                .sinks
                .into_iter()
                .fold(FanoutPublisher::new().with(Arc::new(seat_feed.clone())), |fanout, sink| {
                    fanout.with(sink)
                }),
        );

        let providers = Arc::new(providers);
        let clock = backends.clock;

        let holds = SeatHoldManager::new(
            backends.inventory.clone(),
            events.clone(),
            clock.clone(),
            HoldPolicy {
                default_ttl_seconds: rules.seat_hold_seconds,
                max_ttl_seconds: rules.max_hold_seconds,
            },
        );

        let lifecycle = Arc::new(TicketLifecycle::new(
            backends.tickets.clone(),
            backends.inventory.clone(),
            events,
            clock.clone(),
            itbms_rate,
            CancellationPolicy {
                cutoff: chrono::Duration::minutes(rules.cancellation_cutoff_minutes),
                allow_passenger_refunds: rules.allow_passenger_refunds,
            },
        ));

        let checkout = CheckoutService::new(
            backends.tickets.clone(),
            backends.records.clone(),
            providers.clone(),
            BreakerSettings {
                failure_threshold: breaker.failure_threshold,
                reset_timeout: Duration::from_secs(breaker.reset_timeout_seconds),
            },
        );

        let settlement = SettlementCoordinator::new(
            providers.clone(),
            backends.records,
            backends.tickets,
            lifecycle.clone(),
            clock.clone(),
            SettlementPolicy {
                lease: chrono::Duration::seconds(rules.settlement_lease_seconds),
                decline_releases_seat: rules.decline_releases_seat,
            },
        );

        let display = DisplaySessionService::new(backends.inventory, clock);

        Ok(Self {
            holds: Arc::new(holds),
            lifecycle,
            checkout: Arc::new(checkout),
            settlement: Arc::new(settlement),
            display: Arc::new(display),
            providers,
            seat_feed,
            redis: None,
            rate_limit_per_minute: 100,
            auth,
        })
    }

    pub fn with_rate_limit(mut self, redis: Arc<RedisClient>, per_minute: i64) -> Self {
        self.redis = Some(redis);
        self.rate_limit_per_minute = per_minute;
        self
    }
}
