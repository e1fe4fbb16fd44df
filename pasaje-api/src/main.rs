use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pasaje_api::{app, worker, AppState, AuthConfig, Backends};
use pasaje_core::events::EventPublisher;
use pasaje_core::{Clock, SystemClock};
use pasaje_store::app_config::{Config, ProvidersConfig, StorageBackend};
use pasaje_store::{
    DbClient, EventProducer, PgPaymentRecordRepository, PgTicketRepository, RedisClient,
    RedisSeatInventory,
};
use pasaje_ticket::providers::{
    CardProvider, CardSettings, MockProvider, ProviderRegistry, WalletProvider, WalletSettings,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pasaje_api=debug,pasaje_ticket=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting Pasaje API on port {}", config.server.port);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let mut rules = config.business_rules.clone();
    let mut rate_limiter = None;

    let mut backends = match config.storage.backend {
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage; state is lost on restart");
            Backends::in_memory(clock.clone())
        }
        StorageBackend::Persistent => {
            let db_cfg = config.database.as_ref().context("storage.backend = persistent needs [database]")?;
            let redis_cfg = config.redis.as_ref().context("storage.backend = persistent needs [redis]")?;

            let db = DbClient::new(&db_cfg.url, db_cfg.max_connections)
                .await
                .context("Failed to connect to Postgres")?;
            db.migrate().await.context("Failed to run migrations")?;
            rules = db
                .fetch_business_rules(rules)
                .await
                .context("Failed to load business rules")?;

            let seats = RedisClient::new(&redis_cfg.url)
                .await
                .context("Failed to connect to Redis")?;
            let limiter = RedisClient::new(&redis_cfg.url)
                .await
                .context("Failed to connect to Redis")?;
            rate_limiter = Some((Arc::new(limiter), redis_cfg.rate_limit_per_minute));

            Backends {
                inventory: Arc::new(RedisSeatInventory::new(seats)),
                tickets: Arc::new(PgTicketRepository::new(db.pool.clone())),
                records: Arc::new(PgPaymentRecordRepository::new(db.pool.clone())),
                sinks: Vec::new(),
                clock: clock.clone(),
            }
        }
    };

    // Kafka Connection
    if let Some(kafka) = &config.kafka {
        let producer = EventProducer::new(&kafka.brokers, &kafka.ticket_topic)
            .context("Failed to create Kafka producer")?;
        backends.sinks.push(Arc::new(producer) as Arc<dyn EventPublisher>);
    }

    let providers = build_providers(&config.providers, clock.clone());
    if providers.names().is_empty() {
        tracing::warn!("No payment providers configured; checkout is disabled");
    }

    let mut state = AppState::assemble(
        backends,
        providers,
        &rules,
        &config.providers.circuit_breaker,
        AuthConfig {
            secret: config.auth.jwt_secret.clone(),
            expiration: config.auth.jwt_expiration_seconds,
        },
    )
    .context("Invalid itbms_rate")?;

    if let Some((redis, per_minute)) = rate_limiter {
        state = state.with_rate_limit(redis, per_minute);
    }

    worker::start_hold_sweeper(
        state.lifecycle.clone(),
        Duration::from_secs(rules.sweep_interval_seconds.max(1)),
    );

    let app = app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;

    Ok(())
}

fn build_providers(cfg: &ProvidersConfig, clock: Arc<dyn Clock>) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();

    if let Some(card) = &cfg.card {
        registry.register(Arc::new(CardProvider::new(
            CardSettings {
                base_url: card.base_url.clone(),
                api_key: card.api_key.clone(),
                webhook_secret: card.webhook_secret.clone(),
                tolerance_seconds: card.tolerance_seconds,
                currency: card.currency.clone(),
            },
            clock.clone(),
        )));
    }
    if let Some(wallet) = &cfg.wallet {
        registry.register(Arc::new(WalletProvider::new(
            WalletSettings {
                base_url: wallet.base_url.clone(),
                merchant_id: wallet.merchant_id.clone(),
                secret_key: wallet.secret_key.clone(),
                domain: wallet.domain.clone(),
                session_ttl_seconds: wallet.session_ttl_seconds,
            },
            clock,
        )));
    }
    if let Some(mock) = &cfg.mock {
        registry.register(Arc::new(MockProvider::new(&mock.shared_secret)));
    }

    tracing::info!("Payment providers: {:?}", registry.names());
    registry
}
