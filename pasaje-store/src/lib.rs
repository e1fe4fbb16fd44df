pub mod app_config;
pub mod database;
pub mod events;
pub mod memory;
pub mod payment_repo;
pub mod redis_repo;
pub mod ticket_repo;

pub use database::DbClient;
pub use events::EventProducer;
pub use memory::{MemoryPaymentRecordRepository, MemorySeatInventory, MemoryTicketRepository};
pub use payment_repo::PgPaymentRecordRepository;
pub use redis_repo::{RedisClient, RedisSeatInventory};
pub use ticket_repo::PgTicketRepository;
