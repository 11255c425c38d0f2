//! Concrete provider implementations: the Redis cache facade and the
//! PostgreSQL document stores.

pub mod postgres;
pub mod redis_cache;

pub use postgres::{PostgresDeviceStore, PostgresPrincipalStore, PostgresReportStore};
pub use redis_cache::RedisCacheStore;
