//! Provider traits for the trust core's external collaborators.
//!
//! Providers are **interfaces**, not implementations. Services depend on
//! these traits; the runtime injects concrete implementations:
//!
//! - **Testing**: in-memory mocks (`crate::mocks`), deterministic and
//!   running at memory speed
//! - **Production**: PostgreSQL document stores, the Redis cache facade,
//!   the WebSocket notifier, the audit-log collaborator
//!
//! Scoring and cache failures must never fail a request, so the cache
//! trait is infallible by contract (degraded values instead of errors)
//! while the document stores surface `CoreError`.

pub mod audit;
pub mod cache;
pub mod device_store;
pub mod notifier;
pub mod principal_store;
pub mod report_store;

pub use audit::AuditSink;
pub use cache::{CacheHealth, CacheLock, CacheStats, CacheStore, RateLimitDecision};
pub use device_store::DeviceStore;
pub use notifier::Notifier;
pub use principal_store::PrincipalStore;
pub use report_store::{ReportQuery, ReportStore, SortOrder};
