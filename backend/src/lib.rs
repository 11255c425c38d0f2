//! # Civicwatch Trust Core: Backend
//!
//! IO layer of the trust and abuse-control core: the Redis cache
//! facade, PostgreSQL document stores, the submission gate with
//! ephemeral-identity promotion, the scoring engine's background
//! processor, the coordinated-attack detector, moderation and operator
//! services, and a thin axum ingest router.
//!
//! ## Architecture
//!
//! Services are `impl` blocks on [`environment::Environment`], which
//! injects every external collaborator behind the provider traits:
//!
//! ```text
//! request ─→ router ─→ gate ─→ entities (civicwatch-core) ─→ stores
//!                        │                                      │
//!                        ├─→ cache facade (invalidate, queues)  │
//!                        └─→ notifier / audit sink ←────────────┘
//! background: engine workers + detector sweep + quarantine reaper
//! ```
//!
//! Everything is injectable: production wires Redis/PostgreSQL, tests
//! wire `mocks::*` and run at memory speed.

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]

// Public modules
pub mod constants;
pub mod detector;
pub mod devices;
pub mod engine;
pub mod environment;
pub mod gate;
pub mod moderation;
pub mod operator;
pub mod providers;
pub mod router;
pub mod stores;

#[cfg(feature = "test-utils")]
pub mod mocks;

// Re-export main types for convenience
pub use engine::BackgroundProcessor;
pub use environment::Environment;
pub use gate::{RequestContext, SubmitReportRequest, SubmitReportResponse};
pub use moderation::ValidationOutcome;
pub use providers::{AuditSink, CacheStore, DeviceStore, Notifier, PrincipalStore, ReportStore};
pub use router::router;

#[cfg(feature = "test-utils")]
pub use environment::MockEnvironment;
