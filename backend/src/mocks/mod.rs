//! Mock providers for testing.
//!
//! In-memory implementations of every provider trait, deterministic and
//! running at memory speed. The store mocks honor the same optimistic
//! concurrency contract as the PostgreSQL stores so conflict-retry paths
//! are testable without a database.

pub mod cache;
pub mod device_store;
pub mod principal_store;
pub mod recorders;
pub mod report_store;

pub use cache::MemoryCacheStore;
pub use device_store::MockDeviceStore;
pub use principal_store::MockPrincipalStore;
pub use recorders::{RecordingAuditSink, RecordingNotifier};
pub use report_store::MockReportStore;
