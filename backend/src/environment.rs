//! Trust-core environment.
//!
//! This module defines the environment type for dependency injection:
//! every external collaborator the services need, behind the provider
//! traits. Service methods live in `impl` blocks on [`Environment`]
//! spread across the service modules (gate, moderation, engine,
//! detector, operator).

use crate::providers::{AuditSink, CacheStore, DeviceStore, Notifier, PrincipalStore, ReportStore};
use civicwatch_core::config::CoreConfig;

/// Trust-core environment.
///
/// Contains all external dependencies plus the resolved configuration.
///
/// # Type Parameters
///
/// - `C`: cache facade
/// - `P`: principal store
/// - `D`: device store
/// - `R`: report store
/// - `N`: notifier
/// - `A`: audit sink
#[derive(Clone)]
pub struct Environment<C, P, D, R, N, A>
where
    C: CacheStore + Clone,
    P: PrincipalStore + Clone,
    D: DeviceStore + Clone,
    R: ReportStore + Clone,
    N: Notifier + Clone,
    A: AuditSink + Clone,
{
    /// Cache facade (Redis).
    pub cache: C,

    /// Principal document store (PostgreSQL).
    pub principals: P,

    /// Device document store (PostgreSQL).
    pub devices: D,

    /// Report document store (PostgreSQL).
    pub reports: R,

    /// Logical-event notifier (WebSocket collaborator).
    pub notifier: N,

    /// Audit-log collaborator.
    pub audit: A,

    /// Resolved configuration.
    pub config: CoreConfig,
}

impl<C, P, D, R, N, A> Environment<C, P, D, R, N, A>
where
    C: CacheStore + Clone,
    P: PrincipalStore + Clone,
    D: DeviceStore + Clone,
    R: ReportStore + Clone,
    N: Notifier + Clone,
    A: AuditSink + Clone,
{
    /// Create a new environment.
    #[must_use]
    pub fn new(
        cache: C,
        principals: P,
        devices: D,
        reports: R,
        notifier: N,
        audit: A,
        config: CoreConfig,
    ) -> Self {
        Self {
            cache,
            principals,
            devices,
            reports,
            notifier,
            audit,
            config,
        }
    }
}

#[cfg(feature = "test-utils")]
impl
    Environment<
        crate::mocks::MemoryCacheStore,
        crate::mocks::MockPrincipalStore,
        crate::mocks::MockDeviceStore,
        crate::mocks::MockReportStore,
        crate::mocks::RecordingNotifier,
        crate::mocks::RecordingAuditSink,
    >
{
    /// Fully mocked environment for tests.
    #[must_use]
    pub fn mocked() -> Self {
        Self::new(
            crate::mocks::MemoryCacheStore::new(),
            crate::mocks::MockPrincipalStore::new(),
            crate::mocks::MockDeviceStore::new(),
            crate::mocks::MockReportStore::new(),
            crate::mocks::RecordingNotifier::new(),
            crate::mocks::RecordingAuditSink::new(),
            CoreConfig::new(
                "postgresql://localhost/civicwatch-test".to_string(),
                "redis://127.0.0.1:6379".to_string(),
            ),
        )
    }
}

/// Alias for the fully mocked environment used across the test suites.
#[cfg(feature = "test-utils")]
pub type MockEnvironment = Environment<
    crate::mocks::MemoryCacheStore,
    crate::mocks::MockPrincipalStore,
    crate::mocks::MockDeviceStore,
    crate::mocks::MockReportStore,
    crate::mocks::RecordingNotifier,
    crate::mocks::RecordingAuditSink,
>;
