//! Notifier trait: the core's only outward event surface.

use civicwatch_core::error::Result;
use civicwatch_core::events::DomainEvent;
use std::future::Future;

/// Logical-event notifier.
///
/// The core emits [`DomainEvent`]s; the transport (WebSocket fan-out in
/// production, a recorder in tests) is injected behind this trait.
/// Notifier failures after a durable save are non-fatal: callers log
/// and continue.
pub trait Notifier: Send + Sync {
    /// Broadcast an event to all connected consumers.
    ///
    /// # Errors
    ///
    /// Returns transport errors; callers treat them as warnings.
    fn broadcast(&self, event: &DomainEvent) -> impl Future<Output = Result<()>> + Send;

    /// Deliver an event to admin consumers only.
    ///
    /// # Errors
    ///
    /// Returns transport errors; callers treat them as warnings.
    fn notify_admins(&self, event: &DomainEvent) -> impl Future<Output = Result<()>> + Send;
}
