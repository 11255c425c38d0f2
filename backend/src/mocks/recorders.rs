//! Recording notifier and audit sink for testing.

use crate::providers::{AuditSink, Notifier};
use civicwatch_core::error::Result;
use civicwatch_core::events::{AuditEntry, DomainEvent};
use std::sync::{Arc, Mutex};

/// Notifier that records every event it is handed.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    broadcasts: Arc<Mutex<Vec<DomainEvent>>>,
    admin_events: Arc<Mutex<Vec<DomainEvent>>>,
}

impl RecordingNotifier {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Broadcast events seen so far.
    #[must_use]
    pub fn broadcasts(&self) -> Vec<DomainEvent> {
        lock(&self.broadcasts).clone()
    }

    /// Admin-only events seen so far.
    #[must_use]
    pub fn admin_events(&self) -> Vec<DomainEvent> {
        lock(&self.admin_events).clone()
    }

    /// All events (broadcast + admin) by wire name.
    #[must_use]
    pub fn event_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> =
            self.broadcasts().iter().map(DomainEvent::name).collect();
        names.extend(self.admin_events().iter().map(DomainEvent::name));
        names
    }
}

impl Notifier for RecordingNotifier {
    async fn broadcast(&self, event: &DomainEvent) -> Result<()> {
        lock(&self.broadcasts).push(event.clone());
        Ok(())
    }

    async fn notify_admins(&self, event: &DomainEvent) -> Result<()> {
        lock(&self.admin_events).push(event.clone());
        Ok(())
    }
}

/// Audit sink that records every entry.
#[derive(Debug, Clone, Default)]
pub struct RecordingAuditSink {
    entries: Arc<Mutex<Vec<AuditEntry>>>,
}

impl RecordingAuditSink {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries recorded so far.
    #[must_use]
    pub fn entries(&self) -> Vec<AuditEntry> {
        lock(&self.entries).clone()
    }
}

impl AuditSink for RecordingAuditSink {
    async fn record(&self, entry: &AuditEntry) -> Result<()> {
        lock(&self.entries).push(entry.clone());
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
