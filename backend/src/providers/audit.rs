//! Audit sink trait.

use civicwatch_core::error::Result;
use civicwatch_core::events::AuditEntry;
use std::future::Future;

/// External audit-log collaborator.
///
/// Every mutating operator call emits an [`AuditEntry`]. Storage is out
/// of scope for the core; production wires the audit collection,
/// testing wires a recorder.
pub trait AuditSink: Send + Sync {
    /// Record an audit entry.
    ///
    /// # Errors
    ///
    /// Returns sink errors; operator services log and continue, since an
    /// audit failure must not roll back a completed action.
    fn record(&self, entry: &AuditEntry) -> impl Future<Output = Result<()>> + Send;
}
