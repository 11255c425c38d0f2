//! Report document-store trait.

use civicwatch_core::error::Result;
use civicwatch_core::report::{Report, ReportStatus};
use civicwatch_core::types::ReportId;
use std::future::Future;

/// Sort direction for report listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// Ascending.
    Asc,
    /// Descending.
    #[default]
    Desc,
}

/// Report listing filter.
///
/// Public callers are restricted by the services to public statuses and
/// never receive original coordinates; this type only describes the
/// query shape.
#[derive(Debug, Clone, Default)]
pub struct ReportQuery {
    /// Statuses to include; empty means no status filter.
    pub statuses: Vec<ReportStatus>,
    /// Incident type filter.
    pub incident_type: Option<String>,
    /// Minimum severity.
    pub min_severity: Option<u8>,
    /// Only female-sensitive incidents.
    pub gender_sensitive: Option<bool>,
    /// Sort field (`timestamp`, `severity`, `priority`).
    pub sort_by: Option<String>,
    /// Sort direction.
    pub sort_order: SortOrder,
    /// Page size.
    pub limit: usize,
    /// Page offset.
    pub offset: usize,
}

/// Report document store.
pub trait ReportStore: Send + Sync {
    /// Get a report by id.
    ///
    /// # Errors
    ///
    /// [`civicwatch_core::CoreError::NotFound`] when absent.
    fn get(&self, id: ReportId) -> impl Future<Output = Result<Report>> + Send;

    /// Insert a new report.
    ///
    /// # Errors
    ///
    /// Returns store errors.
    fn insert(&self, report: &Report) -> impl Future<Output = Result<Report>> + Send;

    /// Update an existing report (optimistic on `revision`).
    ///
    /// # Errors
    ///
    /// [`civicwatch_core::CoreError::Conflict`] on a stale revision,
    /// [`civicwatch_core::CoreError::NotFound`] when absent.
    fn update(&self, report: &Report) -> impl Future<Output = Result<Report>> + Send;

    /// List reports matching a query.
    ///
    /// # Errors
    ///
    /// Returns store errors.
    fn list(&self, query: &ReportQuery) -> impl Future<Output = Result<Vec<Report>>> + Send;

    /// Count reports per status (operator statistics).
    ///
    /// # Errors
    ///
    /// Returns store errors.
    fn count_by_status(
        &self,
    ) -> impl Future<Output = Result<Vec<(ReportStatus, u64)>>> + Send;
}
