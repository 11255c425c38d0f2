//! Mock report store for testing.

use crate::providers::{ReportQuery, ReportStore, SortOrder};
use civicwatch_core::error::{CoreError, Result};
use civicwatch_core::report::{Report, ReportStatus};
use civicwatch_core::types::ReportId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Mock report store over process memory.
#[derive(Debug, Clone, Default)]
pub struct MockReportStore {
    reports: Arc<Mutex<HashMap<ReportId, Report>>>,
}

impl MockReportStore {
    /// Create an empty mock store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored reports.
    #[must_use]
    pub fn len(&self) -> usize {
        self.guard().len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, HashMap<ReportId, Report>> {
        match self.reports.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl ReportStore for MockReportStore {
    async fn get(&self, id: ReportId) -> Result<Report> {
        self.guard().get(&id).cloned().ok_or(CoreError::NotFound)
    }

    async fn insert(&self, report: &Report) -> Result<Report> {
        let mut guard = self.guard();
        if guard.contains_key(&report.id) {
            return Err(CoreError::Database("report id already exists".to_string()));
        }
        guard.insert(report.id, report.clone());
        Ok(report.clone())
    }

    async fn update(&self, report: &Report) -> Result<Report> {
        let mut guard = self.guard();
        let Some(stored) = guard.get_mut(&report.id) else {
            return Err(CoreError::NotFound);
        };
        if stored.revision != report.revision {
            return Err(CoreError::Conflict { entity: "report" });
        }
        let mut updated = report.clone();
        updated.revision += 1;
        *stored = updated.clone();
        Ok(updated)
    }

    async fn list(&self, query: &ReportQuery) -> Result<Vec<Report>> {
        let mut reports: Vec<Report> = self
            .guard()
            .values()
            .filter(|r| query.statuses.is_empty() || query.statuses.contains(&r.status))
            .filter(|r| {
                query
                    .incident_type
                    .as_ref()
                    .is_none_or(|t| &r.incident_type == t)
            })
            .filter(|r| query.min_severity.is_none_or(|min| r.severity.get() >= min))
            .filter(|r| {
                query
                    .gender_sensitive
                    .is_none_or(|wanted| r.security_flags.requires_female_validation == wanted)
            })
            .cloned()
            .collect();

        reports.sort_by(|a, b| {
            let ordering = match query.sort_by.as_deref() {
                Some("severity") => a.severity.get().cmp(&b.severity.get()),
                Some("priority") => a
                    .moderation
                    .priority_level
                    .cmp(&b.moderation.priority_level),
                _ => a.timestamp.cmp(&b.timestamp),
            };
            match query.sort_order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            }
        });

        let limit = if query.limit == 0 { 100 } else { query.limit };
        Ok(reports
            .into_iter()
            .skip(query.offset)
            .take(limit)
            .collect())
    }

    async fn count_by_status(&self) -> Result<Vec<(ReportStatus, u64)>> {
        let mut counts: HashMap<ReportStatus, u64> = HashMap::new();
        for report in self.guard().values() {
            *counts.entry(report.status).or_default() += 1;
        }
        Ok(counts.into_iter().collect())
    }
}
